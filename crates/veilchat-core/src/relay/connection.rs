//! A single relay connection and its reconnect loop.
//!
//! Each relay is owned by one background task that dials the websocket,
//! replays every active subscription, then pumps frames in both directions.
//! On close or error the task backs off exponentially and dials again;
//! aborting the task (remove, disconnect, explicit reconnect) cancels any
//! pending retry timer with it.

use crate::relay::{PoolShared, RelayStatus};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, trace, warn};

/// Base reconnect delay in seconds.
const BACKOFF_BASE_SECS: u64 = 1;

/// Maximum reconnect delay in seconds.
const BACKOFF_MAX_SECS: u64 = 300;

/// Outgoing frame buffer per relay.
const OUTBOUND_BUFFER: usize = 64;

/// Shared slot holding the outgoing-frame sender while a relay is open.
pub(crate) type SenderHandle = Arc<RwLock<Option<mpsc::Sender<String>>>>;

/// Queue a frame on a relay's outgoing channel, if it is currently open.
pub(crate) async fn send_via(handle: &SenderHandle, frame: &str) -> bool {
    let sender = handle.read().await.clone();
    match sender {
        Some(tx) => tx.send(frame.to_string()).await.is_ok(),
        None => false,
    }
}

/// Handle to a relay's background task.
pub(crate) struct RelayConnection {
    outbound: SenderHandle,
    task: JoinHandle<()>,
}

impl RelayConnection {
    /// Spawn the connection task for `url`.
    pub(crate) fn spawn(url: String, shared: Arc<PoolShared>) -> Self {
        let outbound: SenderHandle = Arc::new(RwLock::new(None));
        let task = tokio::spawn(run(url, shared, Arc::clone(&outbound)));
        Self { outbound, task }
    }

    /// Clone the slot used to reach this relay's outgoing channel.
    pub(crate) fn sender_handle(&self) -> SenderHandle {
        Arc::clone(&self.outbound)
    }

    /// Abort the task, cancelling any in-flight connection or retry timer.
    pub(crate) fn shutdown(&self) {
        self.task.abort();
    }
}

impl Drop for RelayConnection {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Exponential backoff: `min(base * 2^(attempts-1), max)`.
pub(crate) fn reconnect_delay(attempts: u32) -> Duration {
    let exponent = attempts.saturating_sub(1).min(16);
    Duration::from_secs((BACKOFF_BASE_SECS << exponent).min(BACKOFF_MAX_SECS))
}

async fn run(url: String, shared: Arc<PoolShared>, outbound: SenderHandle) {
    let mut attempts: u32 = 0;

    loop {
        shared.set_status(&url, RelayStatus::Connecting, None).await;

        match connect_async(url.as_str()).await {
            Ok((socket, _)) => {
                attempts = 0;
                shared.reset_attempts(&url).await;

                let (mut sink, mut stream) = socket.split();

                // Replay every active subscription before reporting the
                // relay as usable.
                let mut replay_failed = false;
                for frame in shared.subscription_frames().await {
                    if sink.send(Message::Text(frame)).await.is_err() {
                        replay_failed = true;
                        break;
                    }
                }

                if !replay_failed {
                    let (tx, mut rx) = mpsc::channel::<String>(OUTBOUND_BUFFER);
                    *outbound.write().await = Some(tx);
                    shared.set_status(&url, RelayStatus::Connected, None).await;
                    debug!(relay = %url, "relay connected");

                    loop {
                        tokio::select! {
                            frame = rx.recv() => {
                                match frame {
                                    Some(frame) => {
                                        if sink.send(Message::Text(frame)).await.is_err() {
                                            break;
                                        }
                                    }
                                    None => break,
                                }
                            }
                            incoming = stream.next() => {
                                match incoming {
                                    Some(Ok(Message::Text(text))) => {
                                        shared.handle_incoming(&url, &text).await;
                                    }
                                    Some(Ok(_)) => {
                                        // Pings are answered by the protocol
                                        // layer; binary frames are not part
                                        // of NIP-01.
                                        trace!(relay = %url, "ignoring non-text frame");
                                    }
                                    Some(Err(e)) => {
                                        warn!(relay = %url, error = %e, "relay socket error");
                                        break;
                                    }
                                    None => break,
                                }
                            }
                        }
                    }

                    *outbound.write().await = None;
                }

                shared
                    .set_status(&url, RelayStatus::Disconnected, None)
                    .await;
            }
            Err(e) => {
                warn!(relay = %url, error = %e, "relay connect failed");
                shared
                    .set_status(&url, RelayStatus::Error, Some(e.to_string()))
                    .await;
            }
        }

        attempts += 1;
        shared.record_attempt(&url, attempts).await;
        let delay = reconnect_delay(attempts);
        debug!(relay = %url, attempts, delay_secs = delay.as_secs(), "scheduling reconnect");
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_schedule() {
        assert_eq!(reconnect_delay(1), Duration::from_secs(1));
        assert_eq!(reconnect_delay(2), Duration::from_secs(2));
        assert_eq!(reconnect_delay(3), Duration::from_secs(4));
        assert_eq!(reconnect_delay(9), Duration::from_secs(256));
        // Capped at five minutes from the tenth attempt on.
        assert_eq!(reconnect_delay(10), Duration::from_secs(300));
        assert_eq!(reconnect_delay(60), Duration::from_secs(300));
    }
}
