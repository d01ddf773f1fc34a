//! Relay multiplexer: one client surface over many websocket relays.
//!
//! A [`RelayPool`] owns a background task per relay (connect, replay
//! subscriptions, pump frames, reconnect with exponential backoff) and a
//! pool-wide dedup cache so a subscription callback fires exactly once per
//! event no matter how many relays deliver it.
//!
//! The pool is an ordinary value: build one per process at the top of the
//! application, or one per test. A relay being offline never blocks the
//! others; publish is best-effort fan-out to whichever relays are currently
//! connected.

mod connection;
mod dedup;
mod protocol;

pub use dedup::{DedupCache, DEDUP_CAPACITY};
pub use protocol::{
    close_frame, event_frame, parse_relay_message, req_frame, Filter, RelayMessage,
};

use crate::crypto::random_bytes;
use crate::error::Result;
use crate::logging::RedactedHex;
use crate::nostr::{unix_now, Event};
use connection::RelayConnection;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, trace, warn};

/// Connection state of one relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayStatus {
    /// Dialing or waiting for the websocket upgrade.
    Connecting,
    /// Open and usable.
    Connected,
    /// Closed; a reconnect is pending.
    Disconnected,
    /// Last connect attempt failed; a reconnect is pending.
    Error,
}

/// Snapshot of one relay's state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayInfo {
    /// Relay websocket URL.
    pub url: String,
    /// Current connection state.
    pub status: RelayStatus,
    /// Most recent error message, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Consecutive failed attempts since the last successful open.
    pub reconnect_attempts: u32,
}

/// Callback invoked with each novel event matching a subscription.
pub type EventCallback = Box<dyn Fn(Event) + Send + Sync>;

/// Callback invoked when a relay reports end-of-stored-events.
pub type EoseCallback = Box<dyn Fn() + Send + Sync>;

/// Callback invoked on relay status transitions.
pub type RelayStatusCallback = Box<dyn Fn(String, RelayStatus) + Send + Sync>;

struct Subscription {
    filters: Vec<Filter>,
    on_event: EventCallback,
    on_eose: Option<EoseCallback>,
}

/// State shared between the pool surface and the per-relay tasks.
pub(crate) struct PoolShared {
    subscriptions: RwLock<HashMap<String, Arc<Subscription>>>,
    dedup: Mutex<DedupCache>,
    infos: RwLock<HashMap<String, RelayInfo>>,
    status_callback: RwLock<Option<RelayStatusCallback>>,
}

impl PoolShared {
    fn new() -> Self {
        Self {
            subscriptions: RwLock::new(HashMap::new()),
            dedup: Mutex::new(DedupCache::default()),
            infos: RwLock::new(HashMap::new()),
            status_callback: RwLock::new(None),
        }
    }

    pub(crate) async fn set_status(&self, url: &str, status: RelayStatus, error: Option<String>) {
        {
            let mut infos = self.infos.write().await;
            match infos.get_mut(url) {
                Some(info) => {
                    info.status = status;
                    if error.is_some() {
                        info.last_error = error;
                    }
                    if status == RelayStatus::Connected {
                        info.reconnect_attempts = 0;
                    }
                }
                // The relay was removed while its task was shutting down.
                None => return,
            }
        }
        if let Some(callback) = self.status_callback.read().await.as_ref() {
            callback(url.to_string(), status);
        }
    }

    pub(crate) async fn reset_attempts(&self, url: &str) {
        if let Some(info) = self.infos.write().await.get_mut(url) {
            info.reconnect_attempts = 0;
        }
    }

    pub(crate) async fn record_attempt(&self, url: &str, attempts: u32) {
        if let Some(info) = self.infos.write().await.get_mut(url) {
            info.reconnect_attempts = attempts;
        }
    }

    /// REQ frames for every active subscription, sent on each fresh open.
    pub(crate) async fn subscription_frames(&self) -> Vec<String> {
        let subscriptions = self.subscriptions.read().await;
        subscriptions
            .iter()
            .filter_map(|(sub_id, sub)| req_frame(sub_id, &sub.filters).ok())
            .collect()
    }

    /// Dispatch one relay-to-client frame.
    ///
    /// The dedup check and the callback run on the owning connection's task,
    /// so delivery for one relay is serialized with its own message order.
    pub(crate) async fn handle_incoming(&self, url: &str, raw: &str) {
        match parse_relay_message(raw) {
            Some(RelayMessage::Event { sub_id, event }) => {
                let novel = self.dedup.lock().await.insert(&event.id, unix_now());
                if !novel {
                    trace!(relay = %url, event_id = %RedactedHex(&event.id), "duplicate event dropped");
                    return;
                }
                let subscription = self.subscriptions.read().await.get(&sub_id).cloned();
                match subscription {
                    Some(subscription) => (subscription.on_event)(event),
                    // Unsubscribed while the frame was in flight.
                    None => trace!(sub_id = %sub_id, "event for unknown subscription"),
                }
            }
            Some(RelayMessage::Eose { sub_id }) => {
                let subscription = self.subscriptions.read().await.get(&sub_id).cloned();
                if let Some(subscription) = subscription {
                    if let Some(on_eose) = &subscription.on_eose {
                        on_eose();
                    }
                }
            }
            Some(RelayMessage::Ok {
                event_id,
                accepted,
                message,
            }) => {
                if accepted {
                    trace!(relay = %url, event_id = %RedactedHex(&event_id), "publish accepted");
                } else {
                    warn!(
                        relay = %url,
                        event_id = %RedactedHex(&event_id),
                        reason = message.as_deref().unwrap_or(""),
                        "publish rejected"
                    );
                }
            }
            Some(RelayMessage::Notice { message }) => {
                info!(relay = %url, notice = %message, "relay notice");
            }
            None => {
                debug!(relay = %url, "unrecognized relay frame");
            }
        }
    }
}

/// Multiplexer over a set of Nostr relays.
pub struct RelayPool {
    shared: Arc<PoolShared>,
    connections: StdMutex<HashMap<String, RelayConnection>>,
    configured: StdMutex<Vec<String>>,
}

impl RelayPool {
    /// Create a pool for the given relay URLs. No connections are opened
    /// until [`RelayPool::connect`] runs.
    pub fn new(urls: Vec<String>) -> Self {
        Self {
            shared: Arc::new(PoolShared::new()),
            connections: StdMutex::new(HashMap::new()),
            configured: StdMutex::new(urls),
        }
    }

    /// Register a callback for relay status transitions.
    pub async fn set_status_callback(&self, callback: RelayStatusCallback) {
        *self.shared.status_callback.write().await = Some(callback);
    }

    /// Open every configured relay in parallel.
    ///
    /// Relays already connected are left alone; relays sitting in a backoff
    /// wait are restarted immediately, cancelling their pending retry.
    pub async fn connect(&self) {
        let urls = self.configured.lock().map(|urls| urls.clone()).unwrap_or_default();
        for url in urls {
            self.ensure_info(&url).await;
            self.spawn_relay(&url).await;
        }
    }

    /// Add a relay and connect it immediately.
    pub async fn add_relay(&self, url: &str) {
        {
            let mut configured = match self.configured.lock() {
                Ok(configured) => configured,
                Err(_) => return,
            };
            if !configured.iter().any(|existing| existing == url) {
                configured.push(url.to_string());
            }
        }
        self.ensure_info(url).await;
        self.spawn_relay(url).await;
    }

    /// Remove a relay, aborting its connection and any pending retry.
    pub async fn remove_relay(&self, url: &str) {
        if let Ok(mut configured) = self.configured.lock() {
            configured.retain(|existing| existing != url);
        }
        let removed = self
            .connections
            .lock()
            .ok()
            .and_then(|mut connections| connections.remove(url));
        if let Some(connection) = removed {
            connection.shutdown();
        }
        self.shared.infos.write().await.remove(url);
        info!(relay = %url, "relay removed");
    }

    /// Tear down all connections and cancel every reconnect timer.
    ///
    /// The pool can be reconnected later; subscriptions stay registered.
    pub async fn disconnect(&self) {
        let drained: Vec<(String, RelayConnection)> = match self.connections.lock() {
            Ok(mut connections) => connections.drain().collect(),
            Err(_) => Vec::new(),
        };
        for (url, connection) in &drained {
            connection.shutdown();
            self.shared
                .set_status(url, RelayStatus::Disconnected, None)
                .await;
        }
        info!(relays = drained.len(), "relay pool disconnected");
    }

    /// Subscribe to events matching `filters` on every relay.
    ///
    /// Returns the generated subscription id. The callback fires exactly
    /// once per event id across the whole pool.
    pub async fn subscribe(
        &self,
        filters: Vec<Filter>,
        on_event: EventCallback,
        on_eose: Option<EoseCallback>,
    ) -> Result<String> {
        let sub_id = hex::encode(random_bytes::<4>());
        let subscription = Arc::new(Subscription {
            filters,
            on_event,
            on_eose,
        });
        let frame = req_frame(&sub_id, &subscription.filters)?;

        self.shared
            .subscriptions
            .write()
            .await
            .insert(sub_id.clone(), subscription);

        let sent = self.broadcast(&frame).await;
        debug!(sub_id = %sub_id, relays = sent, "subscription opened");
        Ok(sub_id)
    }

    /// Drop a subscription and notify every connected relay.
    ///
    /// Events already queued on a connection task may still be delivered
    /// for a moment after this returns.
    pub async fn unsubscribe(&self, sub_id: &str) {
        self.shared.subscriptions.write().await.remove(sub_id);
        self.broadcast(&close_frame(sub_id)).await;
        debug!(sub_id = %sub_id, "subscription closed");
    }

    /// Publish an event to every connected relay.
    ///
    /// Best effort: returns the number of relays the frame was dispatched
    /// to, which may be zero when everything is offline. Acceptance is
    /// reported asynchronously via `OK` frames and logged.
    pub async fn publish(&self, event: &Event) -> Result<usize> {
        let frame = event_frame(event)?;
        let sent = self.broadcast(&frame).await;
        debug!(event_id = %RedactedHex(&event.id), relays = sent, "event published");
        Ok(sent)
    }

    /// Snapshot of every configured relay's state.
    pub async fn relay_info(&self) -> Vec<RelayInfo> {
        self.shared.infos.read().await.values().cloned().collect()
    }

    /// Whether at least one relay is currently connected.
    pub async fn is_connected(&self) -> bool {
        self.shared
            .infos
            .read()
            .await
            .values()
            .any(|info| info.status == RelayStatus::Connected)
    }

    async fn ensure_info(&self, url: &str) {
        let mut infos = self.shared.infos.write().await;
        infos.entry(url.to_string()).or_insert_with(|| RelayInfo {
            url: url.to_string(),
            status: RelayStatus::Disconnected,
            last_error: None,
            reconnect_attempts: 0,
        });
    }

    /// Spawn or restart the task for one relay. Connected relays are left
    /// untouched; anything else (fresh, backing off, errored) gets a new
    /// task, which cancels a pending retry timer.
    async fn spawn_relay(&self, url: &str) {
        let currently_connected = self
            .shared
            .infos
            .read()
            .await
            .get(url)
            .map(|info| info.status == RelayStatus::Connected)
            .unwrap_or(false);
        if currently_connected {
            return;
        }

        let connection = RelayConnection::spawn(url.to_string(), Arc::clone(&self.shared));
        if let Ok(mut connections) = self.connections.lock() {
            if let Some(previous) = connections.insert(url.to_string(), connection) {
                previous.shutdown();
            }
        }
    }

    /// Send a frame to every connected relay; returns how many took it.
    async fn broadcast(&self, frame: &str) -> usize {
        let handles: Vec<(String, connection::SenderHandle)> = match self.connections.lock() {
            Ok(connections) => connections
                .iter()
                .map(|(url, connection)| (url.clone(), connection.sender_handle()))
                .collect(),
            Err(_) => Vec::new(),
        };

        let mut sent = 0;
        for (url, handle) in handles {
            if connection::send_via(&handle, frame).await {
                sent += 1;
            } else {
                trace!(relay = %url, "skipping offline relay");
            }
        }
        sent
    }
}

impl Drop for RelayPool {
    fn drop(&mut self) {
        if let Ok(connections) = self.connections.lock() {
            for connection in connections.values() {
                connection.shutdown();
            }
        }
    }
}
