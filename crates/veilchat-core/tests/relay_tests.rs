//! Relay pool scenarios against in-process websocket relays.
//!
//! Each test spins up one or more minimal relay servers on ephemeral ports,
//! points a fresh [`RelayPool`] at them, and observes frames on both sides.

use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Mutex};
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::Message;
use veilchat_core::nostr::{kind, sign_event, unix_now, Event, NostrKeypair};
use veilchat_core::relay::{Filter, RelayPool, RelayStatus};

/// A minimal in-process relay: records every client frame and can push
/// frames to all connected clients.
struct TestRelay {
    addr: SocketAddr,
    clients: Arc<Mutex<Vec<mpsc::Sender<String>>>>,
    received: Arc<Mutex<Vec<String>>>,
}

impl TestRelay {
    async fn spawn() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let clients: Arc<Mutex<Vec<mpsc::Sender<String>>>> = Arc::new(Mutex::new(Vec::new()));
        let received: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

        let accept_clients = Arc::clone(&clients);
        let accept_received = Arc::clone(&received);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let socket = match tokio_tungstenite::accept_async(stream).await {
                    Ok(socket) => socket,
                    Err(_) => continue,
                };
                let (mut sink, mut source) = socket.split();

                let (tx, mut rx) = mpsc::channel::<String>(32);
                accept_clients.lock().await.push(tx);

                tokio::spawn(async move {
                    while let Some(frame) = rx.recv().await {
                        if sink.send(Message::Text(frame)).await.is_err() {
                            break;
                        }
                    }
                });

                let received = Arc::clone(&accept_received);
                tokio::spawn(async move {
                    while let Some(Ok(message)) = source.next().await {
                        if let Message::Text(text) = message {
                            received.lock().await.push(text);
                        }
                    }
                });
            }
        });

        Self {
            addr,
            clients,
            received,
        }
    }

    fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    async fn push_to_all(&self, frame: &str) {
        for client in self.clients.lock().await.iter() {
            let _ = client.send(frame.to_string()).await;
        }
    }

    async fn received_frames(&self) -> Vec<String> {
        self.received.lock().await.clone()
    }
}

async fn wait_until_connected(pool: &RelayPool, expected: usize) {
    timeout(Duration::from_secs(5), async {
        loop {
            let connected = pool
                .relay_info()
                .await
                .iter()
                .filter(|info| info.status == RelayStatus::Connected)
                .count();
            if connected >= expected {
                return;
            }
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("relays connected in time");
}

fn signed_event(content: &str) -> Event {
    let keys = NostrKeypair::generate();
    let mut event = Event::build(
        keys.public_key_hex(),
        unix_now(),
        kind::TEXT_NOTE,
        vec![],
        content,
    );
    sign_event(&mut event, &keys).expect("sign");
    event
}

fn event_frame_for(sub_id: &str, event: &Event) -> String {
    serde_json::to_string(&serde_json::json!(["EVENT", sub_id, event])).expect("frame")
}

#[tokio::test]
async fn same_event_from_two_relays_is_delivered_once() {
    let relay_a = TestRelay::spawn().await;
    let relay_b = TestRelay::spawn().await;

    let pool = RelayPool::new(vec![relay_a.url(), relay_b.url()]);
    pool.connect().await;
    wait_until_connected(&pool, 2).await;

    let deliveries = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&deliveries);
    let sub_id = pool
        .subscribe(
            vec![Filter::new().kinds(vec![kind::TEXT_NOTE])],
            Box::new(move |_event| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
            None,
        )
        .await
        .expect("subscribe");

    let event = signed_event("deduplicate me");
    let frame = event_frame_for(&sub_id, &event);
    relay_a.push_to_all(&frame).await;
    relay_b.push_to_all(&frame).await;

    sleep(Duration::from_millis(300)).await;
    assert_eq!(deliveries.load(Ordering::SeqCst), 1);

    // A different event still gets through.
    let other = signed_event("another one");
    relay_b.push_to_all(&event_frame_for(&sub_id, &other)).await;
    sleep(Duration::from_millis(300)).await;
    assert_eq!(deliveries.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn subscriptions_made_before_connect_are_replayed_on_open() {
    let pool = RelayPool::new(Vec::new());

    let sub_id = pool
        .subscribe(
            vec![Filter::new().kinds(vec![kind::GIFT_WRAP])],
            Box::new(|_| {}),
            None,
        )
        .await
        .expect("subscribe");

    // Relay appears after the subscription exists.
    let relay = TestRelay::spawn().await;
    pool.add_relay(&relay.url()).await;
    wait_until_connected(&pool, 1).await;

    sleep(Duration::from_millis(200)).await;
    let frames = relay.received_frames().await;
    let req = frames
        .iter()
        .find(|frame| frame.contains("\"REQ\""))
        .expect("REQ frame replayed on connect");
    assert!(req.contains(&sub_id));
    assert!(req.contains("1059"));
}

#[tokio::test]
async fn publish_reaches_every_connected_relay() {
    let relay_a = TestRelay::spawn().await;
    let relay_b = TestRelay::spawn().await;

    let pool = RelayPool::new(vec![relay_a.url(), relay_b.url()]);
    pool.connect().await;
    wait_until_connected(&pool, 2).await;

    let event = signed_event("broadcast");
    let dispatched = pool.publish(&event).await.expect("publish");
    assert_eq!(dispatched, 2);

    sleep(Duration::from_millis(200)).await;
    for relay in [&relay_a, &relay_b] {
        let frames = relay.received_frames().await;
        assert!(
            frames
                .iter()
                .any(|frame| frame.contains("\"EVENT\"") && frame.contains(&event.id)),
            "relay did not receive the published event"
        );
    }
}

#[tokio::test]
async fn offline_relay_does_not_block_the_rest() {
    let live = TestRelay::spawn().await;
    // A port with nothing listening.
    let dead_url = {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);
        format!("ws://{addr}")
    };

    let pool = RelayPool::new(vec![live.url(), dead_url.clone()]);
    pool.connect().await;
    wait_until_connected(&pool, 1).await;

    let event = signed_event("partial fanout");
    let dispatched = pool.publish(&event).await.expect("publish");
    assert_eq!(dispatched, 1);

    let infos = pool.relay_info().await;
    let dead = infos.iter().find(|info| info.url == dead_url).expect("info");
    assert!(matches!(
        dead.status,
        RelayStatus::Error | RelayStatus::Connecting | RelayStatus::Disconnected
    ));
}

#[tokio::test]
async fn unsubscribe_sends_close_and_stops_delivery() {
    let relay = TestRelay::spawn().await;
    let pool = RelayPool::new(vec![relay.url()]);
    pool.connect().await;
    wait_until_connected(&pool, 1).await;

    let deliveries = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&deliveries);
    let sub_id = pool
        .subscribe(
            vec![Filter::new()],
            Box::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
            None,
        )
        .await
        .expect("subscribe");

    pool.unsubscribe(&sub_id).await;
    sleep(Duration::from_millis(200)).await;

    let frames = relay.received_frames().await;
    assert!(frames.iter().any(|frame| frame.contains("\"CLOSE\"") && frame.contains(&sub_id)));

    // Events for the dropped subscription are ignored.
    let event = signed_event("too late");
    relay.push_to_all(&event_frame_for(&sub_id, &event)).await;
    sleep(Duration::from_millis(200)).await;
    assert_eq!(deliveries.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn eose_invokes_callback() {
    let relay = TestRelay::spawn().await;
    let pool = RelayPool::new(vec![relay.url()]);
    pool.connect().await;
    wait_until_connected(&pool, 1).await;

    let eose_seen = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&eose_seen);
    let sub_id = pool
        .subscribe(
            vec![Filter::new()],
            Box::new(|_| {}),
            Some(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })),
        )
        .await
        .expect("subscribe");

    relay
        .push_to_all(&serde_json::json!(["EOSE", sub_id]).to_string())
        .await;
    sleep(Duration::from_millis(200)).await;
    assert_eq!(eose_seen.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn disconnect_tears_down_all_relays() {
    let relay = TestRelay::spawn().await;
    let pool = RelayPool::new(vec![relay.url()]);
    pool.connect().await;
    wait_until_connected(&pool, 1).await;

    pool.disconnect().await;
    assert!(!pool.is_connected().await);
}
