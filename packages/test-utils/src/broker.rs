//! In-process STOMP broker over axum WebSockets
//!
//! Speaks just enough STOMP 1.2 for the signaling client: CONNECT, SUBSCRIBE,
//! UNSUBSCRIBE, SEND and DISCONNECT. Everything clients send is recorded so
//! tests can assert on it; tests push MESSAGE frames with [`MockBroker::publish`].

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
    routing::get,
    Router,
};
use duel_sdk::stomp::{self, Command, Frame};
use futures::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};

/// A frame received from a client, tagged with its connection
#[derive(Debug, Clone)]
pub struct ReceivedFrame {
    pub connection: u64,
    pub frame: Frame,
}

enum Outgoing {
    Text(String),
    Binary(Vec<u8>),
    Close,
}

struct Connection {
    tx: mpsc::UnboundedSender<Outgoing>,
    /// subscription id → destination
    subscriptions: HashMap<String, String>,
}

#[derive(Default)]
struct Inner {
    connections: Mutex<HashMap<u64, Connection>>,
    received: Mutex<Vec<ReceivedFrame>>,
    changed: Notify,
    next_connection: AtomicU64,
    next_message: AtomicU64,
    accepted: AtomicUsize,
    reject_handshakes: AtomicUsize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Handle to the broker state; cheap to clone
#[derive(Clone, Default)]
pub struct MockBroker {
    inner: Arc<Inner>,
}

impl MockBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// `/ws` route serving this broker
    pub fn routes<S>(&self) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        Router::new()
            .route("/ws", get(ws_handler))
            .with_state(self.clone())
    }

    /// Send a MESSAGE to every subscriber of `destination`; returns how many got it
    pub fn publish(&self, destination: &str, body: &str) -> usize {
        let connections = lock(&self.inner.connections);
        let mut delivered = 0;
        for connection in connections.values() {
            for (id, subscribed) in &connection.subscriptions {
                if subscribed != destination {
                    continue;
                }
                let message_id = self.inner.next_message.fetch_add(1, Ordering::Relaxed);
                let frame = Frame::new(Command::Message)
                    .header("subscription", id.as_str())
                    .header("destination", destination)
                    .header("message-id", message_id.to_string())
                    .header("content-type", "application/json")
                    .with_body(body);
                if connection.tx.send(Outgoing::Text(frame.encode())).is_ok() {
                    delivered += 1;
                }
            }
        }
        delivered
    }

    /// Publish a JSON value
    pub fn publish_json(&self, destination: &str, body: &serde_json::Value) -> usize {
        self.publish(destination, &body.to_string())
    }

    /// Push a raw binary WebSocket message to every open connection
    pub fn push_binary(&self, data: &[u8]) -> usize {
        lock(&self.inner.connections)
            .values()
            .filter(|connection| connection.tx.send(Outgoing::Binary(data.to_vec())).is_ok())
            .count()
    }

    /// Close every open connection from the broker side
    pub fn drop_connections(&self) {
        let mut connections = lock(&self.inner.connections);
        for (_, connection) in connections.drain() {
            let _ = connection.tx.send(Outgoing::Close);
        }
        drop(connections);
        self.inner.changed.notify_waiters();
    }

    /// Answer the next `count` CONNECT frames with ERROR
    pub fn reject_next_handshakes(&self, count: usize) {
        self.inner.reject_handshakes.store(count, Ordering::Relaxed);
    }

    /// WebSocket connections accepted so far
    pub fn accepted_connections(&self) -> usize {
        self.inner.accepted.load(Ordering::Relaxed)
    }

    pub fn live_connections(&self) -> usize {
        lock(&self.inner.connections).len()
    }

    pub fn subscriber_count(&self, destination: &str) -> usize {
        lock(&self.inner.connections)
            .values()
            .flat_map(|connection| connection.subscriptions.values())
            .filter(|subscribed| subscribed.as_str() == destination)
            .count()
    }

    /// Every frame received so far, in arrival order
    pub fn received(&self) -> Vec<ReceivedFrame> {
        lock(&self.inner.received).clone()
    }

    /// Parsed JSON bodies of SEND frames addressed to `destination`
    pub fn sent_to(&self, destination: &str) -> Vec<serde_json::Value> {
        lock(&self.inner.received)
            .iter()
            .filter(|received| {
                received.frame.command == Command::Send
                    && received.frame.get("destination") == Some(destination)
            })
            .filter_map(|received| serde_json::from_str(&received.frame.body).ok())
            .collect()
    }

    /// Wait until `destination` has at least `count` subscribers
    pub async fn wait_for_subscribers(
        &self,
        destination: &str,
        count: usize,
        timeout: Duration,
    ) -> anyhow::Result<()> {
        self.wait_until(timeout, || self.subscriber_count(destination) >= count)
            .await
            .map_err(|_| {
                anyhow::anyhow!(
                    "timed out waiting for {} subscriber(s) on {} (have {})",
                    count,
                    destination,
                    self.subscriber_count(destination)
                )
            })
    }

    /// Wait until `count` SEND frames have arrived for `destination`
    pub async fn wait_for_sends(
        &self,
        destination: &str,
        count: usize,
        timeout: Duration,
    ) -> anyhow::Result<Vec<serde_json::Value>> {
        self.wait_until(timeout, || self.sent_to(destination).len() >= count)
            .await
            .map_err(|_| anyhow::anyhow!("timed out waiting for SEND to {}", destination))?;
        Ok(self.sent_to(destination))
    }

    /// Wait until `count` connections have been accepted
    pub async fn wait_for_connections(&self, count: usize, timeout: Duration) -> anyhow::Result<()> {
        self.wait_until(timeout, || self.accepted_connections() >= count)
            .await
            .map_err(|_| anyhow::anyhow!("timed out waiting for connection #{}", count))
    }

    async fn wait_until(
        &self,
        timeout: Duration,
        mut condition: impl FnMut() -> bool,
    ) -> Result<(), tokio::time::error::Elapsed> {
        tokio::time::timeout(timeout, async {
            loop {
                let changed = self.inner.changed.notified();
                if condition() {
                    return;
                }
                changed.await;
            }
        })
        .await
    }

    fn register(&self) -> (u64, mpsc::UnboundedReceiver<Outgoing>) {
        let id = self.inner.next_connection.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.inner.connections).insert(
            id,
            Connection {
                tx,
                subscriptions: HashMap::new(),
            },
        );
        self.inner.accepted.fetch_add(1, Ordering::Relaxed);
        self.inner.changed.notify_waiters();
        (id, rx)
    }

    fn unregister(&self, id: u64) {
        lock(&self.inner.connections).remove(&id);
        self.inner.changed.notify_waiters();
    }

    /// Handle one client frame; returns replies to send back and whether to close afterwards
    fn handle_frame(&self, connection: u64, frame: Frame) -> (Vec<Frame>, bool) {
        lock(&self.inner.received).push(ReceivedFrame {
            connection,
            frame: frame.clone(),
        });

        let mut replies = Vec::new();
        let mut close = false;
        match frame.command {
            Command::Connect | Command::Stomp => {
                let rejected = self
                    .inner
                    .reject_handshakes
                    .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
                    .is_ok();
                if rejected {
                    replies.push(Frame::new(Command::Error).header("message", "handshake rejected"));
                    close = true;
                } else {
                    replies.push(
                        Frame::new(Command::Connected)
                            .header("version", "1.2")
                            .header("heart-beat", "0,0")
                            .header("server", "duel-mock-broker"),
                    );
                }
            }
            Command::Subscribe => {
                if let (Some(id), Some(destination)) = (frame.get("id"), frame.get("destination")) {
                    if let Some(entry) = lock(&self.inner.connections).get_mut(&connection) {
                        entry
                            .subscriptions
                            .insert(id.to_string(), destination.to_string());
                    }
                }
            }
            Command::Unsubscribe => {
                if let Some(id) = frame.get("id") {
                    if let Some(entry) = lock(&self.inner.connections).get_mut(&connection) {
                        entry.subscriptions.remove(id);
                    }
                }
            }
            Command::Disconnect => {
                if let Some(receipt) = frame.get("receipt") {
                    replies.push(Frame::new(Command::Receipt).header("receipt-id", receipt));
                }
                close = true;
            }
            _ => {}
        }

        self.inner.changed.notify_waiters();
        (replies, close)
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(broker): State<MockBroker>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, broker))
}

async fn handle_socket(socket: WebSocket, broker: MockBroker) {
    let (id, mut outgoing) = broker.register();
    let (mut sender, mut receiver) = socket.split();
    tracing::debug!(connection = id, "mock broker accepted connection");

    loop {
        tokio::select! {
            message = outgoing.recv() => match message {
                Some(Outgoing::Text(text)) => {
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Some(Outgoing::Binary(data)) => {
                    if sender.send(Message::Binary(data.into())).await.is_err() {
                        break;
                    }
                }
                Some(Outgoing::Close) | None => {
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
            },

            incoming = receiver.next() => {
                let text = match incoming {
                    Some(Ok(Message::Text(text))) => text.to_string(),
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    Some(Ok(_)) => continue,
                };
                let frames = match stomp::decode_all(&text) {
                    Ok(frames) => frames,
                    Err(e) => {
                        tracing::warn!(connection = id, error = %e, "mock broker got bad frame");
                        continue;
                    }
                };

                let mut close = false;
                for frame in frames {
                    let (replies, done) = broker.handle_frame(id, frame);
                    for reply in replies {
                        if sender.send(Message::Text(reply.encode().into())).await.is_err() {
                            close = true;
                        }
                    }
                    close |= done;
                }
                if close {
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    }

    broker.unregister(id);
    tracing::debug!(connection = id, "mock broker closed connection");
}
