//! Real-time match signaling client
//!
//! [`SignalingClient`] is a handle to a background runtime task that owns the
//! broker connection. Actions are fire-and-forget; their outcomes arrive later
//! as [`ClientEvent`]s on receivers obtained from [`SignalingClient::observe`].
//!
//! ```no_run
//! use duel_sdk::{AddressResolver, ClientEvent, Difficulty, SignalingClient, SignalingConfig, TracingLogger, WsConnector};
//! use std::sync::Arc;
//!
//! # async fn run() -> duel_sdk::SdkResult<()> {
//! let resolver = Arc::new(AddressResolver::fixed("http://localhost:8080", Arc::new(TracingLogger))?);
//! let client = SignalingClient::new(SignalingConfig::default(), resolver, WsConnector);
//! let mut events = client.observe();
//!
//! client.connect("alice")?;
//! while let Some(event) = events.recv().await {
//!     match event {
//!         ClientEvent::StateChanged(state) if state.is_connected() => {
//!             client.join_queue(Difficulty::Medium)?;
//!         }
//!         ClientEvent::MatchFound { payload, .. } => {
//!             client.subscribe_to_match(&payload.match_id)?;
//!         }
//!         ClientEvent::MatchResult { payload, .. } => {
//!             println!("winner: {:?}", payload.winner);
//!             break;
//!         }
//!         _ => {}
//!     }
//! }
//! # Ok(())
//! # }
//! ```

mod runtime;
mod subscriptions;


pub use subscriptions::SubscriptionSet;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{SdkError, SdkResult};
use crate::protocol::{
    Action, Difficulty, MatchFound, MatchResult, NotificationPush, OutboundMessage, Topic,
};
use crate::resolver::AddressResolver;
use crate::transport::Connector;

/// Fixed delay between reconnect attempts
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_secs(5);

/// Connection tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalingConfig {
    pub reconnect_interval_ms: u64,
    /// Consecutive failed attempts before giving up; `None` retries forever
    pub max_reconnect_attempts: Option<u32>,
    /// Heart-beat we offer to send, in milliseconds (0 disables)
    pub heartbeat_outgoing_ms: u64,
    /// Heart-beat we ask the broker for, in milliseconds (0 disables)
    pub heartbeat_incoming_ms: u64,
    pub handshake_timeout_ms: u64,
    /// STOMP `host` header; defaults to the endpoint host
    pub host: Option<String>,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            reconnect_interval_ms: DEFAULT_RECONNECT_INTERVAL.as_millis() as u64,
            max_reconnect_attempts: None,
            heartbeat_outgoing_ms: 10_000,
            heartbeat_incoming_ms: 10_000,
            handshake_timeout_ms: 10_000,
            host: None,
        }
    }
}

impl SignalingConfig {
    pub fn with_reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = Some(attempts);
        self
    }

    pub fn with_heartbeat(mut self, outgoing: Duration, incoming: Duration) -> Self {
        self.heartbeat_outgoing_ms = outgoing.as_millis() as u64;
        self.heartbeat_incoming_ms = incoming.as_millis() as u64;
        self
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }
}

/// Connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    /// Reconnect attempts exhausted; a new `connect` starts over
    Failed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Failed => "failed",
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything the client reports to observers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    StateChanged(ConnectionState),
    MatchFound { topic: Topic, payload: MatchFound },
    MatchResult { topic: Topic, payload: MatchResult },
    Notification { topic: Topic, payload: NotificationPush },
    /// An action was refused because there was no live session
    SendDropped { action: Action },
    /// An inbound frame or body could not be decoded; the session continues
    Malformed { topic: Option<Topic>, error: String },
    /// Broker sent an ERROR frame; the session is restarted
    BrokerError { message: String },
}

pub(crate) enum Command {
    Connect { identity: String },
    Disconnect { done: oneshot::Sender<()> },
    Send(OutboundMessage),
    Subscribe(Topic),
    Unsubscribe(Topic),
}

/// State visible to both the handle and the runtime
pub(crate) struct Shared {
    state: watch::Sender<ConnectionState>,
    identity: Mutex<Option<String>>,
    subscriptions: Mutex<SubscriptionSet>,
    current_match: watch::Sender<Option<MatchFound>>,
    observers: Mutex<Vec<mpsc::UnboundedSender<ClientEvent>>>,
    dropped: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    fn new() -> Self {
        Self {
            state: watch::channel(ConnectionState::Disconnected).0,
            identity: Mutex::new(None),
            subscriptions: Mutex::new(SubscriptionSet::new()),
            current_match: watch::channel(None).0,
            observers: Mutex::new(Vec::new()),
            dropped: AtomicU64::new(0),
        }
    }

    pub(crate) fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Publish a state change; repeated states are not re-announced
    pub(crate) fn set_state(&self, next: ConnectionState) {
        let changed = self.state.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
        if changed {
            tracing::info!(state = %next, "signaling state changed");
            self.emit(ClientEvent::StateChanged(next));
        }
    }

    pub(crate) fn identity(&self) -> Option<String> {
        lock(&self.identity).clone()
    }

    pub(crate) fn set_identity(&self, identity: Option<String>) {
        *lock(&self.identity) = identity;
    }

    pub(crate) fn subscriptions(&self) -> MutexGuard<'_, SubscriptionSet> {
        lock(&self.subscriptions)
    }

    pub(crate) fn store_match(&self, payload: MatchFound) {
        self.current_match.send_replace(Some(payload));
    }

    /// Deliver to every live observer, pruning the ones that hung up
    pub(crate) fn emit(&self, event: ClientEvent) {
        lock(&self.observers).retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub(crate) fn record_drop(&self, action: Action) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(%action, state = %self.state(), "dropping action, not connected");
        self.emit(ClientEvent::SendDropped { action });
    }
}

/// Handle to one signaling session
///
/// Dropping the handle cancels the runtime task and closes the connection.
pub struct SignalingClient {
    commands: mpsc::UnboundedSender<Command>,
    shared: Arc<Shared>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl SignalingClient {
    /// Spawn the runtime. Nothing is resolved or opened until [`connect`](Self::connect).
    ///
    /// Must be called from within a tokio runtime.
    pub fn new<C: Connector>(
        config: SignalingConfig,
        resolver: Arc<AddressResolver>,
        connector: C,
    ) -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared::new());
        let cancel = CancellationToken::new();

        let runtime = runtime::Runtime::new(
            config,
            resolver,
            Arc::new(connector),
            command_rx,
            Arc::clone(&shared),
            cancel.clone(),
        );
        let task = tokio::spawn(runtime.run());

        Self {
            commands,
            shared,
            cancel,
            task: Some(task),
        }
    }

    /// Start a session for `identity`
    ///
    /// A no-op while already connecting, connected or reconnecting as the same
    /// identity. A different identity replaces the current session.
    pub fn connect(&self, identity: impl Into<String>) -> SdkResult<()> {
        let identity = identity.into();
        if identity.is_empty() {
            return Err(SdkError::ConnectionError("identity must not be empty".to_string()));
        }
        self.command(Command::Connect { identity })
    }

    /// Close the session and forget its subscriptions. Safe in every state.
    pub async fn disconnect(&self) {
        let (done, wait) = oneshot::channel();
        if self.commands.send(Command::Disconnect { done }).is_ok() {
            let _ = wait.await;
        }
    }

    /// Ask matchmaking for an opponent at `difficulty`
    pub fn join_queue(&self, difficulty: Difficulty) -> SdkResult<()> {
        self.send_action(Action::JoinQueue, |identity| OutboundMessage::JoinQueue {
            identity,
            difficulty,
        })
    }

    /// Withdraw from matchmaking
    pub fn leave_queue(&self) -> SdkResult<()> {
        self.send_action(Action::LeaveQueue, |identity| OutboundMessage::LeaveQueue {
            identity,
        })
    }

    /// Invite `target` to a direct match
    pub fn send_challenge(&self, target: impl Into<String>) -> SdkResult<()> {
        let target = target.into();
        self.send_action(Action::SendChallenge, |identity| {
            OutboundMessage::SendChallenge { identity, target }
        })
    }

    /// Submit the current solution attempt for `match_id`
    pub fn submit_code(
        &self,
        match_id: impl Into<String>,
        code: impl Into<String>,
        language: impl Into<String>,
    ) -> SdkResult<()> {
        let (match_id, code, language) = (match_id.into(), code.into(), language.into());
        self.send_action(Action::SubmitCode, |identity| OutboundMessage::SubmitCode {
            identity,
            match_id,
            code,
            language,
        })
    }

    /// Listen for the result of `match_id`, replacing any earlier subscription to it
    pub fn subscribe_to_match(&self, match_id: &str) -> SdkResult<()> {
        self.require_connected(Action::Subscribe)?;
        self.command(Command::Subscribe(Topic::Match(match_id.to_string())))
    }

    pub fn unsubscribe_from_match(&self, match_id: &str) -> SdkResult<()> {
        self.require_connected(Action::Subscribe)?;
        self.command(Command::Unsubscribe(Topic::Match(match_id.to_string())))
    }

    /// Subscribe to the personal notification feed
    pub fn subscribe_to_notifications(&self) -> SdkResult<()> {
        let identity = self.require_connected(Action::Subscribe)?;
        self.command(Command::Subscribe(Topic::Notifications(identity)))
    }

    /// Register an observer; every event after this call is delivered once, in order
    pub fn observe(&self) -> mpsc::UnboundedReceiver<ClientEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.shared.observers).push(tx);
        rx
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    pub fn state_watch(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Identity of the current or pending session
    pub fn identity(&self) -> Option<String> {
        self.shared.identity()
    }

    pub fn active_subscriptions(&self) -> Vec<Topic> {
        self.shared.subscriptions().topics()
    }

    /// Last match-found payload received on the personal channel
    pub fn current_match(&self) -> Option<MatchFound> {
        self.shared.current_match.borrow().clone()
    }

    pub fn clear_match_data(&self) {
        self.shared.current_match.send_replace(None);
    }

    /// Actions refused because the client was not connected
    pub fn dropped_sends(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    /// Stop the runtime and wait for it to close the connection
    pub async fn shutdown(mut self) {
        self.disconnect().await;
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }

    fn command(&self, command: Command) -> SdkResult<()> {
        self.commands.send(command).map_err(|_| SdkError::ClientClosed)
    }

    fn require_connected(&self, action: Action) -> SdkResult<String> {
        let state = self.shared.state();
        match self.shared.identity() {
            Some(identity) if state.is_connected() => Ok(identity),
            _ => {
                self.shared.record_drop(action);
                Err(SdkError::NotConnected { state })
            }
        }
    }

    fn send_action(
        &self,
        action: Action,
        build: impl FnOnce(String) -> OutboundMessage,
    ) -> SdkResult<()> {
        let identity = self.require_connected(action)?;
        self.command(Command::Send(build(identity)))
    }
}

impl fmt::Debug for SignalingClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalingClient")
            .field("state", &self.state())
            .field("identity", &self.identity())
            .finish()
    }
}

impl Drop for SignalingClient {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
