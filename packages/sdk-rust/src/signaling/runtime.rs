//! Background task owning the broker connection
//!
//! The task is a small state machine driven by its command queue. Every wait
//! (address resolution, transport connect, backoff sleep, the connected loop)
//! keeps draining commands so `disconnect` and identity switches take effect
//! promptly and reconnect attempts never overlap.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval_at, sleep, sleep_until, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{ClientEvent, Command, ConnectionState, Shared, SignalingConfig};
use crate::error::{SdkError, SdkResult};
use crate::protocol::{Action, InboundEvent, Topic};
use crate::resolver::AddressResolver;
use crate::stomp::{self, Command as StompCommand, Frame, HEARTBEAT_EOL};
use crate::transport::{Connector, Transport};

/// Where the state machine goes next
enum Next {
    Idle,
    Session(String),
    Shutdown,
}

/// Result of a wait that may be cut short by a command
enum Phase<T> {
    Done(T),
    Interrupted(Next),
}

/// Why the connected loop returned
enum SessionEnd {
    /// Transport or broker failure; reconnect
    Lost(String),
    /// Deliberate exit; close politely
    Leave(Next, Option<oneshot::Sender<()>>),
}

/// An open transport that completed the STOMP handshake
struct StompSession<T> {
    transport: T,
    heartbeat_out: Option<Duration>,
    heartbeat_in: Option<Duration>,
}

pub(super) struct Runtime<C: Connector> {
    config: SignalingConfig,
    resolver: Arc<AddressResolver>,
    connector: Arc<C>,
    commands: mpsc::UnboundedReceiver<Command>,
    shared: Arc<Shared>,
    cancel: CancellationToken,
}

impl<C: Connector> Runtime<C> {
    pub(super) fn new(
        config: SignalingConfig,
        resolver: Arc<AddressResolver>,
        connector: Arc<C>,
        commands: mpsc::UnboundedReceiver<Command>,
        shared: Arc<Shared>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            resolver,
            connector,
            commands,
            shared,
            cancel,
        }
    }

    pub(super) async fn run(mut self) {
        debug!("signaling runtime started");
        let mut next = Next::Idle;
        loop {
            next = match next {
                Next::Idle => self.idle().await,
                Next::Session(identity) => self.session(identity).await,
                Next::Shutdown => break,
            };
        }
        self.reset(ConnectionState::Disconnected);
        debug!("signaling runtime stopped");
    }

    /// Wait for a command while no session exists
    async fn idle(&mut self) -> Next {
        let command = tokio::select! {
            _ = self.cancel.cancelled() => return Next::Shutdown,
            command = self.commands.recv() => command,
        };

        match command {
            None => Next::Shutdown,
            Some(Command::Connect { identity }) => Next::Session(identity),
            Some(Command::Disconnect { done }) => {
                // Also leaves Failed and forgets the identity it kept
                self.reset(ConnectionState::Disconnected);
                let _ = done.send(());
                Next::Idle
            }
            Some(Command::Send(message)) => {
                self.shared.record_drop(message.action());
                Next::Idle
            }
            Some(Command::Subscribe(_)) | Some(Command::Unsubscribe(_)) => {
                self.shared.record_drop(Action::Subscribe);
                Next::Idle
            }
        }
    }

    /// Resolve, connect and keep reconnecting until told otherwise
    async fn session(&mut self, identity: String) -> Next {
        info!(%identity, "starting signaling session");
        self.shared.subscriptions().clear();
        self.shared.set_identity(Some(identity.clone()));
        self.shared.set_state(ConnectionState::Connecting);

        let resolver = Arc::clone(&self.resolver);
        let address = match self
            .wait(async move { resolver.resolve().await }, &identity)
            .await
        {
            Phase::Done(address) => address,
            Phase::Interrupted(next) => return next,
        };
        let url = address.ws_endpoint;

        let mut failures: u32 = 0;
        loop {
            let attempt = open_session(Arc::clone(&self.connector), url.clone(), self.config.clone());
            match self.wait(attempt, &identity).await {
                Phase::Interrupted(next) => return next,
                Phase::Done(Ok(mut session)) => {
                    failures = 0;
                    match self.connected(&mut session, &identity).await {
                        SessionEnd::Leave(next, done) => {
                            close_politely(&mut session).await;
                            self.reset(ConnectionState::Disconnected);
                            if let Some(done) = done {
                                let _ = done.send(());
                            }
                            return next;
                        }
                        SessionEnd::Lost(reason) => {
                            warn!(%identity, %reason, "broker connection lost");
                            let _ = session.transport.close().await;
                        }
                    }
                }
                Phase::Done(Err(e)) => {
                    failures += 1;
                    warn!(%identity, error = %e, attempt = failures, "broker connect failed");
                }
            }

            // Subscriptions do not survive the transport
            self.shared.subscriptions().clear();

            if let Some(max) = self.config.max_reconnect_attempts {
                if failures >= max {
                    warn!(%identity, attempts = failures, "giving up on broker");
                    self.shared.set_state(ConnectionState::Failed);
                    return Next::Idle;
                }
            }

            self.shared.set_state(ConnectionState::Reconnecting);
            let backoff = sleep(self.config.reconnect_interval());
            if let Phase::Interrupted(next) = self.wait(backoff, &identity).await {
                return next;
            }
        }
    }

    /// Drive `future` while servicing commands that can arrive meanwhile
    async fn wait<F: Future>(&mut self, future: F, identity: &str) -> Phase<F::Output> {
        tokio::pin!(future);
        loop {
            let command = tokio::select! {
                output = &mut future => return Phase::Done(output),
                _ = self.cancel.cancelled() => return Phase::Interrupted(Next::Shutdown),
                command = self.commands.recv() => command,
            };

            match command {
                None => return Phase::Interrupted(Next::Shutdown),
                Some(Command::Connect { identity: requested }) if requested == identity => {
                    debug!(%identity, "connect ignored, session already in progress");
                }
                Some(Command::Connect { identity: requested }) => {
                    self.reset(ConnectionState::Disconnected);
                    return Phase::Interrupted(Next::Session(requested));
                }
                Some(Command::Disconnect { done }) => {
                    self.reset(ConnectionState::Disconnected);
                    let _ = done.send(());
                    return Phase::Interrupted(Next::Idle);
                }
                Some(Command::Send(message)) => self.shared.record_drop(message.action()),
                Some(Command::Subscribe(_)) | Some(Command::Unsubscribe(_)) => {
                    self.shared.record_drop(Action::Subscribe)
                }
            }
        }
    }

    async fn connected(
        &mut self,
        session: &mut StompSession<C::Transport>,
        identity: &str,
    ) -> SessionEnd {
        if let Err(e) = self.subscribe(session, Topic::User(identity.to_string())).await {
            return SessionEnd::Lost(e.to_string());
        }
        self.shared.set_state(ConnectionState::Connected);

        let mut heartbeat = session.heartbeat_out.map(|period| {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });
        // Allow the broker twice its period before declaring it dead
        let silence_limit = session.heartbeat_in.map(|period| period * 2);
        let mut last_seen = Instant::now();

        loop {
            let silence_deadline = silence_limit.map(|limit| last_seen + limit);

            tokio::select! {
                _ = self.cancel.cancelled() => return SessionEnd::Leave(Next::Shutdown, None),

                command = self.commands.recv() => match command {
                    None => return SessionEnd::Leave(Next::Shutdown, None),
                    Some(Command::Connect { identity: requested }) if requested == identity => {
                        debug!(%identity, "connect ignored, already connected");
                    }
                    Some(Command::Connect { identity: requested }) => {
                        return SessionEnd::Leave(Next::Session(requested), None);
                    }
                    Some(Command::Disconnect { done }) => {
                        return SessionEnd::Leave(Next::Idle, Some(done));
                    }
                    Some(Command::Send(message)) => {
                        let action = message.action();
                        let frame = match message.body() {
                            Ok(body) => Frame::send_json(message.destination(), body),
                            Err(e) => {
                                warn!(%action, error = %e, "failed to encode action");
                                continue;
                            }
                        };
                        if let Err(e) = session.transport.send(frame.encode()).await {
                            return SessionEnd::Lost(e.to_string());
                        }
                        debug!(%action, "sent");
                    }
                    Some(Command::Subscribe(topic)) => {
                        if let Err(e) = self.subscribe(session, topic).await {
                            return SessionEnd::Lost(e.to_string());
                        }
                    }
                    Some(Command::Unsubscribe(topic)) => {
                        let id = self.shared.subscriptions().unsubscribe(&topic);
                        if let Some(id) = id {
                            if let Err(e) = session.transport.send(Frame::unsubscribe(&id).encode()).await {
                                return SessionEnd::Lost(e.to_string());
                            }
                            debug!(%topic, "unsubscribed");
                        }
                    }
                },

                incoming = session.transport.recv() => match incoming {
                    None => return SessionEnd::Lost("closed by broker".to_string()),
                    Some(Err(SdkError::InvalidResponse(error))) => {
                        last_seen = Instant::now();
                        warn!(%error, "unreadable message from broker");
                        self.shared.emit(ClientEvent::Malformed { topic: None, error });
                    }
                    Some(Err(e)) => return SessionEnd::Lost(e.to_string()),
                    Some(Ok(text)) => {
                        last_seen = Instant::now();
                        for decoded in stomp::decode_each(&text) {
                            match decoded {
                                Ok(frame) => {
                                    if let Err(reason) = self.handle_frame(frame) {
                                        return SessionEnd::Lost(reason);
                                    }
                                }
                                Err(e) => {
                                    warn!(error = %e, "undecodable frame from broker");
                                    self.shared.emit(ClientEvent::Malformed {
                                        topic: None,
                                        error: e.to_string(),
                                    });
                                }
                            }
                        }
                    }
                },

                _ = tick(&mut heartbeat) => {
                    if let Err(e) = session.transport.send(HEARTBEAT_EOL.to_string()).await {
                        return SessionEnd::Lost(e.to_string());
                    }
                }

                _ = sleep_until(silence_deadline.unwrap_or_else(Instant::now)), if silence_deadline.is_some() => {
                    return SessionEnd::Lost("broker heart-beat timed out".to_string());
                }
            }
        }
    }

    /// Subscribe `topic`, retiring any previous subscription to it
    async fn subscribe(
        &self,
        session: &mut StompSession<C::Transport>,
        topic: Topic,
    ) -> SdkResult<()> {
        let destination = topic.destination();
        let (id, replaced) = self.shared.subscriptions().subscribe(topic);

        if let Some(old) = replaced {
            session.transport.send(Frame::unsubscribe(&old).encode()).await?;
        }
        session
            .transport
            .send(Frame::subscribe(&id, &destination).encode())
            .await?;
        debug!(%destination, %id, "subscribed");
        Ok(())
    }

    /// Handle one inbound frame; `Err` ends the session
    fn handle_frame(&self, frame: Frame) -> Result<(), String> {
        match frame.command {
            StompCommand::Message => {
                self.dispatch(&frame);
                Ok(())
            }
            StompCommand::Error => {
                let message = frame
                    .get("message")
                    .map(str::to_string)
                    .unwrap_or_else(|| frame.body.clone());
                warn!(%message, "broker error frame");
                self.shared.emit(ClientEvent::BrokerError {
                    message: message.clone(),
                });
                Err(format!("broker error: {}", message))
            }
            StompCommand::Receipt => {
                debug!(receipt = ?frame.get("receipt-id"), "receipt");
                Ok(())
            }
            other => {
                debug!(command = %other, "ignoring frame");
                Ok(())
            }
        }
    }

    fn dispatch(&self, frame: &Frame) {
        let topic = match frame.get("subscription") {
            Some(id) => self.shared.subscriptions().topic_for(id).cloned(),
            None => None,
        };
        let Some(topic) = topic else {
            // Retired or unknown subscription
            debug!(subscription = ?frame.get("subscription"), "message for inactive subscription");
            return;
        };

        match InboundEvent::decode(&topic, &frame.body) {
            Ok(InboundEvent::MatchFound(payload)) => {
                info!(match_id = %payload.match_id, opponent = %payload.opponent, "match found");
                self.shared.store_match(payload.clone());
                self.shared.emit(ClientEvent::MatchFound { topic, payload });
            }
            Ok(InboundEvent::MatchResult(payload)) => {
                info!(match_id = %payload.match_id, winner = ?payload.winner, "match result");
                self.shared.emit(ClientEvent::MatchResult { topic, payload });
            }
            Ok(InboundEvent::Notification(payload)) => {
                debug!(kind = %payload.kind, "notification");
                self.shared.emit(ClientEvent::Notification { topic, payload });
            }
            Err(e) => {
                warn!(%topic, error = %e, "malformed payload");
                self.shared.emit(ClientEvent::Malformed {
                    topic: Some(topic),
                    error: e.to_string(),
                });
            }
        }
    }

    /// Forget the session and publish `state`
    fn reset(&self, state: ConnectionState) {
        self.shared.subscriptions().clear();
        self.shared.set_identity(None);
        self.shared.set_state(state);
    }
}

/// Connect the transport and complete the STOMP handshake
async fn open_session<C: Connector>(
    connector: Arc<C>,
    url: String,
    config: SignalingConfig,
) -> SdkResult<StompSession<C::Transport>> {
    debug!(%url, "opening broker transport");
    let mut transport = connector.connect(&url).await?;

    let host = config
        .host
        .clone()
        .or_else(|| url::Url::parse(&url).ok()?.host_str().map(str::to_string))
        .unwrap_or_else(|| "/".to_string());
    let offered = (config.heartbeat_outgoing_ms, config.heartbeat_incoming_ms);
    transport
        .send(Frame::connect(&host, None, offered).encode())
        .await?;

    let connected = match tokio::time::timeout(config.handshake_timeout(), await_connected(&mut transport)).await {
        Ok(Ok(frame)) => frame,
        Ok(Err(e)) => {
            let _ = transport.close().await;
            return Err(e);
        }
        Err(_) => {
            let _ = transport.close().await;
            return Err(SdkError::Timeout);
        }
    };

    let (heartbeat_out, heartbeat_in) =
        stomp::negotiate_heartbeat(offered, connected.get("heart-beat"));
    debug!(
        version = ?connected.get("version"),
        ?heartbeat_out,
        ?heartbeat_in,
        "STOMP session established"
    );
    Ok(StompSession {
        transport,
        heartbeat_out,
        heartbeat_in,
    })
}

async fn await_connected<T: Transport>(transport: &mut T) -> SdkResult<Frame> {
    loop {
        let text = match transport.recv().await {
            None => {
                return Err(SdkError::ConnectionError(
                    "closed during STOMP handshake".to_string(),
                ))
            }
            Some(result) => result?,
        };
        for frame in stomp::decode_all(&text)? {
            match frame.command {
                StompCommand::Connected => return Ok(frame),
                StompCommand::Error => {
                    let message = frame.get("message").unwrap_or("rejected").to_string();
                    return Err(SdkError::Protocol(message));
                }
                _ => {}
            }
        }
    }
}

async fn close_politely<T: Transport>(session: &mut StompSession<T>) {
    if let Err(e) = session
        .transport
        .send(Frame::disconnect("disconnect-0").encode())
        .await
    {
        debug!(error = %e, "DISCONNECT not delivered");
    }
    let _ = session.transport.close().await;
}

async fn tick(heartbeat: &mut Option<Interval>) {
    match heartbeat {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}
