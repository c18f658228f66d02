//! The session task: one loop owning the connection lifecycle.
//!
//! Commands from the handle, transport events, the pending open, the
//! heartbeat and the reconnect timer are all handled here, one at a time.

use std::{pin::Pin, sync::Arc, time::Duration};

use futures::future::{BoxFuture, pending};
use karma_core::{Envelope, MessageKind, SessionConfig, codec};
use karma_transport::{
    Connection, Connector, NORMAL_CLOSURE, Outbound, TransportError, TransportEvent, close_reason,
    connection::{ABNORMAL_CLOSURE, HEARTBEAT_TIMEOUT},
};
use serde_json::{Value, json};
use tokio::{
    sync::mpsc,
    time::{Sleep, sleep},
};

use crate::{
    client::Shared,
    events::{SessionError, SessionEvents, SessionState},
    heartbeat::{Beat, Heartbeat},
    reconnect::{ReconnectDecision, ReconnectPolicy},
};

pub(crate) const CLIENT_DISCONNECT: &str = "Client disconnect";
const AUTH_REJECTED: &str = "Authentication failed";

/// Requests from the handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Command {
    Connect,
    Disconnect,
}

type PendingOpen = BoxFuture<'static, Result<Connection, TransportError>>;

pub(crate) struct Driver {
    config: SessionConfig,
    connector: Arc<dyn Connector>,
    events: Arc<dyn SessionEvents>,
    shared: Arc<Shared>,
    commands: mpsc::UnboundedReceiver<Command>,
    opening: Option<PendingOpen>,
    inbound: Option<mpsc::UnboundedReceiver<TransportEvent>>,
    heartbeat: Heartbeat,
    reconnect_timer: Option<Pin<Box<Sleep>>>,
    policy: ReconnectPolicy,
}

impl Driver {
    pub fn new(
        config: SessionConfig,
        connector: Arc<dyn Connector>,
        events: Arc<dyn SessionEvents>,
        shared: Arc<Shared>,
        commands: mpsc::UnboundedReceiver<Command>,
    ) -> Self {
        let heartbeat = Heartbeat::new(config.heartbeat_interval(), config.require_pong);
        let policy = ReconnectPolicy::new(config.reconnect_delay(), config.max_reconnect_attempts);
        Self {
            config,
            connector,
            events,
            shared,
            commands,
            opening: None,
            inbound: None,
            heartbeat,
            reconnect_timer: None,
            policy,
        }
    }

    pub async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Connect) => self.connect(),
                    Some(Command::Disconnect) => self.disconnect(CLIENT_DISCONNECT),
                    None => break,
                },
                opened = wait_open(self.opening.as_mut()) => {
                    self.opening = None;
                    match opened {
                        Ok(conn) => self.handle_open(conn),
                        Err(e) => self.handle_open_failed(e),
                    }
                }
                event = next_event(self.inbound.as_mut()) => self.handle_event(event),
                beat = self.heartbeat.tick() => self.handle_beat(beat),
                () = wait_timer(self.reconnect_timer.as_mut()) => {
                    self.reconnect_timer = None;
                    self.connect();
                }
            }
        }

        // Handle dropped
        self.cancel_timers();
        self.close_transport(NORMAL_CLOSURE, CLIENT_DISCONNECT);
        tracing::debug!("session task stopped");
    }

    fn connect(&mut self) {
        let state = self.shared.state();
        if matches!(state, SessionState::Connected | SessionState::Connecting) {
            tracing::warn!(%state, "connect ignored, session already active");
            return;
        }

        self.cancel_timers();
        self.set_state(SessionState::Connecting);
        tracing::info!(url = %self.config.url, "connecting");

        let connector = Arc::clone(&self.connector);
        let url = self.config.url.clone();
        let timeout = self.config.connect_timeout();
        self.opening = Some(Box::pin(async move {
            if timeout.is_zero() {
                return connector.open(&url).await;
            }
            tokio::time::timeout(timeout, connector.open(&url))
                .await
                .unwrap_or_else(|_| Err(TransportError::Timeout(duration_ms(timeout))))
        }));
    }

    fn disconnect(&mut self, reason: &str) {
        self.shared.set_auto_reconnect(false);
        self.cancel_timers();
        let was_opening = self.opening.take().is_some();
        let had_transport = self.inbound.take().is_some();
        self.close_transport(NORMAL_CLOSURE, reason);

        let previous = self.set_state(SessionState::Disconnected);
        if had_transport || was_opening {
            tracing::info!(%previous, reason, "disconnected");
            self.events.on_disconnected(reason);
        }
    }

    fn handle_open(&mut self, conn: Connection) {
        let retried = self.policy.attempts() > 0;
        self.policy.reset();
        self.shared.set_attempts(0);

        let Connection { outbound, inbound } = conn;
        self.shared.set_outbound(outbound);
        self.inbound = Some(inbound);
        self.set_state(SessionState::Connected);
        tracing::info!(url = %self.config.url, retried, "connected");

        if let Some(token) = self.config.token.clone() {
            self.write(MessageKind::Auth, json!({ "token": token }));
        }
        self.heartbeat.start();

        self.events.on_connected();
        if retried {
            self.events.on_reconnected();
        }
    }

    fn handle_open_failed(&mut self, error: TransportError) {
        tracing::warn!(url = %self.config.url, error = %error, "failed to open transport");
        self.events.on_error(&SessionError::Transport(error));
        if self.shared.auto_reconnect() {
            self.schedule_reconnect();
        } else {
            self.set_state(SessionState::Disconnected);
        }
    }

    fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Message(text) => self.handle_message(&text),
            TransportEvent::Error(message) => {
                tracing::error!(error = %message, "transport error");
                self.events
                    .on_error(&SessionError::Transport(TransportError::Io(message)));
            }
            TransportEvent::Closed { code, reason } => self.handle_close(code, &reason),
        }
    }

    fn handle_message(&mut self, text: &str) {
        let envelope = match codec::decode(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(error = %e, "dropping malformed message");
                return;
            }
        };

        match envelope.kind {
            MessageKind::Pong => {
                tracing::trace!("pong");
                self.heartbeat.pong();
            }
            MessageKind::AuthSuccess => {
                let session_id = payload_str(&envelope.payload, "sessionId")
                    .or_else(|| envelope.session_id.clone());
                if let Some(id) = &session_id {
                    self.shared.set_session_id(Some(id.clone()));
                } else {
                    tracing::warn!("auth_success carried no session id");
                }
                tracing::info!(session_id = ?session_id, "authenticated");
                self.events.on_auth_success(session_id.as_deref().unwrap_or_default());
            }
            MessageKind::AuthFailed => {
                let error = payload_str(&envelope.payload, "error")
                    .or_else(|| envelope.payload.as_str().map(str::to_owned))
                    .unwrap_or_else(|| AUTH_REJECTED.to_string());
                tracing::warn!(%error, "authentication rejected");
                self.events.on_auth_failed(&error);
                self.disconnect(AUTH_REJECTED);
            }
            MessageKind::Error => {
                let message = payload_str(&envelope.payload, "message")
                    .or_else(|| envelope.payload.as_str().map(str::to_owned))
                    .unwrap_or_else(|| "Unknown error".to_string());
                tracing::error!(%message, "remote reported error");
                self.events.on_error(&SessionError::Remote(message));
            }
            _ => {
                self.events.on_message(&envelope);
                self.shared.handlers().dispatch(&envelope);
            }
        }
    }

    fn handle_close(&mut self, code: u16, reason: &str) {
        self.cancel_timers();
        self.inbound = None;
        self.shared.take_outbound();
        self.set_state(SessionState::Disconnected);

        let reason = if reason.is_empty() {
            close_reason(code)
        } else {
            reason.to_string()
        };
        tracing::info!(code, %reason, "transport closed");
        self.events.on_disconnected(&reason);

        if code != NORMAL_CLOSURE && self.shared.auto_reconnect() {
            self.schedule_reconnect();
        }
    }

    fn handle_beat(&mut self, beat: Beat) {
        match beat {
            Beat::Ping => {
                tracing::trace!("ping");
                self.write(MessageKind::Ping, Value::Null);
            }
            Beat::Dead => {
                tracing::warn!("no pong since last heartbeat, dropping connection");
                let reason = close_reason(HEARTBEAT_TIMEOUT);
                self.close_transport(HEARTBEAT_TIMEOUT, &reason);
                self.handle_close(HEARTBEAT_TIMEOUT, &reason);
            }
        }
    }

    fn schedule_reconnect(&mut self) {
        self.cancel_timers();
        match self.policy.next() {
            ReconnectDecision::Retry { attempt, delay } => {
                self.shared.set_attempts(attempt);
                self.set_state(SessionState::Reconnecting);
                tracing::info!(
                    attempt,
                    max = self.config.max_reconnect_attempts,
                    delay_ms = duration_ms(delay),
                    "reconnecting"
                );
                self.events.on_reconnecting(attempt);
                self.reconnect_timer = Some(Box::pin(sleep(delay)));
            }
            ReconnectDecision::Exhausted { attempts } => {
                self.set_state(SessionState::Failed);
                tracing::error!(attempts, "max reconnect attempts reached");
                self.events
                    .on_error(&SessionError::ReconnectExhausted(attempts));
            }
        }
    }

    /// Write a control envelope on the current transport.
    fn write(&self, kind: MessageKind, payload: Value) {
        let envelope = Envelope::new(kind, payload, self.shared.session_id());
        match codec::encode(&envelope) {
            Ok(text) => {
                if !self.shared.write(Outbound::Text(text)) {
                    tracing::debug!(%kind, "transport gone, control message dropped");
                }
            }
            Err(e) => tracing::error!(%kind, error = %e, "failed to encode control message"),
        }
    }

    fn close_transport(&self, code: u16, reason: &str) {
        if let Some(outbound) = self.shared.take_outbound() {
            let _ = outbound.send(Outbound::Close {
                code,
                reason: reason.to_string(),
            });
        }
    }

    fn cancel_timers(&mut self) {
        self.heartbeat.stop();
        self.reconnect_timer = None;
    }

    fn set_state(&self, state: SessionState) -> SessionState {
        let previous = self.shared.replace_state(state);
        if previous != state {
            tracing::debug!(from = %previous, to = %state, "session state");
        }
        previous
    }
}

fn payload_str(payload: &Value, key: &str) -> Option<String> {
    payload.get(key).and_then(Value::as_str).map(str::to_owned)
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

async fn wait_open(open: Option<&mut PendingOpen>) -> Result<Connection, TransportError> {
    match open {
        Some(open) => open.await,
        None => pending().await,
    }
}

async fn next_event(inbound: Option<&mut mpsc::UnboundedReceiver<TransportEvent>>) -> TransportEvent {
    match inbound {
        Some(rx) => rx.recv().await.unwrap_or_else(|| TransportEvent::Closed {
            code: ABNORMAL_CLOSURE,
            reason: String::new(),
        }),
        None => pending().await,
    }
}

async fn wait_timer(timer: Option<&mut Pin<Box<Sleep>>>) {
    match timer {
        Some(timer) => timer.await,
        None => pending().await,
    }
}
