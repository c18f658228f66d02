//! Public session handle.

use std::sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicBool, AtomicU32, Ordering},
};

use karma_core::{Envelope, MessageKind, SessionConfig, codec};
use karma_transport::{Connector, NORMAL_CLOSURE, Outbound};
use serde::Serialize;
use serde_json::Value;
use tokio::{
    sync::{broadcast, mpsc},
    task::JoinHandle,
};

use crate::{
    dispatch::{HandlerId, HandlerRegistry},
    driver::{CLIENT_DISCONNECT, Command, Driver},
    events::{SessionError, SessionEvents, SessionState},
};

/// Buffered transitions per state subscriber.
const STATE_CHANNEL_CAPACITY: usize = 64;

/// State visible to both the handle and the session task.
pub(crate) struct Shared {
    state: Mutex<SessionState>,
    transitions: broadcast::Sender<SessionState>,
    session_id: Mutex<Option<String>>,
    outbound: Mutex<Option<mpsc::UnboundedSender<Outbound>>>,
    attempts: AtomicU32,
    auto_reconnect: AtomicBool,
    handlers: HandlerRegistry,
}

impl Shared {
    fn new(auto_reconnect: bool) -> Self {
        let (transitions, _) = broadcast::channel(STATE_CHANNEL_CAPACITY);
        Self {
            state: Mutex::new(SessionState::Disconnected),
            transitions,
            session_id: Mutex::new(None),
            outbound: Mutex::new(None),
            attempts: AtomicU32::new(0),
            auto_reconnect: AtomicBool::new(auto_reconnect),
            handlers: HandlerRegistry::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Set the state, publishing it to subscribers if it changed.
    pub fn replace_state(&self, state: SessionState) -> SessionState {
        let previous = std::mem::replace(
            &mut *self.state.lock().unwrap_or_else(PoisonError::into_inner),
            state,
        );
        if previous != state {
            // No subscribers is fine
            let _ = self.transitions.send(state);
        }
        previous
    }

    pub fn session_id(&self) -> Option<String> {
        self.session_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_session_id(&self, id: Option<String>) {
        *self.session_id.lock().unwrap_or_else(PoisonError::into_inner) = id;
    }

    pub fn set_outbound(&self, outbound: mpsc::UnboundedSender<Outbound>) {
        *self.outbound.lock().unwrap_or_else(PoisonError::into_inner) = Some(outbound);
    }

    pub fn take_outbound(&self) -> Option<mpsc::UnboundedSender<Outbound>> {
        self.outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Write a frame if a transport is open.
    pub fn write(&self, frame: Outbound) -> bool {
        self.outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|tx| tx.send(frame).is_ok())
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn set_attempts(&self, attempts: u32) {
        self.attempts.store(attempts, Ordering::SeqCst);
    }

    pub fn auto_reconnect(&self) -> bool {
        self.auto_reconnect.load(Ordering::SeqCst)
    }

    pub fn set_auto_reconnect(&self, enabled: bool) {
        self.auto_reconnect.store(enabled, Ordering::SeqCst);
    }

    pub const fn handlers(&self) -> &HandlerRegistry {
        &self.handlers
    }
}

/// Handle to a reconnecting session.
///
/// Creating the handle spawns the session task on the current tokio
/// runtime; dropping it closes the transport and stops the task.
pub struct SessionClient {
    shared: Arc<Shared>,
    commands: mpsc::UnboundedSender<Command>,
    _task: JoinHandle<()>,
}

impl SessionClient {
    /// Create a session. Nothing is opened until [`SessionClient::connect`].
    ///
    /// # Panics
    /// Panics if called outside a tokio runtime.
    #[must_use]
    pub fn new<C, E>(config: SessionConfig, connector: C, events: E) -> Self
    where
        C: Connector,
        E: SessionEvents,
    {
        let shared = Arc::new(Shared::new(config.auto_reconnect));
        let (commands, rx) = mpsc::unbounded_channel();
        let driver = Driver::new(
            config,
            Arc::new(connector),
            Arc::new(events),
            Arc::clone(&shared),
            rx,
        );
        let task = tokio::spawn(driver.run());
        Self {
            shared,
            commands,
            _task: task,
        }
    }

    /// Open the transport. Ignored with a warning while connected or connecting.
    pub fn connect(&self) {
        self.command(Command::Connect);
    }

    /// Close the session for good: auto-reconnect is disabled, timers are
    /// cancelled and the transport is closed with code 1000.
    ///
    /// Calling it again is a no-op.
    pub fn disconnect(&self) {
        self.shared.set_auto_reconnect(false);
        if let Some(outbound) = self.shared.take_outbound() {
            let _ = outbound.send(Outbound::Close {
                code: NORMAL_CLOSURE,
                reason: CLIENT_DISCONNECT.to_string(),
            });
        }
        self.command(Command::Disconnect);
    }

    /// Send a business message.
    ///
    /// Nothing is queued: if the session is not connected the message is
    /// dropped and an error returned.
    ///
    /// # Errors
    /// Returns `NotConnected` without an open transport, or a codec error.
    pub fn send(&self, kind: MessageKind, payload: Value) -> Result<(), SessionError> {
        let state = self.state();
        if state != SessionState::Connected {
            tracing::warn!(%kind, %state, "cannot send, session not connected");
            return Err(SessionError::NotConnected);
        }

        let envelope = Envelope::new(kind, payload, self.session_id());
        let text = codec::encode(&envelope)?;
        if !self.shared.write(Outbound::Text(text)) {
            tracing::warn!(%kind, "cannot send, transport not open");
            return Err(SessionError::NotConnected);
        }
        tracing::debug!(%kind, id = %envelope.id, "sent");
        Ok(())
    }

    /// Send a typed payload.
    ///
    /// # Errors
    /// Returns error if the payload does not serialize or the send fails.
    pub fn send_payload<T: Serialize>(&self, kind: MessageKind, payload: &T) -> Result<(), SessionError> {
        let value = serde_json::to_value(payload).map_err(SessionError::Payload)?;
        self.send(kind, value)
    }

    /// Register a handler for one envelope kind.
    pub fn on<F>(&self, kind: MessageKind, handler: F) -> HandlerId
    where
        F: Fn(&Envelope) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.shared.handlers().on(kind, handler)
    }

    /// Unregister a handler. Returns false if it was not registered.
    pub fn off(&self, kind: MessageKind, id: HandlerId) -> bool {
        self.shared.handlers().off(kind, id)
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Connected
    }

    /// Identifier issued by the remote on `auth_success`.
    #[must_use]
    pub fn session_id(&self) -> Option<String> {
        self.shared.session_id()
    }

    /// Reconnect attempts since the last successful open.
    #[must_use]
    pub fn reconnect_attempts(&self) -> u32 {
        self.shared.attempts()
    }

    /// Observe every state transition made after this call, in order.
    ///
    /// A receiver that falls more than 64 transitions behind gets
    /// `RecvError::Lagged` and skips ahead.
    #[must_use]
    pub fn subscribe_state(&self) -> broadcast::Receiver<SessionState> {
        self.shared.transitions.subscribe()
    }

    fn command(&self, command: Command) {
        if self.commands.send(command).is_err() {
            tracing::error!(?command, "session task is gone");
        }
    }
}

impl std::fmt::Debug for SessionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionClient")
            .field("state", &self.state())
            .field("session_id", &self.session_id())
            .finish_non_exhaustive()
    }
}
