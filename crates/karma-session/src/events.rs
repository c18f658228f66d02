//! Session lifecycle states, errors and the callback surface.

use std::fmt;

use karma_core::{CodecError, Envelope};
use karma_transport::TransportError;
use thiserror::Error;
use tokio::sync::mpsc;

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    /// Waiting out the reconnect delay.
    Reconnecting,
    /// Reconnect attempts exhausted.
    Failed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Failed => "failed",
        })
    }
}

/// Session error.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Session is not connected")]
    NotConnected,
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("Invalid payload: {0}")]
    Payload(#[source] serde_json::Error),
    #[error("Remote error: {0}")]
    Remote(String),
    #[error("Reconnect failed after {0} attempts")]
    ReconnectExhausted(u32),
}

/// Callbacks consumed by the surrounding application.
///
/// Every method defaults to a no-op. Callbacks run on the session task and
/// should return quickly.
pub trait SessionEvents: Send + Sync + 'static {
    fn on_connected(&self) {}

    /// Called with the close reason, or a fallback derived from the code.
    fn on_disconnected(&self, _reason: &str) {}

    /// Called for every business envelope, before kind-specific handlers.
    fn on_message(&self, _envelope: &Envelope) {}

    fn on_error(&self, _error: &SessionError) {}

    /// Called with the 1-based attempt number.
    fn on_reconnecting(&self, _attempt: u32) {}

    fn on_reconnected(&self) {}

    fn on_auth_success(&self, _session_id: &str) {}

    fn on_auth_failed(&self, _error: &str) {}
}

/// Events implementation that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEvents;

impl SessionEvents for NoopEvents {}

/// Owned copy of a callback invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Connected,
    Disconnected(String),
    Message(Envelope),
    Error(String),
    Reconnecting(u32),
    Reconnected,
    AuthSuccess(String),
    AuthFailed(String),
}

/// Events implementation that forwards every callback into a channel.
#[derive(Debug, Clone)]
pub struct ChannelEvents {
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl ChannelEvents {
    /// Create the forwarder and the receiving end.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.tx.send(event);
    }
}

impl SessionEvents for ChannelEvents {
    fn on_connected(&self) {
        self.emit(SessionEvent::Connected);
    }

    fn on_disconnected(&self, reason: &str) {
        self.emit(SessionEvent::Disconnected(reason.to_string()));
    }

    fn on_message(&self, envelope: &Envelope) {
        self.emit(SessionEvent::Message(envelope.clone()));
    }

    fn on_error(&self, error: &SessionError) {
        self.emit(SessionEvent::Error(error.to_string()));
    }

    fn on_reconnecting(&self, attempt: u32) {
        self.emit(SessionEvent::Reconnecting(attempt));
    }

    fn on_reconnected(&self) {
        self.emit(SessionEvent::Reconnected);
    }

    fn on_auth_success(&self, session_id: &str) {
        self.emit(SessionEvent::AuthSuccess(session_id.to_string()));
    }

    fn on_auth_failed(&self, error: &str) {
        self.emit(SessionEvent::AuthFailed(error.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_events_forward_error_text() {
        let (events, mut rx) = ChannelEvents::new();
        events.on_error(&SessionError::Remote("quota exceeded".to_string()));
        events.on_error(&SessionError::ReconnectExhausted(10));
        events.on_error(&SessionError::Transport(TransportError::Timeout(500)));
        events.on_auth_failed("bad token");

        assert_eq!(
            rx.try_recv().unwrap(),
            SessionEvent::Error("Remote error: quota exceeded".to_string())
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            SessionEvent::Error("Reconnect failed after 10 attempts".to_string())
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            SessionEvent::Error("Connection timed out after 500 ms".to_string())
        );
        // Rejection is reported through its own callback, not as an error
        assert_eq!(
            rx.try_recv().unwrap(),
            SessionEvent::AuthFailed("bad token".to_string())
        );
        assert!(rx.try_recv().is_err());
    }
}
