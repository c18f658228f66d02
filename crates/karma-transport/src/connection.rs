//! Connector trait and the channel pair a live connection is made of.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

pub use karma_core::close::{
    ABNORMAL_CLOSURE, AUTH_REJECTED, GOING_AWAY, HEARTBEAT_TIMEOUT, NO_STATUS, NORMAL_CLOSURE,
    close_reason,
};

/// Frame written by the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Text frame.
    Text(String),
    /// Close the transport.
    Close { code: u16, reason: String },
}

/// Event raised by an open transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Incoming text frame.
    Message(String),
    /// Transport-level error. The close that follows drives state.
    Error(String),
    /// Transport closed.
    Closed { code: u16, reason: String },
}

/// An open transport: a writer half and an event stream.
///
/// Dropping `outbound` tears the transport down; an `inbound` channel that
/// ends without a `Closed` event is an abnormal closure.
#[derive(Debug)]
pub struct Connection {
    pub outbound: mpsc::UnboundedSender<Outbound>,
    pub inbound: mpsc::UnboundedReceiver<TransportEvent>,
}

impl Connection {
    /// Create a connection from its two halves.
    #[must_use]
    pub const fn new(
        outbound: mpsc::UnboundedSender<Outbound>,
        inbound: mpsc::UnboundedReceiver<TransportEvent>,
    ) -> Self {
        Self { outbound, inbound }
    }
}

/// Transport error.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    Connect(String),
    #[error("Connection timed out after {0} ms")]
    Timeout(u64),
    #[error("Transport error: {0}")]
    Io(String),
    #[error("Transport closed")]
    Closed,
}

/// Opens transports for a session.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open a transport to `url`.
    async fn open(&self, url: &str) -> Result<Connection, TransportError>;
}
