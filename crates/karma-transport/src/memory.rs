//! In-memory connector for driving sessions without a network.
//!
//! Every successful `open` hands the far end of the connection to the
//! paired [`MemoryAcceptor`] as a [`RemotePeer`].

use std::sync::{
    Arc,
    atomic::{AtomicU32, Ordering},
};

use async_trait::async_trait;
use karma_core::{Envelope, codec};
use tokio::sync::mpsc;

use crate::connection::{Connection, Connector, Outbound, TransportError, TransportEvent};

#[derive(Default)]
struct Script {
    fail_next: AtomicU32,
    stall_next: AtomicU32,
    opens: AtomicU32,
}

/// Connector whose transports are channel pairs.
#[derive(Clone)]
pub struct MemoryConnector {
    peers: mpsc::UnboundedSender<RemotePeer>,
    script: Arc<Script>,
}

impl MemoryConnector {
    /// Create a connector and the acceptor receiving its peers.
    #[must_use]
    pub fn new() -> (Self, MemoryAcceptor) {
        let (peers, rx) = mpsc::unbounded_channel();
        let connector = Self {
            peers,
            script: Arc::new(Script::default()),
        };
        (connector, MemoryAcceptor { peers: rx })
    }

    /// Fail the next `n` opens with a connect error.
    pub fn fail_next(&self, n: u32) {
        self.script.fail_next.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` opens never complete.
    pub fn stall_next(&self, n: u32) {
        self.script.stall_next.store(n, Ordering::SeqCst);
    }

    /// Number of open attempts so far.
    #[must_use]
    pub fn open_count(&self) -> u32 {
        self.script.opens.load(Ordering::SeqCst)
    }
}

fn take_one(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn open(&self, url: &str) -> Result<Connection, TransportError> {
        self.script.opens.fetch_add(1, Ordering::SeqCst);

        if take_one(&self.script.fail_next) {
            return Err(TransportError::Connect(format!("refused: {url}")));
        }
        if take_one(&self.script.stall_next) {
            futures::future::pending::<()>().await;
        }

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        let peer = RemotePeer {
            url: url.to_string(),
            frames: outbound_rx,
            events: inbound_tx,
        };
        self.peers
            .send(peer)
            .map_err(|_| TransportError::Connect("acceptor dropped".to_string()))?;

        Ok(Connection::new(outbound_tx, inbound_rx))
    }
}

/// Receives the remote ends of opened connections.
pub struct MemoryAcceptor {
    peers: mpsc::UnboundedReceiver<RemotePeer>,
}

impl MemoryAcceptor {
    /// Wait for the next opened connection.
    pub async fn accept(&mut self) -> Option<RemotePeer> {
        self.peers.recv().await
    }

    /// Take an opened connection if one is ready.
    pub fn try_accept(&mut self) -> Option<RemotePeer> {
        self.peers.try_recv().ok()
    }
}

/// Remote end of an in-memory connection.
pub struct RemotePeer {
    /// URL the session opened.
    pub url: String,
    frames: mpsc::UnboundedReceiver<Outbound>,
    events: mpsc::UnboundedSender<TransportEvent>,
}

impl RemotePeer {
    /// Deliver a raw text frame to the session.
    ///
    /// # Errors
    /// Returns error if the session dropped the connection.
    pub fn send_text(&self, text: impl Into<String>) -> Result<(), TransportError> {
        self.emit(TransportEvent::Message(text.into()))
    }

    /// Deliver an envelope to the session.
    ///
    /// # Errors
    /// Returns error if encoding fails or the session dropped the connection.
    pub fn send_envelope(&self, envelope: &Envelope) -> Result<(), TransportError> {
        let text = codec::encode(envelope).map_err(|e| TransportError::Io(e.to_string()))?;
        self.send_text(text)
    }

    /// Raise a transport error on the session side.
    ///
    /// # Errors
    /// Returns error if the session dropped the connection.
    pub fn error(&self, message: impl Into<String>) -> Result<(), TransportError> {
        self.emit(TransportEvent::Error(message.into()))
    }

    /// Close the connection from the remote side.
    ///
    /// # Errors
    /// Returns error if the session dropped the connection.
    pub fn close(&self, code: u16, reason: impl Into<String>) -> Result<(), TransportError> {
        self.emit(TransportEvent::Closed {
            code,
            reason: reason.into(),
        })
    }

    /// Wait for the next frame the session wrote.
    pub async fn recv(&mut self) -> Option<Outbound> {
        self.frames.recv().await
    }

    /// Take a written frame if one is ready.
    pub fn try_recv(&mut self) -> Option<Outbound> {
        self.frames.try_recv().ok()
    }

    /// Wait for the next envelope the session wrote.
    ///
    /// Returns `None` once the session closes or drops the connection.
    pub async fn recv_envelope(&mut self) -> Option<Envelope> {
        loop {
            match self.frames.recv().await? {
                Outbound::Text(text) => match codec::decode(&text) {
                    Ok(env) => return Some(env),
                    Err(e) => tracing::warn!("Peer received invalid frame: {e}"),
                },
                Outbound::Close { .. } => return None,
            }
        }
    }

    /// True once the session has dropped its end.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.events.is_closed()
    }

    fn emit(&self, event: TransportEvent) -> Result<(), TransportError> {
        self.events.send(event).map_err(|_| TransportError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use karma_core::MessageKind;
    use tokio_test::{assert_err, assert_ok};

    use super::*;

    #[tokio::test]
    async fn test_open_hands_peer_to_acceptor() {
        let (connector, mut acceptor) = MemoryConnector::new();
        let mut conn = assert_ok!(connector.open("mem://a").await);
        let mut peer = acceptor.accept().await.unwrap();
        assert_eq!(peer.url, "mem://a");

        conn.outbound.send(Outbound::Text("hello".to_string())).unwrap();
        assert_eq!(peer.recv().await, Some(Outbound::Text("hello".to_string())));

        assert_ok!(peer.send_envelope(&Envelope::ping(None)));
        match conn.inbound.recv().await {
            Some(TransportEvent::Message(text)) => {
                assert_eq!(codec::decode(&text).unwrap().kind, MessageKind::Ping);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_scripted_failures() {
        let (connector, mut acceptor) = MemoryConnector::new();
        connector.fail_next(2);
        assert_err!(connector.open("mem://a").await);
        assert_err!(connector.open("mem://a").await);
        assert_ok!(connector.open("mem://a").await);
        assert_eq!(connector.open_count(), 3);
        assert!(acceptor.try_accept().is_some());
        assert!(acceptor.try_accept().is_none());
    }

    #[tokio::test]
    async fn test_peer_sees_dropped_session() {
        let (connector, mut acceptor) = MemoryConnector::new();
        let conn = assert_ok!(connector.open("mem://a").await);
        let peer = acceptor.accept().await.unwrap();
        drop(conn);
        assert!(peer.is_closed());
        assert_eq!(peer.send_text("late"), Err(TransportError::Closed));
    }
}
