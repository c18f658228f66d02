//! WebSocket connector built on tokio-tungstenite.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        Message,
        protocol::{CloseFrame, frame::coding::CloseCode},
    },
};

use crate::connection::{
    ABNORMAL_CLOSURE, Connection, Connector, NO_STATUS, Outbound, TransportError, TransportEvent,
};

/// Connector that opens `ws://` / `wss://` transports.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

impl WsConnector {
    /// Create a new WebSocket connector.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn open(&self, url: &str) -> Result<Connection, TransportError> {
        let (ws_stream, _response) = connect_async(url)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        tracing::debug!(%url, "websocket open");

        let (mut sender, mut receiver) = ws_stream.split();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Outbound>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<TransportEvent>();

        // Forward session frames to the socket
        tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                match frame {
                    Outbound::Text(text) => {
                        if let Err(e) = sender.send(Message::Text(text.into())).await {
                            tracing::warn!("WebSocket send failed: {e}");
                            break;
                        }
                    }
                    Outbound::Close { code, reason } => {
                        let frame = CloseFrame {
                            code: CloseCode::from(code),
                            reason: reason.into(),
                        };
                        let _ = sender.send(Message::Close(Some(frame))).await;
                        break;
                    }
                }
            }
            let _ = sender.close().await;
        });

        // Forward socket frames to the session
        tokio::spawn(async move {
            let closed = loop {
                let Some(msg) = receiver.next().await else {
                    break TransportEvent::Closed {
                        code: ABNORMAL_CLOSURE,
                        reason: String::new(),
                    };
                };
                let event = match msg {
                    Ok(Message::Text(text)) => TransportEvent::Message(text.as_str().to_owned()),
                    Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
                        Ok(s) => TransportEvent::Message(s),
                        Err(_) => continue,
                    },
                    Ok(Message::Close(frame)) => {
                        break frame.map_or_else(
                            || TransportEvent::Closed {
                                code: NO_STATUS,
                                reason: String::new(),
                            },
                            |f| TransportEvent::Closed {
                                code: u16::from(f.code),
                                reason: f.reason.as_str().to_owned(),
                            },
                        );
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        tracing::error!("WebSocket error: {e}");
                        let _ = inbound_tx.send(TransportEvent::Error(e.to_string()));
                        break TransportEvent::Closed {
                            code: ABNORMAL_CLOSURE,
                            reason: String::new(),
                        };
                    }
                };
                if inbound_tx.send(event).is_err() {
                    return;
                }
            };
            let _ = inbound_tx.send(closed);
        });

        Ok(Connection::new(outbound_tx, inbound_rx))
    }
}
