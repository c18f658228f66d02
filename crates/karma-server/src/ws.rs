//! WebSocket endpoint speaking the envelope protocol.

use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{CloseFrame, Message, WebSocket},
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use karma_core::{
    Envelope, MessageKind,
    close::{AUTH_REJECTED, close_reason},
    codec,
    payload::{AuthPayload, ChatMessagePayload, ChatResponsePayload},
};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::AppState;

/// Frame the server writes back.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Send(Envelope),
    Close { code: u16, reason: String },
}

/// Per-connection protocol state.
#[derive(Debug)]
pub struct PeerSession {
    expected_token: Option<String>,
    session_id: Option<String>,
}

impl PeerSession {
    /// Create the state for a new connection. With no expected token any
    /// `auth` is accepted.
    #[must_use]
    pub const fn new(expected_token: Option<String>) -> Self {
        Self {
            expected_token,
            session_id: None,
        }
    }

    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    fn authenticated(&self) -> bool {
        self.expected_token.is_none() || self.session_id.is_some()
    }

    fn reply(&self, kind: MessageKind, payload: Value) -> Reply {
        Reply::Send(Envelope::new(kind, payload, self.session_id.clone()))
    }

    fn error(&self, message: &str, code: &str) -> Reply {
        self.reply(
            MessageKind::Error,
            json!({ "message": message, "code": code }),
        )
    }

    /// Handle a raw text frame.
    pub fn handle_text(&mut self, text: &str) -> Vec<Reply> {
        match codec::decode(text) {
            Ok(envelope) => self.handle(&envelope),
            Err(e) => {
                tracing::warn!("Invalid client message: {e}");
                vec![self.error(&format!("Invalid message: {e}"), "invalid_message")]
            }
        }
    }

    /// Handle one decoded envelope.
    pub fn handle(&mut self, envelope: &Envelope) -> Vec<Reply> {
        match envelope.kind {
            MessageKind::Ping => vec![self.reply(MessageKind::Pong, Value::Null)],
            MessageKind::Auth => self.authenticate(envelope),
            MessageKind::Pong
            | MessageKind::AuthSuccess
            | MessageKind::AuthFailed
            | MessageKind::Error => {
                tracing::debug!(kind = %envelope.kind, "ignoring control message from client");
                Vec::new()
            }
            _ if !self.authenticated() => {
                vec![self.error("Not authenticated", "unauthenticated")]
            }
            MessageKind::ChatMessage => match envelope.payload_as::<ChatMessagePayload>() {
                Ok(chat) => {
                    let response = ChatResponsePayload {
                        conversation_id: chat.conversation_id,
                        content: chat.content,
                        done: true,
                    };
                    match serde_json::to_value(response) {
                        Ok(payload) => vec![self.reply(MessageKind::ChatResponse, payload)],
                        Err(e) => vec![self.error(&e.to_string(), "internal")],
                    }
                }
                Err(e) => vec![self.error(&format!("Invalid chat message: {e}"), "invalid_payload")],
            },
            kind => {
                tracing::debug!(%kind, id = %envelope.id, "accepted business message");
                Vec::new()
            }
        }
    }

    fn authenticate(&mut self, envelope: &Envelope) -> Vec<Reply> {
        let token = envelope.payload_as::<AuthPayload>().map(|a| a.token).ok();
        let accepted = match (&self.expected_token, &token) {
            (None, _) => true,
            (Some(expected), Some(given)) => expected == given,
            (Some(_), None) => false,
        };

        if !accepted {
            tracing::warn!("rejecting auth request");
            return vec![
                self.reply(MessageKind::AuthFailed, json!({ "error": "Invalid token" })),
                Reply::Close {
                    code: AUTH_REJECTED,
                    reason: close_reason(AUTH_REJECTED),
                },
            ];
        }

        let session_id = Uuid::new_v4().to_string();
        tracing::info!(%session_id, "client authenticated");
        self.session_id = Some(session_id.clone());
        vec![self.reply(MessageKind::AuthSuccess, json!({ "sessionId": session_id }))]
    }
}

/// WebSocket upgrade handler.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    // Channel for sending frames to the client
    let (tx, mut rx) = mpsc::unbounded_channel::<Reply>();

    let send_task = tokio::spawn(async move {
        while let Some(reply) = rx.recv().await {
            match reply {
                Reply::Send(envelope) => {
                    let json = match codec::encode(&envelope) {
                        Ok(j) => j,
                        Err(e) => {
                            tracing::error!("Failed to serialize message: {e}");
                            continue;
                        }
                    };
                    if sender.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                Reply::Close { code, reason } => {
                    let frame = CloseFrame {
                        code,
                        reason: reason.into(),
                    };
                    let _ = sender.send(Message::Close(Some(frame))).await;
                    break;
                }
            }
        }
    });

    let mut session = PeerSession::new(state.config.auth_token.clone());

    while let Some(msg) = receiver.next().await {
        let text = match msg {
            Ok(Message::Text(text)) => text.as_str().to_owned(),
            Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
                Ok(s) => s,
                Err(_) => continue,
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                tracing::error!("WebSocket error: {e}");
                break;
            }
        };

        let mut closing = false;
        for reply in session.handle_text(&text) {
            closing |= matches!(reply, Reply::Close { .. });
            let _ = tx.send(reply);
        }
        if closing {
            break;
        }
    }

    tracing::debug!(session_id = ?session.session_id(), "client connection finished");
    drop(tx);
    let _ = send_task.await;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(kind: MessageKind, payload: Value) -> Envelope {
        Envelope::new(kind, payload, None)
    }

    fn sent(reply: &Reply) -> &Envelope {
        match reply {
            Reply::Send(env) => env,
            Reply::Close { .. } => panic!("expected an envelope, got {reply:?}"),
        }
    }

    #[test]
    fn test_ping_gets_pong() {
        let mut session = PeerSession::new(None);
        let replies = session.handle(&client(MessageKind::Ping, Value::Null));
        assert_eq!(replies.len(), 1);
        assert_eq!(sent(&replies[0]).kind, MessageKind::Pong);
    }

    #[test]
    fn test_auth_with_expected_token() {
        let mut session = PeerSession::new(Some("secret".to_string()));
        let replies = session.handle(&client(MessageKind::Auth, json!({ "token": "secret" })));
        let env = sent(&replies[0]);
        assert_eq!(env.kind, MessageKind::AuthSuccess);
        assert_eq!(env.payload["sessionId"].as_str(), session.session_id());
        assert_eq!(env.session_id.as_deref(), session.session_id());
    }

    #[test]
    fn test_wrong_token_is_rejected_and_closed() {
        let mut session = PeerSession::new(Some("secret".to_string()));
        let replies = session.handle(&client(MessageKind::Auth, json!({ "token": "nope" })));
        assert_eq!(replies.len(), 2);
        assert_eq!(sent(&replies[0]).kind, MessageKind::AuthFailed);
        assert_eq!(
            replies[1],
            Reply::Close {
                code: 4001,
                reason: "Authentication rejected".to_string()
            }
        );
        assert!(session.session_id().is_none());
    }

    #[test]
    fn test_business_message_requires_auth() {
        let mut session = PeerSession::new(Some("secret".to_string()));
        let replies = session.handle(&client(MessageKind::ChatMessage, json!({ "content": "hi" })));
        let env = sent(&replies[0]);
        assert_eq!(env.kind, MessageKind::Error);
        assert_eq!(env.payload["code"], "unauthenticated");
    }

    #[test]
    fn test_chat_message_is_answered() {
        let mut session = PeerSession::new(None);
        let replies = session.handle(&client(
            MessageKind::ChatMessage,
            json!({ "conversationId": "c1", "content": "hello" }),
        ));
        let env = sent(&replies[0]);
        assert_eq!(env.kind, MessageKind::ChatResponse);
        assert_eq!(env.payload, json!({ "conversationId": "c1", "content": "hello", "done": true }));
    }

    #[test]
    fn test_malformed_frame_reports_error() {
        let mut session = PeerSession::new(None);
        let replies = session.handle_text("{oops");
        let env = sent(&replies[0]);
        assert_eq!(env.kind, MessageKind::Error);
        assert_eq!(env.payload["code"], "invalid_message");
    }

    #[test]
    fn test_other_business_kinds_are_accepted_silently() {
        let mut session = PeerSession::new(None);
        assert!(session
            .handle(&client(MessageKind::HitlResponse, json!({ "requestId": "r1", "approved": true })))
            .is_empty());
        assert!(session.handle(&client(MessageKind::Pong, Value::Null)).is_empty());
    }
}
