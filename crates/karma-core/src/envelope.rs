//! Envelope types exchanged over a session.

use std::{
    fmt,
    time::{SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Kind tag carried in the `type` field of every envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Heartbeat probe.
    Ping,
    /// Heartbeat answer.
    Pong,
    /// Client authentication request.
    Auth,
    /// Remote accepted the token.
    AuthSuccess,
    /// Remote rejected the token.
    AuthFailed,
    /// Remote reported a failure.
    Error,
    ChatMessage,
    ChatResponse,
    TaskUpdate,
    AvatarStatus,
    /// Human-in-the-loop request.
    HitlRequest,
    /// Human-in-the-loop response.
    HitlResponse,
    FileUpload,
    FileChunk,
    FileComplete,
}

impl MessageKind {
    /// Every kind, in wire-enum order.
    pub const ALL: [Self; 15] = [
        Self::Ping,
        Self::Pong,
        Self::Auth,
        Self::AuthSuccess,
        Self::AuthFailed,
        Self::Error,
        Self::ChatMessage,
        Self::ChatResponse,
        Self::TaskUpdate,
        Self::AvatarStatus,
        Self::HitlRequest,
        Self::HitlResponse,
        Self::FileUpload,
        Self::FileChunk,
        Self::FileComplete,
    ];

    /// Wire name of this kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ping => "ping",
            Self::Pong => "pong",
            Self::Auth => "auth",
            Self::AuthSuccess => "auth_success",
            Self::AuthFailed => "auth_failed",
            Self::Error => "error",
            Self::ChatMessage => "chat_message",
            Self::ChatResponse => "chat_response",
            Self::TaskUpdate => "task_update",
            Self::AvatarStatus => "avatar_status",
            Self::HitlRequest => "hitl_request",
            Self::HitlResponse => "hitl_response",
            Self::FileUpload => "file_upload",
            Self::FileChunk => "file_chunk",
            Self::FileComplete => "file_complete",
        }
    }

    /// Control kinds are consumed by the session itself.
    #[must_use]
    pub const fn is_control(self) -> bool {
        matches!(
            self,
            Self::Ping | Self::Pong | Self::Auth | Self::AuthSuccess | Self::AuthFailed | Self::Error
        )
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single message unit on the wire.
///
/// Envelopes are transient: built, sent or received, then dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Time+random composite identifier.
    pub id: String,
    /// Kind tag.
    #[serde(rename = "type")]
    pub kind: MessageKind,
    /// Opaque payload.
    #[serde(default)]
    pub payload: Value,
    /// Creation time in milliseconds since the Unix epoch.
    pub timestamp: u64,
    /// Session identifier, once the remote has issued one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl Envelope {
    /// Create an envelope with a fresh id and the current timestamp.
    #[must_use]
    pub fn new(kind: MessageKind, payload: Value, session_id: Option<String>) -> Self {
        let timestamp = now_millis();
        Self {
            id: generate_id(timestamp),
            kind,
            payload,
            timestamp,
            session_id,
        }
    }

    /// Heartbeat probe with no payload.
    #[must_use]
    pub fn ping(session_id: Option<String>) -> Self {
        Self::new(MessageKind::Ping, Value::Null, session_id)
    }

    /// Decode the payload into a typed structure.
    ///
    /// # Errors
    /// Returns error if the payload does not match `T`.
    pub fn payload_as<T>(&self) -> Result<T, serde_json::Error>
    where
        T: for<'de> Deserialize<'de>,
    {
        T::deserialize(&self.payload)
    }
}

/// Milliseconds since the Unix epoch.
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

fn generate_id(timestamp: u64) -> String {
    let random = Uuid::new_v4().simple().to_string();
    format!("{timestamp}-{}", &random[..9])
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_kind_wire_names_match_serde() {
        for kind in MessageKind::ALL {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
        }
    }

    #[test]
    fn test_envelope_shape() {
        let env = Envelope::new(
            MessageKind::ChatMessage,
            json!({ "content": "hi" }),
            Some("s1".to_string()),
        );
        let value = serde_json::to_value(&env).unwrap();
        assert_eq!(value["type"], "chat_message");
        assert_eq!(value["sessionId"], "s1");
        assert_eq!(value["payload"]["content"], "hi");
        assert!(value["timestamp"].as_u64().unwrap() > 0);
    }

    #[test]
    fn test_session_id_omitted_when_unknown() {
        let env = Envelope::ping(None);
        let json = serde_json::to_string(&env).unwrap();
        assert!(!json.contains("sessionId"));
        assert!(json.contains("\"payload\":null"));
    }

    #[test]
    fn test_ids_are_time_prefixed_and_unique() {
        let a = Envelope::ping(None);
        let b = Envelope::ping(None);
        assert_ne!(a.id, b.id);
        let (prefix, suffix) = a.id.split_once('-').unwrap();
        assert_eq!(prefix, a.timestamp.to_string());
        assert_eq!(suffix.len(), 9);
    }

    #[test]
    fn test_control_kinds() {
        assert!(MessageKind::Pong.is_control());
        assert!(MessageKind::AuthFailed.is_control());
        assert!(!MessageKind::TaskUpdate.is_control());
        assert!(!MessageKind::FileChunk.is_control());
    }
}
