//! Typed payloads for the envelope kinds.
//!
//! The envelope payload is opaque on the wire; these structs are the
//! shapes the dashboard and server agree on.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use serde::{Deserialize, Serialize};

/// `auth` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthPayload {
    pub token: String,
}

/// `auth_success` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthSuccessPayload {
    pub session_id: String,
}

/// `auth_failed` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthFailedPayload {
    #[serde(default)]
    pub error: String,
}

/// `error` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

/// `chat_message` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessagePayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_id: Option<String>,
}

/// `chat_response` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponsePayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    pub content: String,
    #[serde(default)]
    pub done: bool,
}

/// `task_update` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskUpdatePayload {
    pub task_id: String,
    pub status: String,
    /// Completion in the 0..=100 range.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
}

/// `avatar_status` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvatarStatusPayload {
    pub avatar_id: String,
    pub status: String,
}

/// `hitl_request` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HitlRequestPayload {
    pub request_id: String,
    pub prompt: String,
    #[serde(default)]
    pub options: Vec<String>,
}

/// `hitl_response` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HitlResponsePayload {
    pub request_id: String,
    pub approved: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
}

/// `file_upload` payload, announcing a chunked transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileUploadPayload {
    pub file_id: String,
    pub name: String,
    pub size: u64,
    pub chunks: u32,
}

/// `file_chunk` payload (base64 encoded data).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileChunkPayload {
    pub file_id: String,
    pub index: u32,
    pub data: String,
}

impl FileChunkPayload {
    /// Create a chunk from raw bytes.
    #[must_use]
    pub fn new(file_id: impl Into<String>, index: u32, data: &[u8]) -> Self {
        Self {
            file_id: file_id.into(),
            index,
            data: BASE64.encode(data),
        }
    }

    /// Decode chunk data from base64.
    #[must_use]
    pub fn decode_data(&self) -> Option<Vec<u8>> {
        BASE64.decode(&self.data).ok()
    }
}

/// `file_complete` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileCompletePayload {
    pub file_id: String,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_chunk_data_survives_encoding() {
        let chunk = FileChunkPayload::new("f1", 0, b"\x00\x01binary\xff");
        assert_eq!(chunk.decode_data().unwrap(), b"\x00\x01binary\xff");
    }

    #[test]
    fn test_invalid_chunk_data() {
        let chunk = FileChunkPayload {
            file_id: "f1".to_string(),
            index: 3,
            data: "not base64!!".to_string(),
        };
        assert!(chunk.decode_data().is_none());
    }

    #[test]
    fn test_camel_case_fields() {
        let value = serde_json::to_value(HitlResponsePayload {
            request_id: "r1".to_string(),
            approved: true,
            response: None,
        })
        .unwrap();
        assert_eq!(value, json!({ "requestId": "r1", "approved": true }));

        let parsed: AuthSuccessPayload =
            serde_json::from_value(json!({ "sessionId": "s1" })).unwrap();
        assert_eq!(parsed.session_id, "s1");
    }

    #[test]
    fn test_auth_failed_tolerates_missing_error() {
        let parsed: AuthFailedPayload = serde_json::from_value(json!({})).unwrap();
        assert!(parsed.error.is_empty());
    }
}
