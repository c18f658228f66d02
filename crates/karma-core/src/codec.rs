//! JSON text codec for envelopes.

use thiserror::Error;

use crate::Envelope;

/// Codec error.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Failed to encode envelope: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("Malformed envelope: {0}")]
    Decode(#[source] serde_json::Error),
}

/// Serialize an envelope into a text frame.
///
/// # Errors
/// Returns error if the payload cannot be serialized.
pub fn encode(envelope: &Envelope) -> Result<String, CodecError> {
    serde_json::to_string(envelope).map_err(CodecError::Encode)
}

/// Parse a text frame into an envelope.
///
/// Unknown `type` values are rejected like any other malformed frame.
///
/// # Errors
/// Returns error if the text is not a valid envelope.
pub fn decode(text: &str) -> Result<Envelope, CodecError> {
    serde_json::from_str(text).map_err(|e| {
        tracing::trace!(len = text.len(), "rejecting malformed frame");
        CodecError::Decode(e)
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tokio_test::{assert_err, assert_ok};

    use super::*;
    use crate::MessageKind;

    #[test]
    fn test_decode_wire_frame() {
        let env = assert_ok!(decode(
            r#"{"id":"1-a","type":"auth_success","payload":{"sessionId":"s1"},"timestamp":5,"sessionId":"s1"}"#
        ));
        assert_eq!(env.kind, MessageKind::AuthSuccess);
        assert_eq!(env.session_id.as_deref(), Some("s1"));
        assert_eq!(env.payload, json!({ "sessionId": "s1" }));
    }

    #[test]
    fn test_missing_payload_defaults_to_null() {
        let env = assert_ok!(decode(r#"{"id":"x","type":"pong","timestamp":1}"#));
        assert!(env.payload.is_null());
        assert!(env.session_id.is_none());
    }

    #[test]
    fn test_malformed_frames() {
        assert_err!(decode("not json"));
        assert_err!(decode(r#"{"id":"x","type":"teleport","timestamp":1}"#));
        assert_err!(decode(r#"{"type":"ping"}"#));
    }

    #[test]
    fn test_encode_then_decode_preserves_envelope() {
        let env = crate::Envelope::new(MessageKind::TaskUpdate, json!({ "taskId": "t1" }), None);
        let text = assert_ok!(encode(&env));
        assert_eq!(assert_ok!(decode(&text)), env);
    }
}
