//! Chunked file transfer over a session.

use karma_core::{
    MessageKind,
    payload::{FileChunkPayload, FileCompletePayload, FileUploadPayload},
};
use uuid::Uuid;

use crate::{SessionClient, SessionError};

/// Chunk size used when the caller passes zero (64 KiB).
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Send `data` as `file_upload`, one `file_chunk` per chunk, then
/// `file_complete`. Returns the generated file id.
///
/// Like every send, nothing is queued: the transfer stops at the first
/// failed write.
///
/// # Errors
/// Returns error if any envelope cannot be sent.
pub fn send_file(
    client: &SessionClient,
    name: &str,
    data: &[u8],
    chunk_size: usize,
) -> Result<String, SessionError> {
    let chunk_size = if chunk_size == 0 {
        DEFAULT_CHUNK_SIZE
    } else {
        chunk_size
    };
    let file_id = Uuid::new_v4().to_string();
    let chunks = data.len().div_ceil(chunk_size);

    client.send_payload(
        MessageKind::FileUpload,
        &FileUploadPayload {
            file_id: file_id.clone(),
            name: name.to_string(),
            size: data.len() as u64,
            chunks: u32::try_from(chunks).unwrap_or(u32::MAX),
        },
    )?;

    for (index, chunk) in data.chunks(chunk_size).enumerate() {
        let index = u32::try_from(index).unwrap_or(u32::MAX);
        client.send_payload(
            MessageKind::FileChunk,
            &FileChunkPayload::new(file_id.clone(), index, chunk),
        )?;
    }

    client.send_payload(
        MessageKind::FileComplete,
        &FileCompletePayload {
            file_id: file_id.clone(),
        },
    )?;

    tracing::debug!(%file_id, name, chunks, bytes = data.len(), "file sent");
    Ok(file_id)
}

#[cfg(test)]
mod tests {
    use karma_core::SessionConfig;
    use karma_transport::MemoryConnector;
    use tokio_test::assert_err;

    use super::*;
    use crate::events::{ChannelEvents, SessionEvent};

    #[tokio::test]
    async fn test_file_is_chunked_in_order() {
        let (connector, mut acceptor) = MemoryConnector::new();
        let (events, mut rx) = ChannelEvents::new();
        let client = SessionClient::new(SessionConfig::new("mem://files"), connector, events);
        client.connect();
        let mut peer = acceptor.accept().await.unwrap();
        assert_eq!(rx.recv().await, Some(SessionEvent::Connected));

        let data: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
        let file_id = send_file(&client, "notes.bin", &data, 300).unwrap();

        let upload: FileUploadPayload = peer.recv_envelope().await.unwrap().payload_as().unwrap();
        assert_eq!(upload.file_id, file_id);
        assert_eq!(upload.size, 1000);
        assert_eq!(upload.chunks, 4);

        let mut received = Vec::new();
        for expected in 0..4 {
            let env = peer.recv_envelope().await.unwrap();
            assert_eq!(env.kind, MessageKind::FileChunk);
            let chunk: FileChunkPayload = env.payload_as().unwrap();
            assert_eq!(chunk.index, expected);
            received.extend(chunk.decode_data().unwrap());
        }
        assert_eq!(received, data);

        let complete = peer.recv_envelope().await.unwrap();
        assert_eq!(complete.kind, MessageKind::FileComplete);
        assert_eq!(complete.payload["fileId"], file_id.as_str());
    }

    #[tokio::test]
    async fn test_transfer_fails_when_disconnected() {
        let (connector, _acceptor) = MemoryConnector::new();
        let client = SessionClient::new(
            SessionConfig::new("mem://files"),
            connector,
            crate::NoopEvents,
        );
        assert_err!(send_file(&client, "a.txt", b"abc", 0));
    }
}
