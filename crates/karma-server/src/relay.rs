//! Streaming chat relay: forwards token deltas from an OpenAI-compatible
//! chat-completion API as server-sent events.

use std::convert::Infallible;

use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::{AppState, sse::SseDecoder};

/// Terminal marker, upstream and downstream.
pub const DONE: &str = "[DONE]";

/// One conversation turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: String,
    pub content: String,
}

/// Relay request body.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatStreamRequest {
    pub messages: Vec<ChatTurn>,
    #[serde(default)]
    pub model: Option<String>,
}

/// Relay error.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Chat API key is not configured")]
    MissingApiKey,
    #[error("Conversation is empty")]
    EmptyConversation,
    #[error("Upstream request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Upstream returned {status}: {body}")]
    Upstream { status: u16, body: String },
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::MissingApiKey => StatusCode::SERVICE_UNAVAILABLE,
            Self::EmptyConversation => StatusCode::BAD_REQUEST,
            Self::Request(_) | Self::Upstream { .. } => StatusCode::BAD_GATEWAY,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// What one upstream event contributes to the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delta {
    Content(String),
    Done,
    Skip,
}

/// Interpret the `data` of one upstream event.
#[must_use]
pub fn parse_delta(data: &str) -> Delta {
    if data.trim() == DONE {
        return Delta::Done;
    }
    let Ok(value) = serde_json::from_str::<Value>(data) else {
        tracing::debug!("skipping non-JSON upstream event");
        return Delta::Skip;
    };
    value
        .pointer("/choices/0/delta/content")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map_or(Delta::Skip, |s| Delta::Content(s.to_string()))
}

/// `POST /api/chat/stream`
///
/// # Errors
/// Returns an error response if the relay is not configured, the request is
/// empty, or the upstream rejects it.
pub async fn chat_stream(
    State(state): State<AppState>,
    Json(request): Json<ChatStreamRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, RelayError> {
    let api_key = state
        .config
        .upstream_api_key
        .clone()
        .ok_or(RelayError::MissingApiKey)?;
    if request.messages.is_empty() {
        return Err(RelayError::EmptyConversation);
    }

    let model = request
        .model
        .unwrap_or_else(|| state.config.default_model.clone());
    let url = format!(
        "{}/chat/completions",
        state.config.upstream_url.trim_end_matches('/')
    );
    tracing::info!(%model, turns = request.messages.len(), "relaying chat stream");

    let response = state
        .http
        .post(&url)
        .bearer_auth(api_key)
        .json(&json!({
            "model": model,
            "messages": request.messages,
            "stream": true,
        }))
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        tracing::warn!(status = status.as_u16(), "upstream rejected chat request");
        return Err(RelayError::Upstream {
            status: status.as_u16(),
            body,
        });
    }

    let (tx, rx) = mpsc::channel::<Event>(64);
    tokio::spawn(async move {
        let mut upstream = response.bytes_stream();
        let mut decoder = SseDecoder::new();
        let mut forwarded = 0usize;

        let mut done = false;

        while !done {
            let events = match upstream.next().await {
                Some(Ok(chunk)) => decoder.push(&chunk),
                Some(Err(e)) => {
                    tracing::warn!("upstream stream failed: {e}");
                    let error = json!({ "error": e.to_string() }).to_string();
                    let _ = tx.send(Event::default().event("error").data(error)).await;
                    break;
                }
                None => {
                    done = true;
                    decoder.finish().into_iter().collect()
                }
            };
            for data in events {
                match parse_delta(&data) {
                    Delta::Content(content) => {
                        let event = Event::default().data(json!({ "content": content }).to_string());
                        if tx.send(event).await.is_err() {
                            tracing::debug!("client left the chat stream");
                            return;
                        }
                        forwarded += 1;
                    }
                    Delta::Done => {
                        done = true;
                        break;
                    }
                    Delta::Skip => {}
                }
            }
        }

        tracing::debug!(forwarded, "chat stream finished");
        let _ = tx.send(Event::default().data(DONE)).await;
    });

    let stream = ReceiverStream::new(rx).map(Ok::<_, Infallible>);
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
