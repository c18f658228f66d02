//! Realtime endpoint and streaming chat relay for the Karma dashboard.
//!
//! Provides:
//! - `/ws` - WebSocket endpoint for the envelope protocol
//! - `/api/chat/stream` - SSE passthrough of chat-completion deltas
//! - `/health` - Liveness probe

pub mod config;
pub mod relay;
pub mod sse;
pub mod ws;

use std::sync::Arc;

use axum::{
    Json, Router,
    routing::{get, post},
};
use serde_json::{Value, json};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub use config::ServerConfig;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub http: reqwest::Client,
}

impl AppState {
    #[must_use]
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config: Arc::new(config),
            http: reqwest::Client::new(),
        }
    }
}

/// Build the application router.
#[must_use]
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws", get(ws::ws_handler))
        .route("/api/chat/stream", post(relay::chat_stream))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

#[cfg(test)]
mod tests {
    use axum::{
        body::{Body, to_bytes},
        http::{Request, StatusCode, header::CONTENT_TYPE},
        response::IntoResponse,
    };
    use tower::ServiceExt;

    use super::*;

    fn post_chat(body: &Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/chat/stream")
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_text(response: axum::response::Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    /// Serve a canned upstream that streams `body` for every completion.
    async fn fake_upstream(status: StatusCode, body: &'static str) -> String {
        let app = Router::new().route(
            "/chat/completions",
            post(move || async move {
                (status, [(CONTENT_TYPE, "text/event-stream")], body).into_response()
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn state_with(upstream_url: String, api_key: Option<&str>) -> AppState {
        AppState::new(ServerConfig {
            upstream_url,
            upstream_api_key: api_key.map(str::to_string),
            ..ServerConfig::default()
        })
    }

    #[tokio::test]
    async fn test_health() {
        let app = router(AppState::new(ServerConfig::default()));
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, r#"{"status":"ok"}"#);
    }

    #[tokio::test]
    async fn test_relay_without_key_is_unavailable() {
        let app = router(state_with("http://127.0.0.1:1".to_string(), None));
        let response = app
            .oneshot(post_chat(&json!({ "messages": [{ "role": "user", "content": "hi" }] })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_relay_rejects_empty_conversation() {
        let app = router(state_with("http://127.0.0.1:1".to_string(), Some("sk-test")));
        let response = app.oneshot(post_chat(&json!({ "messages": [] }))).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_relay_forwards_deltas_in_order() {
        let upstream = fake_upstream(
            StatusCode::OK,
            concat!(
                "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n",
                "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n",
                ": comment\n\n",
                "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n",
                "data: [DONE]\n\n",
                "data: {\"choices\":[{\"delta\":{\"content\":\"ignored\"}}]}\n\n",
            ),
        )
        .await;
        let app = router(state_with(upstream, Some("sk-test")));

        let response = app
            .oneshot(post_chat(&json!({ "messages": [{ "role": "user", "content": "hi" }] })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_text(response).await;
        let data: Vec<&str> = body
            .lines()
            .filter_map(|line| line.strip_prefix("data: "))
            .collect();
        assert_eq!(
            data,
            vec![r#"{"content":"Hel"}"#, r#"{"content":"lo"}"#, "[DONE]"]
        );
    }

    #[tokio::test]
    async fn test_upstream_failure_is_bad_gateway() {
        let upstream = fake_upstream(StatusCode::TOO_MANY_REQUESTS, "slow down").await;
        let app = router(state_with(upstream, Some("sk-test")));
        let response = app
            .oneshot(post_chat(&json!({ "messages": [{ "role": "user", "content": "hi" }] })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert!(body_text(response).await.contains("slow down"));
    }
}
