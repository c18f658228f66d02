//! Karma realtime server.
//!
//! Run with: cargo run -p karma-server
//!
//! Configured through `KARMA_*` environment variables.

use anyhow::Context;
use karma_server::{AppState, ServerConfig, router};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = ServerConfig::from_env()?;
    if config.auth_token.is_none() {
        tracing::warn!("KARMA_AUTH_TOKEN is not set, every auth request will be accepted");
    }
    if config.upstream_api_key.is_none() {
        tracing::warn!("KARMA_UPSTREAM_API_KEY is not set, /api/chat/stream will answer 503");
    }

    let addr = config.addr;
    let app = router(AppState::new(config));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!("Server listening on http://{addr}");
    axum::serve(listener, app).await?;

    Ok(())
}
