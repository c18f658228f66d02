//! Terminal client for a Karma realtime session.
//!
//! Run with: cargo run -p karma-cli
//!
//! Reads `KARMA_URL` (default `ws://127.0.0.1:3000/ws`) and `KARMA_TOKEN`.
//! Every input line is sent as a `chat_message`. `/status` prints the
//! session state, `/connect` reconnects by hand and `/quit` leaves.

use std::time::Duration;

use karma_core::{
    Envelope, MessageKind, SessionConfig,
    payload::{ChatMessagePayload, ChatResponsePayload},
};
use karma_session::{ChannelEvents, SessionClient, SessionEvent, SessionState};
use karma_transport::WsConnector;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::mpsc::UnboundedReceiver,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_URL: &str = "ws://127.0.0.1:3000/ws";

/// How long `/quit` waits for the close handshake.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so they don't interleave with the conversation
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let url = std::env::var("KARMA_URL").unwrap_or_else(|_| DEFAULT_URL.to_string());
    tracing::info!(%url, "starting session");
    let mut config = SessionConfig::new(url);
    if let Ok(token) = std::env::var("KARMA_TOKEN") {
        config = config.with_token(token);
    }

    let (events, mut event_rx) = ChannelEvents::new();
    let client = SessionClient::new(config, WsConnector::new(), events);
    client.connect();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            Some(event) = event_rx.recv() => print_event(&event),
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let line = line.trim();
                match line {
                    "" => {}
                    "/quit" => break,
                    "/status" => println!(
                        "state: {}, session: {}, reconnect attempts: {}",
                        client.state(),
                        client.session_id().as_deref().unwrap_or("-"),
                        client.reconnect_attempts()
                    ),
                    "/connect" => client.connect(),
                    content => {
                        let chat = ChatMessagePayload {
                            conversation_id: None,
                            content: content.to_string(),
                            avatar_id: None,
                        };
                        if let Err(e) = client.send_payload(MessageKind::ChatMessage, &chat) {
                            println!("! {e}");
                        }
                    }
                }
            }
        }
    }

    shutdown(&client, &mut event_rx).await;
    Ok(())
}

/// Disconnect and wait for the session to confirm the close, so the close
/// frame is written before the runtime stops.
///
/// Returns false if the confirmation did not arrive in time.
async fn shutdown(client: &SessionClient, events: &mut UnboundedReceiver<SessionEvent>) -> bool {
    // Only an open or opening transport reports a disconnect
    let active = matches!(
        client.state(),
        SessionState::Connected | SessionState::Connecting
    );
    client.disconnect();
    if !active {
        return true;
    }

    let confirmed = tokio::time::timeout(SHUTDOWN_TIMEOUT, async {
        while let Some(event) = events.recv().await {
            print_event(&event);
            if matches!(event, SessionEvent::Disconnected(_)) {
                return true;
            }
        }
        false
    })
    .await
    .unwrap_or(false);

    if !confirmed {
        tracing::warn!("session did not confirm disconnect");
    }
    confirmed
}

fn print_event(event: &SessionEvent) {
    tracing::debug!(?event, "session event");
    match event {
        SessionEvent::Connected => println!("* connected"),
        SessionEvent::Disconnected(reason) => println!("* disconnected: {reason}"),
        SessionEvent::Reconnecting(attempt) => println!("* reconnecting (attempt {attempt})"),
        SessionEvent::Reconnected => println!("* reconnected"),
        SessionEvent::AuthSuccess(id) => println!("* authenticated as {id}"),
        SessionEvent::AuthFailed(error) => println!("* authentication failed: {error}"),
        SessionEvent::Error(error) => println!("! {error}"),
        SessionEvent::Message(envelope) => print_message(envelope),
    }
}

fn print_message(envelope: &Envelope) {
    if envelope.kind == MessageKind::ChatResponse {
        if let Ok(chat) = envelope.payload_as::<ChatResponsePayload>() {
            println!("< {}", chat.content);
            return;
        }
    }
    println!("< [{}] {}", envelope.kind, envelope.payload);
}

#[cfg(test)]
mod tests {
    use karma_transport::{MemoryConnector, NORMAL_CLOSURE, Outbound};

    use super::*;

    #[tokio::test]
    async fn test_shutdown_waits_for_clean_close() {
        let (connector, mut acceptor) = MemoryConnector::new();
        let (events, mut rx) = ChannelEvents::new();
        let client = SessionClient::new(SessionConfig::new("mem://cli"), connector, events);
        client.connect();
        let mut peer = acceptor.accept().await.unwrap();
        assert_eq!(rx.recv().await, Some(SessionEvent::Connected));

        assert!(shutdown(&client, &mut rx).await);
        assert_eq!(client.state(), SessionState::Disconnected);
        assert!(matches!(
            peer.recv().await,
            Some(Outbound::Close { code: NORMAL_CLOSURE, .. })
        ));
    }

    #[tokio::test]
    async fn test_shutdown_of_idle_session_returns_at_once() {
        let (connector, _acceptor) = MemoryConnector::new();
        let (events, mut rx) = ChannelEvents::new();
        let client = SessionClient::new(SessionConfig::new("mem://cli"), connector, events);
        assert!(shutdown(&client, &mut rx).await);
        assert_eq!(client.state(), SessionState::Disconnected);
    }
}
