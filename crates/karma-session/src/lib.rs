//! Reconnecting session client for the Karma realtime endpoint.
//!
//! Provides:
//! - `SessionClient` - Connection lifecycle, auth handshake and dispatch
//! - `SessionEvents` - Callback surface for the surrounding application
//! - `HandlerRegistry` - Per-kind message handlers
//! - Reconnect policy and heartbeat timer
//! - Chunked file transfer

pub mod client;
pub mod dispatch;
mod driver;
pub mod events;
pub mod heartbeat;
pub mod reconnect;
pub mod transfer;

pub use client::SessionClient;
pub use dispatch::{HandlerId, HandlerRegistry, MessageHandler};
pub use events::{
    ChannelEvents, NoopEvents, SessionError, SessionEvent, SessionEvents, SessionState,
};
pub use reconnect::{ReconnectDecision, ReconnectPolicy};
pub use transfer::send_file;
