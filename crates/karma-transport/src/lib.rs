//! Transport layer for Karma sessions.
//!
//! Provides:
//! - `Connector` seam and the `Connection` channel pair
//! - WebSocket connector (feature: websocket)
//! - In-memory connector for tests and embedding (feature: memory)

pub mod connection;

#[cfg(feature = "websocket")]
pub mod websocket;

#[cfg(feature = "memory")]
pub mod memory;

pub use connection::{
    Connection, Connector, NORMAL_CLOSURE, Outbound, TransportError, TransportEvent, close_reason,
};

#[cfg(feature = "websocket")]
pub use websocket::WsConnector;

#[cfg(feature = "memory")]
pub use memory::{MemoryAcceptor, MemoryConnector, RemotePeer};
