//! Core protocol types for Karma realtime sessions.
//!
//! This crate provides the fundamental building blocks:
//! - `Envelope` / `MessageKind` - The wire message and its kind tag
//! - `payload` - Typed payloads for each kind
//! - `codec` - JSON text framing
//! - `close` - Close codes and their fallback reasons
//! - `SessionConfig` - Construction-time session options

pub mod close;
pub mod codec;
pub mod config;
pub mod envelope;
pub mod payload;

pub use codec::CodecError;
pub use config::SessionConfig;
pub use envelope::{Envelope, MessageKind, now_millis};
