//! Shared protocol and utilities for jouletrace
//!
//! This crate contains everything the meter daemon and the instrumented
//! client must agree on: the wire format for session messages, the framed
//! transport with its error taxonomy, and the session lifecycle states.

pub mod protocol;
pub mod utils;

// Re-export commonly used types
pub use protocol::session::SessionState;
pub use protocol::transport::{
    Connection, IoError, SetupError, TransportConfig, TransportError,
};
pub use protocol::wire::{Message, MessageKind, ProtocolError};
