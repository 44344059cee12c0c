//! Wire protocol definitions
//!
//! Engine.IO v4 framing and Socket.IO v4 packets as spoken by the web UI
//! backend. Only the text encoding is supported.

mod engine;
mod packet;

pub use engine::*;
pub use packet::*;

use thiserror::Error;

/// Protocol-related errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("JSON serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Empty packet")]
    EmptyPacket,

    #[error("Unknown packet type: {0}")]
    UnknownPacketType(char),

    #[error("Binary payloads are not supported")]
    BinaryUnsupported,

    #[error("Invalid packet: {0}")]
    InvalidPacket(String),
}

/// Result type for protocol operations
pub type ProtocolResult<T> = Result<T, ProtocolError>;
