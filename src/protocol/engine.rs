//! Engine.IO packet framing
//!
//! Every Engine.IO packet is a single type digit followed by an optional
//! UTF-8 payload. Long-polling bodies carry several packets joined with the
//! ASCII record separator.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{ProtocolError, ProtocolResult};

/// Engine.IO protocol revision sent as the `EIO` query parameter
pub const ENGINE_IO_VERSION: u8 = 4;

/// Separator between packets in a long-polling payload
pub const RECORD_SEPARATOR: char = '\u{1e}';

/// Default maximum payload size advertised by servers (1MB)
pub const DEFAULT_MAX_PAYLOAD: u64 = 1_000_000;

/// Handshake data carried by the `open` packet
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    /// Engine.IO session id
    pub sid: String,
    /// Transports the server allows upgrading to
    #[serde(default)]
    pub upgrades: Vec<String>,
    /// Interval between server pings, in milliseconds
    pub ping_interval: u64,
    /// Grace period for a ping to arrive, in milliseconds
    pub ping_timeout: u64,
    /// Largest payload the server accepts, in bytes
    #[serde(default = "default_max_payload")]
    pub max_payload: u64,
}

fn default_max_payload() -> u64 {
    DEFAULT_MAX_PAYLOAD
}

impl Handshake {
    /// How long to wait for the next server ping before giving up on the
    /// transport.
    pub fn heartbeat_deadline(&self) -> Duration {
        Duration::from_millis(self.ping_interval.saturating_add(self.ping_timeout))
    }
}

/// A single Engine.IO packet
#[derive(Debug, Clone, PartialEq)]
pub enum EnginePacket {
    Open(Handshake),
    Close,
    Ping(Option<String>),
    Pong(Option<String>),
    /// Carries an encoded Socket.IO packet
    Message(String),
    Upgrade,
    Noop,
}

impl EnginePacket {
    /// Type digit as it appears on the wire
    pub fn type_char(&self) -> char {
        match self {
            EnginePacket::Open(_) => '0',
            EnginePacket::Close => '1',
            EnginePacket::Ping(_) => '2',
            EnginePacket::Pong(_) => '3',
            EnginePacket::Message(_) => '4',
            EnginePacket::Upgrade => '5',
            EnginePacket::Noop => '6',
        }
    }

    /// Encode into the text wire format
    pub fn encode(&self) -> ProtocolResult<String> {
        let mut out = String::new();
        out.push(self.type_char());
        match self {
            EnginePacket::Open(handshake) => out.push_str(&serde_json::to_string(handshake)?),
            EnginePacket::Ping(Some(data)) | EnginePacket::Pong(Some(data)) => out.push_str(data),
            EnginePacket::Message(data) => out.push_str(data),
            _ => {}
        }
        Ok(out)
    }

    /// Decode a single packet from the text wire format
    pub fn decode(text: &str) -> ProtocolResult<Self> {
        let mut chars = text.chars();
        let kind = chars.next().ok_or(ProtocolError::EmptyPacket)?;
        let data = chars.as_str();

        let optional = |data: &str| {
            if data.is_empty() {
                None
            } else {
                Some(data.to_string())
            }
        };

        match kind {
            '0' => Ok(EnginePacket::Open(serde_json::from_str(data)?)),
            '1' => Ok(EnginePacket::Close),
            '2' => Ok(EnginePacket::Ping(optional(data))),
            '3' => Ok(EnginePacket::Pong(optional(data))),
            '4' => Ok(EnginePacket::Message(data.to_string())),
            '5' => Ok(EnginePacket::Upgrade),
            '6' => Ok(EnginePacket::Noop),
            // base64-encoded binary message
            'b' => Err(ProtocolError::BinaryUnsupported),
            other => Err(ProtocolError::UnknownPacketType(other)),
        }
    }
}

/// Decode a long-polling response body into its packets
pub fn decode_payload(body: &str) -> ProtocolResult<Vec<EnginePacket>> {
    body.split(RECORD_SEPARATOR)
        .filter(|chunk| !chunk.is_empty())
        .map(EnginePacket::decode)
        .collect()
}

/// Encode packets into a long-polling request body
pub fn encode_payload(packets: &[EnginePacket]) -> ProtocolResult<String> {
    let encoded = packets
        .iter()
        .map(EnginePacket::encode)
        .collect::<ProtocolResult<Vec<_>>>()?;
    Ok(encoded.join(&RECORD_SEPARATOR.to_string()))
}
