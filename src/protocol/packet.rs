//! Socket.IO packet encoding
//!
//! A Socket.IO packet travels inside an Engine.IO `message` packet:
//!
//! ```text
//! <type>[/<namespace>,][<ack id>][<json data>]
//! ```

use serde_json::Value;

use super::{ProtocolError, ProtocolResult};

/// The default namespace, omitted on the wire
pub const DEFAULT_NAMESPACE: &str = "/";

/// Socket.IO packet types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    Connect,
    Disconnect,
    Event,
    Ack,
    ConnectError,
    BinaryEvent,
    BinaryAck,
}

impl PacketType {
    fn from_char(c: char) -> ProtocolResult<Self> {
        match c {
            '0' => Ok(PacketType::Connect),
            '1' => Ok(PacketType::Disconnect),
            '2' => Ok(PacketType::Event),
            '3' => Ok(PacketType::Ack),
            '4' => Ok(PacketType::ConnectError),
            '5' => Ok(PacketType::BinaryEvent),
            '6' => Ok(PacketType::BinaryAck),
            other => Err(ProtocolError::UnknownPacketType(other)),
        }
    }

    fn as_char(self) -> char {
        match self {
            PacketType::Connect => '0',
            PacketType::Disconnect => '1',
            PacketType::Event => '2',
            PacketType::Ack => '3',
            PacketType::ConnectError => '4',
            PacketType::BinaryEvent => '5',
            PacketType::BinaryAck => '6',
        }
    }
}

/// A decoded Socket.IO packet
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub kind: PacketType,
    pub namespace: String,
    pub id: Option<u64>,
    pub data: Option<Value>,
}

impl Packet {
    /// CONNECT packet carrying the auth payload
    pub fn connect(namespace: impl Into<String>, auth: Option<Value>) -> Self {
        Self {
            kind: PacketType::Connect,
            namespace: namespace.into(),
            id: None,
            data: auth,
        }
    }

    /// DISCONNECT packet
    pub fn disconnect(namespace: impl Into<String>) -> Self {
        Self {
            kind: PacketType::Disconnect,
            namespace: namespace.into(),
            id: None,
            data: None,
        }
    }

    /// EVENT packet; `id` requests an acknowledgement
    pub fn event(
        namespace: impl Into<String>,
        name: &str,
        args: Vec<Value>,
        id: Option<u64>,
    ) -> Self {
        let mut data = Vec::with_capacity(args.len() + 1);
        data.push(Value::String(name.to_string()));
        data.extend(args);
        Self {
            kind: PacketType::Event,
            namespace: namespace.into(),
            id,
            data: Some(Value::Array(data)),
        }
    }

    /// ACK packet answering the server's event `id`
    pub fn ack(namespace: impl Into<String>, id: u64, args: Vec<Value>) -> Self {
        Self {
            kind: PacketType::Ack,
            namespace: namespace.into(),
            id: Some(id),
            data: Some(Value::Array(args)),
        }
    }

    /// Event name and arguments, for EVENT packets
    pub fn event_parts(&self) -> Option<(&str, &[Value])> {
        if self.kind != PacketType::Event {
            return None;
        }
        match &self.data {
            Some(Value::Array(items)) => match items.split_first() {
                Some((Value::String(name), args)) => Some((name.as_str(), args)),
                _ => None,
            },
            _ => None,
        }
    }

    /// Arguments of an ACK packet
    pub fn ack_args(&self) -> Vec<Value> {
        match &self.data {
            Some(Value::Array(items)) => items.clone(),
            _ => Vec::new(),
        }
    }

    /// Human-readable message of a CONNECT_ERROR packet
    pub fn error_message(&self) -> String {
        match &self.data {
            Some(Value::Object(map)) => map
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("connection rejected")
                .to_string(),
            Some(Value::String(message)) => message.clone(),
            _ => "connection rejected".to_string(),
        }
    }

    /// Encode into the text wire format
    pub fn encode(&self) -> ProtocolResult<String> {
        if matches!(self.kind, PacketType::BinaryEvent | PacketType::BinaryAck) {
            return Err(ProtocolError::BinaryUnsupported);
        }

        let mut out = String::new();
        out.push(self.kind.as_char());
        if !self.namespace.is_empty() && self.namespace != DEFAULT_NAMESPACE {
            out.push_str(&self.namespace);
            out.push(',');
        }
        if let Some(id) = self.id {
            out.push_str(&id.to_string());
        }
        if let Some(data) = &self.data {
            out.push_str(&serde_json::to_string(data)?);
        }
        Ok(out)
    }

    /// Decode from the text wire format and validate the payload shape
    pub fn decode(text: &str) -> ProtocolResult<Self> {
        let mut chars = text.chars();
        let kind = PacketType::from_char(chars.next().ok_or(ProtocolError::EmptyPacket)?)?;
        if matches!(kind, PacketType::BinaryEvent | PacketType::BinaryAck) {
            return Err(ProtocolError::BinaryUnsupported);
        }
        let mut rest = chars.as_str();

        let namespace = if rest.starts_with('/') {
            let end = rest.find(',').unwrap_or(rest.len());
            let namespace = rest[..end].to_string();
            rest = rest.get(end + 1..).unwrap_or("");
            namespace
        } else {
            DEFAULT_NAMESPACE.to_string()
        };

        let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
        let id = if digits > 0 {
            let id = rest[..digits]
                .parse::<u64>()
                .map_err(|e| ProtocolError::InvalidPacket(format!("bad ack id: {}", e)))?;
            rest = &rest[digits..];
            Some(id)
        } else {
            None
        };

        let data = if rest.is_empty() {
            None
        } else {
            Some(serde_json::from_str::<Value>(rest)?)
        };

        let packet = Self {
            kind,
            namespace,
            id,
            data,
        };
        packet.validate()?;
        Ok(packet)
    }

    fn validate(&self) -> ProtocolResult<()> {
        let valid = match (self.kind, &self.data) {
            (PacketType::Connect, None) => true,
            (PacketType::Connect, Some(data)) => data.is_object(),
            (PacketType::Disconnect, data) => data.is_none(),
            (PacketType::Event, Some(Value::Array(items))) => {
                matches!(items.first(), Some(Value::String(_)))
            }
            (PacketType::Ack, Some(Value::Array(_))) => self.id.is_some(),
            (PacketType::ConnectError, Some(data)) => data.is_object() || data.is_string(),
            _ => false,
        };

        if valid {
            Ok(())
        } else {
            Err(ProtocolError::InvalidPacket(format!(
                "invalid payload for {:?} packet",
                self.kind
            )))
        }
    }
}
