//! Event names and payloads
//!
//! The events exchanged with the web UI backend, and the reserved names the
//! client raises locally.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::client::AuthContext;

/// Namespace handshake completed
pub const CONNECT: &str = "connect";
/// Connection lost or closed; payload is the reason
pub const DISCONNECT: &str = "disconnect";
/// Connection attempt failed or was rejected; payload describes why
pub const CONNECT_ERROR: &str = "connect_error";
/// A reconnection attempt is starting; payload is the attempt number
pub const RECONNECT_ATTEMPT: &str = "reconnect_attempt";
/// Reconnected; payload is the number of attempts it took
pub const RECONNECT: &str = "reconnect";
/// Reconnection gave up after the configured attempts
pub const RECONNECT_FAILED: &str = "reconnect_failed";

/// Number of connected users
pub const USER_COUNT: &str = "user-count";
/// Models currently in use
pub const USAGE: &str = "usage";
/// Client announces its user
pub const USER_JOIN: &str = "user-join";
/// Per-chat progress events
pub const CHAT_EVENTS: &str = "chat-events";

/// Event names that cannot be emitted to the server
pub const RESERVED_EVENTS: &[&str] = &[
    CONNECT,
    DISCONNECT,
    CONNECT_ERROR,
    "disconnecting",
    "newListener",
    "removeListener",
];

/// Payload of `user-count`
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct UserCountPayload {
    pub count: u64,
}

/// Payload of `usage` from the server
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct UsagePayload {
    pub models: Vec<String>,
}

/// Payload of `chat-events`
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ChatEventPayload {
    pub chat_id: String,
    pub message_id: String,
    #[serde(default)]
    pub data: Value,
}

/// Payload of `usage` sent to the server
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct UsageReport {
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<String>,
}

impl UsageReport {
    /// Report usage of a model
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            action: None,
            chat_id: None,
        }
    }

    /// Report usage of a model by a chat
    pub fn for_chat(model: impl Into<String>, chat_id: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            action: Some("chat".to_string()),
            chat_id: Some(chat_id.into()),
        }
    }
}

/// Payload of `user-join`
#[derive(Debug, Clone, Serialize)]
pub struct UserJoinPayload {
    pub auth: AuthContext,
}
