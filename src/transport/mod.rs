//! Engine.IO transports
//!
//! A transport moves Engine.IO packets between the client and the server.
//! Two are available: a websocket and HTTP long-polling. Connection
//! attempts walk the configured preference list and keep the first
//! transport that completes the Engine.IO handshake.

mod polling;
mod websocket;

pub use polling::PollingTransport;
pub use websocket::WebSocketTransport;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use crate::config::SocketOptions;
use crate::protocol::{EnginePacket, Handshake, ProtocolError, ENGINE_IO_VERSION};

/// Errors raised by a transport
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected HTTP status: {0}")]
    Status(u16),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Handshake failed: {0}")]
    Handshake(String),

    #[error("Connection attempt timed out")]
    Timeout,

    #[error("Transport closed")]
    Closed,
}

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// Available transport mechanisms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Websocket,
    Polling,
}

impl TransportKind {
    /// Name used in the `transport` query parameter
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Websocket => "websocket",
            TransportKind::Polling => "polling",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A bidirectional Engine.IO packet channel
#[async_trait]
pub trait Transport: Send {
    /// Which mechanism this transport uses
    fn kind(&self) -> TransportKind;

    /// Send packets to the server, in order
    async fn send(&mut self, packets: Vec<EnginePacket>) -> TransportResult<()>;

    /// Receive the next packet, or `None` once the transport is closed.
    ///
    /// Implementations must be cancel-safe: dropping the future before it
    /// completes must not lose a packet.
    async fn recv(&mut self) -> Option<TransportResult<EnginePacket>>;

    /// Close the transport; errors are ignored
    async fn close(&mut self);
}

/// Build the Engine.IO endpoint URL for a transport
///
/// The path always gets a trailing slash and the scheme is switched to
/// `ws`/`wss` for websockets and `http`/`https` for polling.
pub fn endpoint_url(
    options: &SocketOptions,
    kind: TransportKind,
    sid: Option<&str>,
) -> TransportResult<Url> {
    let mut url = options.base_url.clone();

    let secure = matches!(url.scheme(), "https" | "wss");
    let scheme = match (kind, secure) {
        (TransportKind::Websocket, false) => "ws",
        (TransportKind::Websocket, true) => "wss",
        (TransportKind::Polling, false) => "http",
        (TransportKind::Polling, true) => "https",
    };
    url.set_scheme(scheme)
        .map_err(|_| TransportError::Handshake(format!("cannot use scheme {}", scheme)))?;

    let path = format!("{}/", options.path.trim_end_matches('/'));
    url.set_path(&path);
    url.set_fragment(None);
    url.set_query(None);
    {
        let mut query = url.query_pairs_mut();
        query.append_pair("EIO", &ENGINE_IO_VERSION.to_string());
        query.append_pair("transport", kind.as_str());
        if let Some(sid) = sid {
            query.append_pair("sid", sid);
        }
    }

    Ok(url)
}

/// Open a transport, trying each configured mechanism in order
///
/// Each attempt is bounded by the connect timeout. The error of the last
/// failed attempt is returned when none succeeds.
pub async fn open(
    options: &SocketOptions,
) -> TransportResult<(Box<dyn Transport>, Handshake)> {
    let mut last_error = TransportError::Closed;

    for kind in &options.transports {
        let url = endpoint_url(options, *kind, None)?;
        debug!("Opening {} transport to {}", kind, url);

        let attempt = async {
            match kind {
                TransportKind::Websocket => WebSocketTransport::connect(&url)
                    .await
                    .map(|(t, h)| (Box::new(t) as Box<dyn Transport>, h)),
                TransportKind::Polling => PollingTransport::connect(&url)
                    .await
                    .map(|(t, h)| (Box::new(t) as Box<dyn Transport>, h)),
            }
        };

        match tokio::time::timeout(options.connect_timeout, attempt).await {
            Ok(Ok(opened)) => {
                debug!("{} transport open, sid={}", kind, opened.1.sid);
                return Ok(opened);
            }
            Ok(Err(e)) => {
                warn!("{} transport failed: {}", kind, e);
                last_error = e;
            }
            Err(_) => {
                warn!("{} transport timed out", kind);
                last_error = TransportError::Timeout;
            }
        }
    }

    Err(last_error)
}
