//! Validated connection options
//!
//! `SocketOptions` is what a connection is actually built from. It is
//! produced from a [`ClientConfig`](super::ClientConfig) or assembled in code
//! with the builder methods below.

use std::time::Duration;

use url::Url;

use super::{ConfigError, ConfigResult};
use crate::protocol::DEFAULT_NAMESPACE;
use crate::transport::TransportKind;

/// Server-side mount point of the Socket.IO endpoint
pub const DEFAULT_PATH: &str = "/ws/socket.io";

/// Delay before the first reconnection attempt
pub const DEFAULT_RECONNECTION_DELAY: Duration = Duration::from_millis(1000);

/// Upper bound for the reconnection delay
pub const DEFAULT_RECONNECTION_DELAY_MAX: Duration = Duration::from_millis(5000);

/// Jitter applied to each reconnection delay, as a fraction of the delay
pub const DEFAULT_RANDOMIZATION_FACTOR: f64 = 0.5;

/// Time allowed for a single connection attempt (transport + namespace)
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(20);

/// Transport preference: websocket first, long-polling as fallback
pub const DEFAULT_TRANSPORTS: [TransportKind; 2] = [TransportKind::Websocket, TransportKind::Polling];

/// Options for one Socket.IO connection
#[derive(Debug, Clone, PartialEq)]
pub struct SocketOptions {
    /// Server origin, `http(s)://` or `ws(s)://`
    pub base_url: Url,
    /// Endpoint path on the server
    pub path: String,
    /// Socket.IO namespace to join
    pub namespace: String,
    /// Whether to reconnect automatically after the connection drops
    pub reconnection: bool,
    /// Initial reconnection delay
    pub reconnection_delay: Duration,
    /// Maximum reconnection delay
    pub reconnection_delay_max: Duration,
    /// Jitter factor in `[0, 1]`
    pub randomization_factor: f64,
    /// Give up after this many consecutive attempts (`None` = never)
    pub reconnection_attempts: Option<u32>,
    /// Transports to try, in order of preference
    pub transports: Vec<TransportKind>,
    /// Timeout for a single connection attempt
    pub connect_timeout: Duration,
}

impl SocketOptions {
    /// Create options for the given server origin with default settings
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            path: DEFAULT_PATH.to_string(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            reconnection: true,
            reconnection_delay: DEFAULT_RECONNECTION_DELAY,
            reconnection_delay_max: DEFAULT_RECONNECTION_DELAY_MAX,
            randomization_factor: DEFAULT_RANDOMIZATION_FACTOR,
            reconnection_attempts: None,
            transports: DEFAULT_TRANSPORTS.to_vec(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Parse the server origin and create default options
    pub fn parse(base_url: &str) -> ConfigResult<Self> {
        let url = Url::parse(base_url.trim())?;
        match url.scheme() {
            "http" | "https" | "ws" | "wss" => Ok(Self::new(url)),
            other => Err(ConfigError::Invalid(format!(
                "unsupported URL scheme '{}'",
                other
            ))),
        }
    }

    /// Set the endpoint path
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Set the transport preference order
    pub fn with_transports(mut self, transports: Vec<TransportKind>) -> Self {
        self.transports = transports;
        self
    }

    /// Enable or disable automatic reconnection
    pub fn with_reconnection(mut self, reconnection: bool) -> Self {
        self.reconnection = reconnection;
        self
    }

    /// Set the initial and maximum reconnection delays
    pub fn with_reconnection_delay(mut self, initial: Duration, max: Duration) -> Self {
        self.reconnection_delay = initial;
        self.reconnection_delay_max = max;
        self
    }

    /// Set the jitter factor (clamped to `[0, 1]`)
    pub fn with_randomization_factor(mut self, factor: f64) -> Self {
        self.randomization_factor = factor.clamp(0.0, 1.0);
        self
    }

    /// Limit the number of consecutive reconnection attempts
    pub fn with_reconnection_attempts(mut self, attempts: Option<u32>) -> Self {
        self.reconnection_attempts = attempts;
        self
    }

    /// Set the timeout for a single connection attempt
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Check option consistency
    pub fn validate(&self) -> ConfigResult<()> {
        if self.transports.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one transport must be enabled".to_string(),
            ));
        }
        if !self.path.starts_with('/') {
            return Err(ConfigError::Invalid(format!(
                "path '{}' must start with '/'",
                self.path
            )));
        }
        if self.reconnection_delay > self.reconnection_delay_max {
            return Err(ConfigError::Invalid(
                "reconnection delay exceeds its maximum".to_string(),
            ));
        }
        Ok(())
    }
}
