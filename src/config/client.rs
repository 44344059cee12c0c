//! Client configuration file
//!
//! Loads connection settings from a TOML file. Every field is optional and
//! falls back to the values the web UI front-end uses.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{
    ConfigResult, SocketOptions, DEFAULT_PATH, DEFAULT_RANDOMIZATION_FACTOR, DEFAULT_TRANSPORTS,
};
use crate::transport::TransportKind;

/// Default configuration file name
pub const CONFIG_FILE: &str = "webui-socket.toml";

/// Server origin used when none is configured
pub const DEFAULT_BASE_URL: &str = "http://localhost:8080";

/// Connection settings as written in the configuration file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientConfig {
    /// Server origin
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Endpoint path on the server
    #[serde(default = "default_path")]
    pub path: String,
    /// Reconnect automatically
    #[serde(default = "default_reconnection")]
    pub reconnection: bool,
    /// Initial reconnection delay in milliseconds
    #[serde(default = "default_reconnection_delay_ms")]
    pub reconnection_delay_ms: u64,
    /// Maximum reconnection delay in milliseconds
    #[serde(default = "default_reconnection_delay_max_ms")]
    pub reconnection_delay_max_ms: u64,
    /// Reconnection jitter factor
    #[serde(default = "default_randomization_factor")]
    pub randomization_factor: f64,
    /// Maximum consecutive reconnection attempts (unset = unlimited)
    #[serde(default)]
    pub reconnection_attempts: Option<u32>,
    /// Transport preference order
    #[serde(default = "default_transports")]
    pub transports: Vec<TransportKind>,
    /// Timeout for one connection attempt in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_path() -> String {
    DEFAULT_PATH.to_string()
}

fn default_reconnection() -> bool {
    true
}

fn default_reconnection_delay_ms() -> u64 {
    1000
}

fn default_reconnection_delay_max_ms() -> u64 {
    5000
}

fn default_randomization_factor() -> f64 {
    DEFAULT_RANDOMIZATION_FACTOR
}

fn default_transports() -> Vec<TransportKind> {
    DEFAULT_TRANSPORTS.to_vec()
}

fn default_connect_timeout_ms() -> u64 {
    20_000
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            path: default_path(),
            reconnection: default_reconnection(),
            reconnection_delay_ms: default_reconnection_delay_ms(),
            reconnection_delay_max_ms: default_reconnection_delay_max_ms(),
            randomization_factor: default_randomization_factor(),
            reconnection_attempts: None,
            transports: default_transports(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from a file, or defaults if it does not exist
    pub fn load(config_path: &Path) -> ConfigResult<Self> {
        if !config_path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(config_path)?;
        let config: ClientConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Validate and convert into connection options
    pub fn into_options(self) -> ConfigResult<SocketOptions> {
        let options = SocketOptions::parse(&self.base_url)?
            .with_path(self.path)
            .with_reconnection(self.reconnection)
            .with_reconnection_delay(
                Duration::from_millis(self.reconnection_delay_ms),
                Duration::from_millis(self.reconnection_delay_max_ms),
            )
            .with_randomization_factor(self.randomization_factor)
            .with_reconnection_attempts(self.reconnection_attempts)
            .with_transports(self.transports)
            .with_connect_timeout(Duration::from_millis(self.connect_timeout_ms));

        options.validate()?;
        Ok(options)
    }
}
