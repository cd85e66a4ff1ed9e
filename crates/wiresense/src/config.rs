//! Configuration management.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::{Error, Result};

/// Main configuration structure.
///
/// Established once before any sensor is created and handed to
/// [`Wiresense::configure`](crate::Wiresense::configure).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Config {
    /// Built-in frontend server
    #[serde(default)]
    pub server: ServerConfig,

    /// Optional HTTP push target
    #[serde(default)]
    pub push: PushConfig,

    /// CSV logging behavior
    #[serde(default)]
    pub log: LogConfig,
}

/// Frontend server configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Whether to run the WebSocket/CSV server
    #[serde(default = "default_enable")]
    pub enable: bool,

    /// Bind address or host name (e.g., "0.0.0.0", "localhost")
    #[serde(default = "default_host")]
    pub host: String,

    /// Bind port, 0 picks a free port
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enable: default_enable(),
            host: default_host(),
            port: default_port(),
        }
    }
}

impl ServerConfig {
    /// Host and port to bind, resolved when the server starts.
    pub fn bind_addr(&self) -> (&str, u16) {
        (self.host.as_str(), self.port)
    }
}

/// HTTP push configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushConfig {
    /// Frontend endpoint receiving POSTed readings
    #[serde(default)]
    pub url: Option<String>,

    /// Request timeout in milliseconds
    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout_ms: default_timeout(),
        }
    }
}

impl PushConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// What happens to the CSV row when transmission fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OnSendFailure {
    /// Append the row first, then send. A failed send leaves the row in place.
    #[default]
    KeepRow,
    /// Send first and only append once the send succeeded.
    DropRow,
}

/// CSV logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct LogConfig {
    /// Row policy on transmission failure
    #[serde(default)]
    pub on_send_failure: OnSendFailure,

    /// Prefix every row with a UNIX timestamp column
    #[serde(default)]
    pub timestamp_column: bool,

    /// Write to `<stem>_<unix-time>.<ext>` so every run gets a fresh file
    #[serde(default)]
    pub per_run_suffix: bool,
}

// Default value functions
fn default_enable() -> bool {
    true
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_timeout() -> u64 {
    5000
}

impl Config {
    /// Default configuration listening on the given port.
    pub fn with_port(port: u16) -> Self {
        let mut config = Self::default();
        config.server.port = port;
        config
    }

    /// Parses configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("failed to parse: {}", e)))
    }

    /// Loads configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read {}: {}", path.display(), e)))?;
        Self::from_toml(&content)
    }

    /// Saves configuration to a TOML file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("failed to serialize: {}", e)))?;
        std::fs::write(path, content)
            .map_err(|e| Error::Config(format!("failed to write {}: {}", path.display(), e)))?;
        Ok(())
    }
}
