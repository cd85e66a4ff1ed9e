//! Daemon configuration.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Full configuration file: library sections plus `[daemon]`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Server, push and log settings
    #[serde(flatten)]
    pub wiresense: wiresense::Config,

    /// Sampling settings
    #[serde(default)]
    pub daemon: DaemonConfig,
}

/// Sampling configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Sample interval in milliseconds
    #[serde(default = "default_interval")]
    pub interval: u64,

    /// Directory holding one CSV file per sensor
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,

    /// Built-in sensors to run
    #[serde(default = "default_sensors")]
    pub sensors: Vec<String>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            interval: default_interval(),
            log_dir: default_log_dir(),
            sensors: default_sensors(),
        }
    }
}

// Default value functions
fn default_interval() -> u64 {
    2000
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_sensors() -> Vec<String> {
    vec!["cpu".to_string(), "memory".to_string(), "load".to_string()]
}

impl Config {
    /// Loads configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content =
            std::fs::read_to_string(path.as_ref()).context("Failed to read configuration file")?;
        let config: Config = toml::from_str(&content).context("Failed to parse configuration")?;
        Ok(config)
    }

    /// CSV path for a sensor.
    pub fn csv_path(&self, sensor: &str) -> PathBuf {
        self.daemon.log_dir.join(format!("{}.csv", sensor))
    }
}
