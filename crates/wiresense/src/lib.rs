//! Wiresense
//!
//! Reads values from arbitrary sensors, forwards every reading to a live
//! visualization frontend and appends it to a per-sensor CSV log.
//!
//! ```no_run
//! use wiresense::{Config, Reading, Wiresense};
//!
//! # async fn run() -> wiresense::Result<()> {
//! let wiresense = Wiresense::configure(Config::with_port(8080)).await?;
//! let sensor = wiresense.sensor(
//!     "greenhouse",
//!     || Ok(Reading::new().with("Temp", 21.5).with("Humidity", 40)),
//!     "logs/greenhouse.csv",
//! )?;
//! sensor.execute().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod csv_log;
pub mod error;
pub mod reading;
pub mod registry;
pub mod sensor;
pub mod server;
pub mod transport;

pub use config::{Config, LogConfig, OnSendFailure, PushConfig, ServerConfig};
pub use csv_log::CsvLog;
pub use error::{Error, LogError, Result, TransportError};
pub use reading::{Payload, Reading, Value};
pub use sensor::{Producer, Sensor, Wiresense};
pub use transport::{Fanout, HttpPush, Hub, Transport};

/// Name of the leading column written when timestamps are enabled.
pub const TIMESTAMP_COLUMN: &str = "timestamp";

/// Characters a sensor name must not contain.
pub const FORBIDDEN_NAME_CHARS: [char; 2] = ['\n', '\r'];
