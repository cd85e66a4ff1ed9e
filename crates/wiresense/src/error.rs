//! Error types for wiresense.

use std::io;
use thiserror::Error;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced to callers of the library.
///
/// The producer, transmission and file-write domains are kept apart so a
/// caller can tell a partial outcome (sent but not logged, or logged but
/// not sent) from a clean failure.
#[derive(Error, Debug)]
pub enum Error {
    /// The user-supplied producer function failed.
    #[error("producer of sensor '{sensor}' failed: {source}")]
    Producer {
        sensor: String,
        #[source]
        source: anyhow::Error,
    },

    /// The producer returned something that cannot be sent or logged.
    #[error("invalid reading from sensor '{sensor}': {reason}")]
    InvalidReading { sensor: String, reason: String },

    /// Delivering the payload to the frontend failed.
    #[error("transmission for sensor '{sensor}' failed (row logged: {logged}): {source}")]
    Transmit {
        sensor: String,
        /// Whether the row had already been appended to the CSV log.
        logged: bool,
        #[source]
        source: TransportError,
    },

    /// Writing to the CSV log failed.
    #[error("writing log of sensor '{sensor}' failed (payload sent: {transmitted}): {source}")]
    Write {
        sensor: String,
        /// Whether the payload had already been delivered.
        transmitted: bool,
        #[source]
        source: io::Error,
    },

    /// Invalid or duplicate sensor name.
    #[error("sensor registration failed: {0}")]
    Registration(String),

    /// Configuration could not be read, parsed or applied.
    #[error("configuration error: {0}")]
    Config(String),

    /// The frontend server could not be started.
    #[error("server error: {0}")]
    Server(#[from] io::Error),
}

/// Errors raised by a [`Transport`](crate::Transport).
#[derive(Error, Debug)]
pub enum TransportError {
    /// The transport was shut down.
    #[error("transport is closed")]
    Closed,

    /// HTTP request could not be completed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Frontend answered with a non-success status.
    #[error("frontend responded with status {0}")]
    Status(reqwest::StatusCode),

    /// Payload could not be encoded.
    #[error("payload encoding failed: {0}")]
    Encode(#[from] serde_json::Error),

    /// Custom transport failure.
    #[error("{0}")]
    Other(String),
}

/// Errors raised by a [`CsvLog`](crate::CsvLog).
#[derive(Error, Debug)]
pub enum LogError {
    /// The reading's metrics do not match the file header.
    #[error("columns {found:?} do not match header {expected:?}")]
    Mismatch {
        expected: Vec<String>,
        found: Vec<String>,
    },

    /// Filesystem or CSV encoding error.
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl From<csv::Error> for LogError {
    fn from(err: csv::Error) -> Self {
        LogError::Io(err.into())
    }
}
