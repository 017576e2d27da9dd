//! Error types for the attention signal pipeline and collector.

use thiserror::Error;

/// Main error type for the library
#[derive(Error, Debug)]
pub enum Error {
    /// File I/O operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML configuration could not be parsed or written
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Invalid input parameters provided
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Network delivery failed in a way worth retrying (timeout, connection, 5xx)
    #[error("Transport error: {0}")]
    Transport(String),

    /// The collector refused the batch; retrying the same payload will not help
    #[error("Batch rejected with status {status}: {detail}")]
    Rejected {
        /// HTTP status returned by the collector
        status: u16,
        /// Response body or reason phrase
        detail: String,
    },

    /// Malformed ingest request (session mismatch, empty batch, bad signal)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// No log exists for the requested session
    #[error("Not found: {0}")]
    NotFound(String),
}

impl Error {
    /// Whether a failed delivery should be retried on the next flush tick
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Io(_))
    }
}

/// Convenience type alias for Results with our Error type
pub type Result<T> = std::result::Result<T, Error>;
