//! Shipper error types.

use thiserror::Error;

/// Shipper error type.
#[derive(Error, Debug)]
pub enum ShipperError {
    /// IO error (buffer files, checkpoint file, dead-letter folder)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP request error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Checkpoint could not be persisted or interpreted
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// Dead-letter file could not be written
    #[error("Dead-letter error: {0}")]
    DeadLetter(String),
}

/// Result type alias using ShipperError.
pub type ShipperResult<T> = Result<T, ShipperError>;
