//! Error types for chartbook-core

use thiserror::Error;

/// Result type alias using chartbook-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in chartbook-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP transport error
    #[error("Transport error: {0}")]
    Http(#[from] reqwest::Error),

    /// Authentication failure (missing or rejected credential)
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// Entity not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Malformed server response or protocol violation
    #[error("Sync protocol error: {0}")]
    Protocol(String),
}

impl Error {
    /// True when the error is an authentication failure.
    ///
    /// Authentication failures are surfaced distinctly by the sync cycle:
    /// retrying without a fresh credential is futile, so they never consume
    /// a backoff step.
    #[must_use]
    pub const fn is_authentication(&self) -> bool {
        matches!(self, Self::Authentication(_))
    }
}
