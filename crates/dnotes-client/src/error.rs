//! Error types for dnotes client construction

use thiserror::Error;

use crate::config::ConfigError;

/// Result type alias for dnotes client operations
pub type Result<T> = std::result::Result<T, DnotesClientError>;

/// Errors that can occur while building or configuring a push client
///
/// Failures of the live stream itself never surface here; they are handled
/// inside the connection manager and only show up as an absence of events.
#[derive(Error, Debug)]
pub enum DnotesClientError {
    /// HTTP client could not be built
    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// Invalid URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}
