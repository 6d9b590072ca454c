//! Error types for the Ratewarden service.

use thiserror::Error;

/// Main error type for Ratewarden operations.
#[derive(Error, Debug)]
pub enum WardenError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// A bucket capacity or refill rate outside the accepted range
    #[error("Invalid rate limit: {0}")]
    InvalidLimit(String),

    /// A periodic eviction pass that failed; recovered inside the sweeper
    #[error("Sweep failure: {0}")]
    SweepFailure(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for WardenError {
    fn from(err: config::ConfigError) -> Self {
        WardenError::Config(err.to_string())
    }
}

/// Failures on the admission path that are not rate-limit rejections.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdmissionError {
    /// The request carries no usable client address.
    #[error("client identity unavailable: {0}")]
    IdentityUnavailable(String),
}

/// Result type alias for Ratewarden operations.
pub type Result<T> = std::result::Result<T, WardenError>;
