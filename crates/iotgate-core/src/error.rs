//! Unified error handling for iotgate.
//!
//! This module provides a common error type shared by all crates in the
//! workspace. Crate-local error enums convert into it at the boundaries.

/// Unified error type for iotgate.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Storage/database errors.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Device-related errors.
    #[error("Device error: {0}")]
    Device(String),

    /// Bus publish/subscribe failures.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Validation errors.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Not found errors.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Timeout errors.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Serialization errors.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic internal errors.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using the unified error.
pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Config(e.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Internal(e.to_string())
    }
}

impl Error {
    /// Whether this error came from the bus transport.
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Transport(_))
    }
}
