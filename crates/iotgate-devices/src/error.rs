//! Device layer errors.

use iotgate_core::Error as GatewayError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, DeviceError>;

/// Errors raised by command dispatch, ingestion and aggregation.
///
/// An acknowledgment timeout is not an error: the dispatcher reports it as a
/// failed [`TriggerResult`](crate::dispatcher::TriggerResult).
#[derive(Debug, Error)]
pub enum DeviceError {
    /// Referenced action, actuator or record does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Malformed inbound payload
    #[error("Validation error: {0}")]
    Validation(String),

    /// Publish/subscribe failure on the bus
    #[error("Transport error: {0}")]
    Transport(String),

    /// Storage write or read failure
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Invalid parameter value
    #[error("Invalid parameter value: {0}")]
    InvalidParameter(String),

    /// A live waiter already exists for this topic and correlation id
    #[error("Correlation conflict: {0}")]
    Conflict(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<iotgate_storage::Error> for DeviceError {
    fn from(e: iotgate_storage::Error) -> Self {
        match e {
            iotgate_storage::Error::NotFound(s) => DeviceError::NotFound(s),
            other => DeviceError::Persistence(other.to_string()),
        }
    }
}

impl From<GatewayError> for DeviceError {
    fn from(e: GatewayError) -> Self {
        match e {
            GatewayError::Transport(s) => DeviceError::Transport(s),
            GatewayError::NotFound(s) => DeviceError::NotFound(s),
            GatewayError::Validation(s) => DeviceError::Validation(s),
            GatewayError::Storage(s) => DeviceError::Persistence(s),
            GatewayError::Serialization(s) => DeviceError::Serialization(s),
            other => DeviceError::Transport(other.to_string()),
        }
    }
}

impl From<DeviceError> for GatewayError {
    fn from(e: DeviceError) -> Self {
        match e {
            DeviceError::NotFound(s) => GatewayError::NotFound(s),
            DeviceError::Validation(s) | DeviceError::InvalidParameter(s) => {
                GatewayError::Validation(s)
            }
            DeviceError::Transport(s) => GatewayError::Transport(s),
            DeviceError::Persistence(s) => GatewayError::Storage(s),
            DeviceError::Conflict(s) => GatewayError::Device(s),
            DeviceError::Serialization(s) => GatewayError::Serialization(s),
        }
    }
}

impl From<serde_json::Error> for DeviceError {
    fn from(e: serde_json::Error) -> Self {
        DeviceError::Serialization(e.to_string())
    }
}
