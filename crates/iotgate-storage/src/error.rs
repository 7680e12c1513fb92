//! Failures raised by the gateway stores.

use thiserror::Error;

pub use iotgate_core::Error as GatewayError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The database file could not be created or opened.
    #[error("file access failed: {0}")]
    Io(#[from] std::io::Error),

    /// A stored row or a row being written is not valid JSON for its type.
    #[error("bad stored row: {0}")]
    Serialization(String),

    /// Anything redb reports while reading or committing.
    #[error("database error: {0}")]
    Storage(String),

    #[error("no such record: {0}")]
    NotFound(String),

    #[error("rejected by store: {0}")]
    InvalidInput(String),

    /// A history record was asked to leave a terminal status.
    #[error("record {id} cannot move from {from} to {to}")]
    InvalidTransition { id: u64, from: String, to: String },
}

impl From<Error> for GatewayError {
    fn from(e: Error) -> Self {
        match e {
            Error::Io(e) => GatewayError::Storage(e.to_string()),
            Error::Serialization(s) => GatewayError::Serialization(s),
            Error::Storage(s) => GatewayError::Storage(s),
            Error::NotFound(s) => GatewayError::NotFound(s),
            Error::InvalidInput(s) => GatewayError::Validation(s),
            Error::InvalidTransition { .. } => GatewayError::Validation(e.to_string()),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

// redb splits its failures by phase; keep the phase in the message.
impl From<redb::Error> for Error {
    fn from(e: redb::Error) -> Self {
        Error::Storage(e.to_string())
    }
}

impl From<redb::DatabaseError> for Error {
    fn from(e: redb::DatabaseError) -> Self {
        Error::Storage(format!("open: {}", e))
    }
}

impl From<redb::TransactionError> for Error {
    fn from(e: redb::TransactionError) -> Self {
        Error::Storage(format!("begin: {}", e))
    }
}

impl From<redb::TableError> for Error {
    fn from(e: redb::TableError) -> Self {
        Error::Storage(format!("table: {}", e))
    }
}

impl From<redb::StorageError> for Error {
    fn from(e: redb::StorageError) -> Self {
        Error::Storage(format!("io: {}", e))
    }
}

impl From<redb::CommitError> for Error {
    fn from(e: redb::CommitError) -> Self {
        Error::Storage(format!("commit: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_transition_maps_to_validation() {
        let err = Error::InvalidTransition {
            id: 4,
            from: "success".into(),
            to: "pending".into(),
        };
        match GatewayError::from(err) {
            GatewayError::Validation(msg) => {
                assert_eq!(msg, "record 4 cannot move from success to pending")
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_not_found_keeps_its_kind() {
        let err = GatewayError::from(Error::NotFound("action 9".into()));
        assert!(matches!(err, GatewayError::NotFound(ref s) if s == "action 9"));
    }
}
