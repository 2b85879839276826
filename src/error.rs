use thiserror::Error;

use crate::storage::StoreError;

/// Errors surfaced by the queue engine and the producer/worker facades.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unknown schedule kind: {0}")]
    UnknownScheduleKind(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for QueueError {
    fn from(err: serde_json::Error) -> Self {
        QueueError::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, QueueError>;
