use thiserror::Error;

/// Errors raised by store adapters.
///
/// Adapters backed by a remote store map their transport failures onto
/// these; the in-memory adapter only ever raises `Consistency` (and only on
/// corrupted internal state).
#[derive(Debug, Error, Clone)]
pub enum StoreError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Operation timeout: {0}")]
    Timeout(String),

    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    #[error("Consistency error: {0}")]
    Consistency(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    /// Whether retrying the operation against the same backend can help.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StoreError::Connection(_) | StoreError::Timeout(_) | StoreError::Unavailable(_)
        )
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
