//! Error types for the store module.

use thiserror::Error;

use super::SessionStatus;

/// Errors returned by [`SessionStore`](super::SessionStore) and
/// [`DedupStore`](super::DedupStore) implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No session with the given id.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// No file record with the given id.
    #[error("file record not found: {0}")]
    RecordNotFound(i64),

    /// No pending mapping with the given id.
    #[error("pending mapping not found: {0}")]
    MappingNotFound(i64),

    /// A uniqueness constraint rejected the write.
    #[error("conflicting write: {0}")]
    Conflict(String),

    /// The session cannot move from its current status to the requested one.
    #[error("invalid session transition from {from} to {to}")]
    InvalidTransition {
        from: SessionStatus,
        to: SessionStatus,
    },

    /// Underlying database failure.
    #[error("database error: {0}")]
    Database(String),
}

impl StoreError {
    /// Whether the failed write may succeed if the caller retries.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(e, _)
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                StoreError::Conflict(err.to_string())
            }
            _ => StoreError::Database(err.to_string()),
        }
    }
}
