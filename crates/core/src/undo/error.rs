//! Error types for the undo module.

use thiserror::Error;

use crate::session::SessionError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum UndoError {
    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Session(#[from] SessionError),
}
