//! Error types for the session module.

use std::path::PathBuf;

use thiserror::Error;

use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session not found: {0}")]
    NotFound(String),

    #[error("session {id} cannot be resumed: {reason}")]
    NotResumable { id: String, reason: String },

    #[error("failed to access snapshot {path}")]
    Snapshot {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("snapshot {path} is not valid")]
    SnapshotCorrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// The mapping writer task is gone.
    #[error("mapping writer is closed")]
    WriterClosed,

    #[error(transparent)]
    Store(#[from] StoreError),
}
