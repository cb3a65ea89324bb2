//! Error types for the dedup module.

use std::path::PathBuf;

use thiserror::Error;

use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum DedupError {
    /// The file could not be read to completion.
    #[error("failed to hash {path}")]
    HashCompute {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The registry kept rejecting writes for this key.
    #[error("duplicate registry contention for {hash}/{category}")]
    RegistryContention { hash: String, category: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl DedupError {
    pub fn hash_compute(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::HashCompute {
            path: path.into(),
            source,
        }
    }
}
