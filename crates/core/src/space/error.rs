//! Space monitor errors.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SpaceError {
    /// The destination cannot hold the estimated output.
    #[error("insufficient space: {required} bytes required, {available} bytes available")]
    InsufficientSpace { required: u64, available: u64 },

    /// Free space could not be determined.
    #[error("cannot determine free space for {path}: {message}")]
    Probe { path: PathBuf, message: String },
}
