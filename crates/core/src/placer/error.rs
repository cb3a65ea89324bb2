//! Error types for the placer module.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur during file placement.
#[derive(Debug, Error)]
pub enum PlacerError {
    /// Source file not found.
    #[error("Source file not found: {path}")]
    SourceNotFound { path: PathBuf },

    /// Failed to create destination directory.
    #[error("Failed to create directory: {path}")]
    DirectoryCreationFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Failed to copy file.
    #[error("Failed to copy file from {source} to {destination}")]
    CopyFailed {
        source: PathBuf,
        destination: PathBuf,
        #[source]
        error: io::Error,
    },

    /// Failed to move the finished temporary file to its final name.
    #[error("Failed to commit {temp} as {destination}")]
    CommitFailed {
        temp: PathBuf,
        destination: PathBuf,
        #[source]
        error: io::Error,
    },

    /// Every suffixed name up to the limit was taken.
    #[error("No free name for {path} after {attempts} attempts")]
    NameConflictExhausted { path: PathBuf, attempts: u32 },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl PlacerError {
    /// Creates a copy failed error.
    pub fn copy_failed(source: PathBuf, destination: PathBuf, error: io::Error) -> Self {
        Self::CopyFailed {
            source,
            destination,
            error,
        }
    }

    /// The underlying I/O error, if any.
    pub fn io_error(&self) -> Option<&io::Error> {
        match self {
            Self::DirectoryCreationFailed { source, .. } => Some(source),
            Self::CopyFailed { error, .. } | Self::CommitFailed { error, .. } => Some(error),
            Self::Io(e) => Some(e),
            Self::SourceNotFound { .. } | Self::NameConflictExhausted { .. } => None,
        }
    }
}
