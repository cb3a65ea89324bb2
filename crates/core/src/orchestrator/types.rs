//! Types for the orchestrator.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::dedup::DedupError;
use crate::session::SessionError;
use crate::space::{SpaceError, SpaceReport};
use crate::store::{SessionCounters, SessionStatus, StoreError};

/// Errors that abort a run before or outside per-file processing.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// A run is already in progress on this orchestrator.
    #[error("a run is already in progress")]
    AlreadyRunning,

    /// Source or destination is unusable.
    #[error("invalid path {path}: {reason}")]
    InvalidPath { path: PathBuf, reason: String },

    /// The source tree could not be enumerated.
    #[error("failed to scan {root}")]
    ScanFailed {
        root: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Space(#[from] SpaceError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Dedup(#[from] DedupError),

    /// A background task panicked or was cancelled.
    #[error("task failed: {0}")]
    Task(String),
}

impl OrchestratorError {
    pub(crate) fn invalid_path(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::InvalidPath {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Lifecycle of the orchestrator itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrchestratorState {
    Idle,
    Scanning,
    Processing,
    Paused,
    Completed,
    Stopped,
    Error,
}

impl OrchestratorState {
    /// Whether a run is in flight.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Scanning | Self::Processing | Self::Paused)
    }
}

impl fmt::Display for OrchestratorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Scanning => "scanning",
            Self::Processing => "processing",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Stopped => "stopped",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// Request to migrate one source tree into one destination tree.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub source: PathBuf,
    pub destination: PathBuf,
}

impl RunRequest {
    pub fn new(source: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
        }
    }
}

/// Result of a finished run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub session_id: String,
    /// `Completed` or `Stopped`.
    pub status: SessionStatus,
    pub counters: SessionCounters,
    pub elapsed: Duration,
    pub preflight: SpaceReport,
}
