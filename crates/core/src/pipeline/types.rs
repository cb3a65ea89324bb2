//! Types for the file pipeline.

use std::error::Error as StdError;
use std::fmt;
use std::io;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::content::MediaKind;
use crate::store::ProcessingStatus;

/// Pipeline stages, in the order a file passes through them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    AlreadyProcessed,
    SkippedByPattern,
    TypeDetected,
    UnknownTypeFilter,
    DuplicateCheck,
    Categorize,
    ResolveDestinationPath,
    ResolveNameConflict,
    PerformFileOperation,
    RecordMapping,
    UpdateProgress,
}

impl PipelineStage {
    pub const ALL: [PipelineStage; 11] = [
        Self::AlreadyProcessed,
        Self::SkippedByPattern,
        Self::TypeDetected,
        Self::UnknownTypeFilter,
        Self::DuplicateCheck,
        Self::Categorize,
        Self::ResolveDestinationPath,
        Self::ResolveNameConflict,
        Self::PerformFileOperation,
        Self::RecordMapping,
        Self::UpdateProgress,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AlreadyProcessed => "already_processed",
            Self::SkippedByPattern => "skipped_by_pattern",
            Self::TypeDetected => "type_detected",
            Self::UnknownTypeFilter => "unknown_type_filter",
            Self::DuplicateCheck => "duplicate_check",
            Self::Categorize => "categorize",
            Self::ResolveDestinationPath => "resolve_destination_path",
            Self::ResolveNameConflict => "resolve_name_conflict",
            Self::PerformFileOperation => "perform_file_operation",
            Self::RecordMapping => "record_mapping",
            Self::UpdateProgress => "update_progress",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure category of a per-file error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Locked file or temporary permission denial; worth retrying.
    TransientIo,
    /// Content could not be read to completion.
    Corrupted,
    HashCompute,
    SourceMissing,
    NameConflictExhausted,
    Io,
    Store,
}

impl ErrorKind {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientIo)
    }

    /// Classify an I/O error from a file operation.
    pub fn from_io(error: &io::Error) -> Self {
        match error.kind() {
            io::ErrorKind::NotFound => Self::SourceMissing,
            io::ErrorKind::PermissionDenied
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::Interrupted
            | io::ErrorKind::TimedOut
            | io::ErrorKind::ResourceBusy => Self::TransientIo,
            io::ErrorKind::InvalidData | io::ErrorKind::UnexpectedEof => Self::Corrupted,
            _ => Self::Io,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TransientIo => "transient_io",
            Self::Corrupted => "corrupted",
            Self::HashCompute => "hash_compute",
            Self::SourceMissing => "source_missing",
            Self::NameConflictExhausted => "name_conflict_exhausted",
            Self::Io => "io",
            Self::Store => "store",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A per-file failure with the stage it originated in.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind} at {stage} for {path}: {message}")]
pub struct FileError {
    pub kind: ErrorKind,
    pub stage: PipelineStage,
    pub path: PathBuf,
    pub message: String,
}

impl FileError {
    pub fn new(
        kind: ErrorKind,
        stage: PipelineStage,
        path: impl Into<PathBuf>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            stage,
            path: path.into(),
            message: message.into(),
        }
    }

    /// Build from an error, flattening its source chain into the message.
    pub fn from_error(
        kind: ErrorKind,
        stage: PipelineStage,
        path: impl Into<PathBuf>,
        error: &(dyn StdError + 'static),
    ) -> Self {
        Self::new(kind, stage, path, error_chain(error))
    }
}

/// `outer: inner: root` rendering of an error and its sources.
pub(crate) fn error_chain(error: &(dyn StdError + 'static)) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

/// Why a file was skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// The session already has a mapping for this source.
    AlreadyProcessed,
    /// Excluded by the named skip rule.
    Pattern(String),
    UnknownType,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyProcessed => f.write_str("already processed"),
            Self::Pattern(rule) => write!(f, "matched {rule}"),
            Self::UnknownType => f.write_str("unknown type"),
        }
    }
}

/// Terminal result of running one file through the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum FileOutcome {
    Completed {
        destination: PathBuf,
        bytes: u64,
        kind: MediaKind,
    },
    Skipped(SkipReason),
    Duplicate {
        /// File record id of the canonical file.
        of: i64,
        canonical_path: PathBuf,
    },
    Error(FileError),
    /// Abandoned at a stage boundary because the run is stopping.
    Stopped { stage: PipelineStage },
}

impl FileOutcome {
    /// Label used for logging and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Completed { .. } => "completed",
            Self::Skipped(_) => "skipped",
            Self::Duplicate { .. } => "duplicate",
            Self::Error(_) => "error",
            Self::Stopped { .. } => "stopped",
        }
    }

    /// Status persisted on the file record.
    pub fn processing_status(&self) -> ProcessingStatus {
        match self {
            Self::Completed { .. } => ProcessingStatus::Completed,
            Self::Skipped(_) => ProcessingStatus::Skipped,
            Self::Duplicate { .. } => ProcessingStatus::Duplicate,
            Self::Error(_) => ProcessingStatus::Error,
            Self::Stopped { .. } => ProcessingStatus::Pending,
        }
    }

    pub fn is_transient_error(&self) -> bool {
        matches!(self, Self::Error(e) if e.kind.is_transient())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_order() {
        let mut sorted = PipelineStage::ALL;
        sorted.sort();
        assert_eq!(sorted, PipelineStage::ALL);
        assert_eq!(PipelineStage::ALL[0], PipelineStage::AlreadyProcessed);
        assert_eq!(PipelineStage::ALL[10], PipelineStage::UpdateProgress);
    }

    #[test]
    fn test_io_classification() {
        let locked = io::Error::new(io::ErrorKind::PermissionDenied, "locked");
        assert_eq!(ErrorKind::from_io(&locked), ErrorKind::TransientIo);
        assert!(ErrorKind::from_io(&locked).is_transient());

        let gone = io::Error::new(io::ErrorKind::NotFound, "gone");
        assert_eq!(ErrorKind::from_io(&gone), ErrorKind::SourceMissing);

        let bad = io::Error::new(io::ErrorKind::InvalidData, "bad");
        assert_eq!(ErrorKind::from_io(&bad), ErrorKind::Corrupted);
        assert!(!ErrorKind::Corrupted.is_transient());
    }

    #[test]
    fn test_error_chain_message() {
        let inner = io::Error::new(io::ErrorKind::Other, "disk on fire");
        let outer = crate::placer::PlacerError::copy_failed(
            PathBuf::from("/a"),
            PathBuf::from("/b"),
            inner,
        );
        let err = FileError::from_error(
            ErrorKind::Io,
            PipelineStage::PerformFileOperation,
            "/a",
            &outer,
        );
        assert_eq!(
            err.message,
            "Failed to copy file from /a to /b: disk on fire"
        );
        assert_eq!(
            err.to_string(),
            "io at perform_file_operation for /a: Failed to copy file from /a to /b: disk on fire"
        );
    }

    #[test]
    fn test_outcome_status() {
        let stopped = FileOutcome::Stopped {
            stage: PipelineStage::Categorize,
        };
        assert_eq!(stopped.processing_status(), ProcessingStatus::Pending);
        assert_eq!(stopped.label(), "stopped");

        let transient = FileOutcome::Error(FileError::new(
            ErrorKind::TransientIo,
            PipelineStage::PerformFileOperation,
            "/a",
            "busy",
        ));
        assert!(transient.is_transient_error());
    }
}
