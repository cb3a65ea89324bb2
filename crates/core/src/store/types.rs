//! Persisted record types.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a migration session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Running,
    Paused,
    Completed,
    Stopped,
    Error,
    Undone,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Stopped => "stopped",
            Self::Error => "error",
            Self::Undone => "undone",
        }
    }

    /// Sessions in these states never change again except to `Undone`.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Stopped | Self::Error | Self::Undone
        )
    }

    /// Running or paused sessions are candidates for resumption.
    pub fn is_incomplete(&self) -> bool {
        matches!(self, Self::Running | Self::Paused)
    }

    /// Whether a session may move from `self` to `next`.
    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        if *self == next {
            return true;
        }
        match self {
            Self::Running | Self::Paused => true,
            Self::Completed | Self::Stopped | Self::Error => next == Self::Undone,
            Self::Undone => false,
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "paused" => Ok(Self::Paused),
            "completed" => Ok(Self::Completed),
            "stopped" => Ok(Self::Stopped),
            "error" => Ok(Self::Error),
            "undone" => Ok(Self::Undone),
            other => Err(format!("unknown session status: {}", other)),
        }
    }
}

/// Processing status of a single source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    Pending,
    Processing,
    Completed,
    Skipped,
    Duplicate,
    Error,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Skipped => "skipped",
            Self::Duplicate => "duplicate",
            Self::Error => "error",
        }
    }
}

impl FromStr for ProcessingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "skipped" => Ok(Self::Skipped),
            "duplicate" => Ok(Self::Duplicate),
            "error" => Ok(Self::Error),
            other => Err(format!("unknown processing status: {}", other)),
        }
    }
}

/// Status of a source → destination mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MappingStatus {
    /// Written before the file is committed. Settled on resume or undo.
    Pending,
    /// The destination file was produced and is owned by the session.
    Completed,
    /// The destination file was removed by undo.
    Undone,
}

impl MappingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Undone => "undone",
        }
    }
}

impl FromStr for MappingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "completed" => Ok(Self::Completed),
            "undone" => Ok(Self::Undone),
            other => Err(format!("unknown mapping status: {}", other)),
        }
    }
}

/// Aggregate counters persisted on the session row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCounters {
    pub files_scanned: u64,
    pub files_processed: u64,
    pub files_skipped: u64,
    pub files_duplicates: u64,
    pub files_error: u64,
    pub bytes_processed: u64,
    pub bytes_total: u64,
}

impl SessionCounters {
    /// Files that reached any terminal outcome.
    pub fn files_done(&self) -> u64 {
        self.files_processed + self.files_skipped + self.files_duplicates + self.files_error
    }

    /// Files scanned but not yet finished.
    pub fn files_pending(&self) -> u64 {
        self.files_scanned.saturating_sub(self.files_done())
    }
}

/// One migration run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub status: SessionStatus,
    pub source_root: PathBuf,
    pub destination_root: PathBuf,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub counters: SessionCounters,
    pub error_message: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Request to create a new session.
#[derive(Debug, Clone)]
pub struct CreateSessionRequest {
    pub source_root: PathBuf,
    pub destination_root: PathBuf,
}

/// Filter for listing sessions.
#[derive(Debug, Clone)]
pub struct SessionFilter {
    pub status: Option<SessionStatus>,
    pub limit: i64,
    pub offset: i64,
}

impl Default for SessionFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionFilter {
    pub fn new() -> Self {
        Self {
            status: None,
            limit: 100,
            offset: 0,
        }
    }

    pub fn with_status(mut self, status: SessionStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }
}

/// Per-file processing record, scoped to a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: i64,
    pub session_id: String,
    pub source_path: PathBuf,
    /// Content hash, `None` until computed.
    pub hash: Option<String>,
    pub size: u64,
    pub extension: Option<String>,
    pub category: Option<String>,
    pub status: ProcessingStatus,
    /// Canonical file record when `status` is `Duplicate`.
    pub duplicate_of: Option<i64>,
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Fields needed to register a file the first time the pipeline sees it.
#[derive(Debug, Clone)]
pub struct NewFileRecord {
    pub session_id: String,
    pub source_path: PathBuf,
    pub size: u64,
    pub extension: Option<String>,
}

/// Partial update applied to a file record. `None` fields are left untouched.
#[derive(Debug, Clone)]
pub struct FileRecordUpdate {
    pub status: ProcessingStatus,
    pub hash: Option<String>,
    pub category: Option<String>,
    pub duplicate_of: Option<i64>,
    pub error: Option<String>,
}

impl FileRecordUpdate {
    pub fn status(status: ProcessingStatus) -> Self {
        Self {
            status,
            hash: None,
            category: None,
            duplicate_of: None,
            error: None,
        }
    }

    pub fn with_hash(mut self, hash: impl Into<String>) -> Self {
        self.hash = Some(hash.into());
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_duplicate_of(mut self, id: i64) -> Self {
        self.duplicate_of = Some(id);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// A durable record that one source file produced one destination file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileMapping {
    pub id: i64,
    pub session_id: String,
    pub source_path: PathBuf,
    pub destination_path: PathBuf,
    /// Staged copy the destination is committed from, while pending.
    pub temp_path: Option<PathBuf>,
    pub size: u64,
    pub status: MappingStatus,
    pub created_at: DateTime<Utc>,
}

/// Mapping to record for a file about to be committed.
#[derive(Debug, Clone)]
pub struct NewMapping {
    pub session_id: String,
    pub source_path: PathBuf,
    pub destination_path: PathBuf,
    pub temp_path: Option<PathBuf>,
    pub size: u64,
}

/// Duplicate registry entry for one (hash, category) key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateGroup {
    pub id: i64,
    pub hash: String,
    pub category: String,
    pub canonical_id: i64,
    pub canonical_path: PathBuf,
    pub canonical_session: String,
    /// Set once the canonical file has been produced and mapped.
    pub confirmed: bool,
    pub duplicate_count: u64,
    pub created_at: DateTime<Utc>,
}

/// Cached content hash for a file at a given size and modification time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashCacheEntry {
    pub path: PathBuf,
    pub size: u64,
    /// Modification time in nanoseconds since the Unix epoch.
    pub mtime: i64,
    pub hash: String,
}
