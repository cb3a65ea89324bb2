//! Point-in-time progress snapshots.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use super::SessionError;
use crate::store::{SessionCounters, SessionStatus};

/// Immutable summary of a session's counters at one instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub status: SessionStatus,
    pub files_scanned: u64,
    pub files_processed: u64,
    pub files_pending: u64,
    pub files_skipped: u64,
    pub files_duplicates: u64,
    pub files_error: u64,
    pub bytes_processed: u64,
    pub bytes_total: u64,
    /// Completed files per second since the run started.
    pub processing_rate: f64,
    /// Bytes per second since the run started.
    pub bytes_rate: f64,
    pub eta_seconds: Option<u64>,
    /// Completed files per media kind.
    #[serde(default)]
    pub category_counts: BTreeMap<String, u64>,
    /// Display form of the file being processed.
    pub current_file: Option<String>,
}

impl ProgressSnapshot {
    /// Build a snapshot from aggregate counters and the time spent processing.
    pub fn from_counters(
        session_id: impl Into<String>,
        status: SessionStatus,
        counters: &SessionCounters,
        elapsed: Duration,
        category_counts: BTreeMap<String, u64>,
        current_file: Option<&Path>,
    ) -> Self {
        let secs = elapsed.as_secs_f64();
        let (processing_rate, bytes_rate) = if secs > 0.0 {
            (
                counters.files_processed as f64 / secs,
                counters.bytes_processed as f64 / secs,
            )
        } else {
            (0.0, 0.0)
        };
        let pending = counters.files_pending();
        let eta_seconds = if pending == 0 {
            Some(0)
        } else if processing_rate > 0.0 {
            Some((pending as f64 / processing_rate).ceil() as u64)
        } else {
            None
        };

        Self {
            session_id: session_id.into(),
            timestamp: Utc::now(),
            status,
            files_scanned: counters.files_scanned,
            files_processed: counters.files_processed,
            files_pending: pending,
            files_skipped: counters.files_skipped,
            files_duplicates: counters.files_duplicates,
            files_error: counters.files_error,
            bytes_processed: counters.bytes_processed,
            bytes_total: counters.bytes_total,
            processing_rate,
            bytes_rate,
            eta_seconds,
            category_counts,
            current_file: current_file.map(|p| p.to_string_lossy().into_owned()),
        }
    }

    /// Recompute rates and ETA from the work done since `baseline`.
    ///
    /// A resumed session starts with files already processed; counting
    /// those against the new run's elapsed time would inflate the rate.
    pub fn with_baseline(mut self, baseline: &SessionCounters, elapsed: Duration) -> Self {
        let secs = elapsed.as_secs_f64();
        let files = self.files_processed.saturating_sub(baseline.files_processed);
        let bytes = self.bytes_processed.saturating_sub(baseline.bytes_processed);
        if secs > 0.0 {
            self.processing_rate = files as f64 / secs;
            self.bytes_rate = bytes as f64 / secs;
        }
        self.eta_seconds = if self.files_pending == 0 {
            Some(0)
        } else if self.processing_rate > 0.0 {
            Some((self.files_pending as f64 / self.processing_rate).ceil() as u64)
        } else {
            None
        };
        self
    }

    pub fn counters(&self) -> SessionCounters {
        SessionCounters {
            files_scanned: self.files_scanned,
            files_processed: self.files_processed,
            files_skipped: self.files_skipped,
            files_duplicates: self.files_duplicates,
            files_error: self.files_error,
            bytes_processed: self.bytes_processed,
            bytes_total: self.bytes_total,
        }
    }

    /// Share of scanned files that reached a terminal outcome, 0–100.
    pub fn percent_complete(&self) -> f64 {
        if self.files_scanned == 0 {
            return 0.0;
        }
        self.counters().files_done() as f64 * 100.0 / self.files_scanned as f64
    }
}

/// The snapshot file of one destination root.
#[derive(Debug, Clone)]
pub struct SnapshotFile {
    path: PathBuf,
}

impl SnapshotFile {
    /// Location relative to the destination root.
    pub const RELATIVE_PATH: &'static str = "conf/progress.json";

    pub fn for_destination(destination_root: &Path) -> Self {
        Self {
            path: destination_root.join(Self::RELATIVE_PATH),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> SessionError {
        SessionError::Snapshot {
            path: self.path.clone(),
            source,
        }
    }

    /// Replace the snapshot atomically: write a sibling temp file, sync, rename.
    pub async fn write(&self, snapshot: &ProgressSnapshot) -> Result<(), SessionError> {
        let parent = self.path.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent)
            .await
            .map_err(|e| self.io_error(e))?;

        let json = serde_json::to_vec_pretty(snapshot).map_err(|e| {
            SessionError::SnapshotCorrupt {
                path: self.path.clone(),
                source: e,
            }
        })?;

        let temp = parent.join(format!(".progress.{}.tmp", Uuid::new_v4().simple()));
        let result = async {
            let mut file = OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&temp)
                .await?;
            file.write_all(&json).await?;
            file.sync_all().await?;
            fs::rename(&temp, &self.path).await
        }
        .await;

        if let Err(e) = result {
            let _ = fs::remove_file(&temp).await;
            return Err(self.io_error(e));
        }

        // Persist the rename itself.
        if let Ok(dir) = File::open(parent).await {
            let _ = dir.sync_all().await;
        }
        Ok(())
    }

    /// Load the snapshot; a missing file is `None`.
    pub async fn load(&self) -> Result<Option<ProgressSnapshot>, SessionError> {
        let bytes = match fs::read(&self.path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.io_error(e)),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| SessionError::SnapshotCorrupt {
                path: self.path.clone(),
                source: e,
            })
    }

    /// Delete the snapshot. Missing files are fine.
    pub async fn clear(&self) -> Result<(), SessionError> {
        match fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.io_error(e)),
        }
    }
}
