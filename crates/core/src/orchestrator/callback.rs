//! Progress notifications for the host application.

use std::path::Path;

use crate::pipeline::{FileError, SkipReason};
use crate::session::ProgressSnapshot;
use crate::store::SessionStatus;

/// Receives run progress.
///
/// Invoked only from the aggregator task, one call at a time and in
/// outcome order, never from workers. Implementations should return quickly.
pub trait ProgressCallback: Send + Sync {
    fn on_file_started(&self, _path: &Path) {}

    fn on_file_completed(&self, _source: &Path, _destination: &Path) {}

    fn on_file_skipped(&self, _path: &Path, _reason: &SkipReason) {}

    fn on_file_duplicate(&self, _path: &Path, _canonical: &Path) {}

    fn on_file_error(&self, _path: &Path, _error: &FileError) {}

    fn on_progress_tick(&self, _snapshot: &ProgressSnapshot) {}

    fn on_status_changed(&self, _status: SessionStatus) {}

    /// Processing was paused because free space fell below the threshold.
    fn on_low_space(&self, _available_bytes: u64, _threshold_bytes: u64) {}
}

/// Callback that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCallback;

impl ProgressCallback for NoopCallback {}
