//! Progress callback that records everything it receives.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use crate::orchestrator::ProgressCallback;
use crate::pipeline::{ErrorKind, FileError, SkipReason};
use crate::session::ProgressSnapshot;
use crate::store::SessionStatus;

/// One recorded callback invocation.
#[derive(Debug, Clone)]
pub enum CallbackEvent {
    Started(PathBuf),
    Completed {
        source: PathBuf,
        destination: PathBuf,
    },
    Skipped {
        path: PathBuf,
        reason: SkipReason,
    },
    Duplicate {
        path: PathBuf,
        canonical: PathBuf,
    },
    Error {
        path: PathBuf,
        kind: ErrorKind,
    },
    Tick(ProgressSnapshot),
    Status(SessionStatus),
    LowSpace {
        available_bytes: u64,
        threshold_bytes: u64,
    },
}

/// Records every callback in invocation order.
#[derive(Debug, Default)]
pub struct RecordingCallback {
    events: Mutex<Vec<CallbackEvent>>,
}

impl RecordingCallback {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<CallbackEvent>> {
        self.events.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn record(&self, event: CallbackEvent) {
        self.lock().push(event);
    }

    pub fn events(&self) -> Vec<CallbackEvent> {
        self.lock().clone()
    }

    pub fn statuses(&self) -> Vec<SessionStatus> {
        self.lock()
            .iter()
            .filter_map(|e| match e {
                CallbackEvent::Status(s) => Some(*s),
                _ => None,
            })
            .collect()
    }

    /// `(source, destination)` of every completed file.
    pub fn completed(&self) -> Vec<(PathBuf, PathBuf)> {
        self.lock()
            .iter()
            .filter_map(|e| match e {
                CallbackEvent::Completed {
                    source,
                    destination,
                } => Some((source.clone(), destination.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn ticks(&self) -> Vec<ProgressSnapshot> {
        self.lock()
            .iter()
            .filter_map(|e| match e {
                CallbackEvent::Tick(s) => Some(s.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}

impl ProgressCallback for RecordingCallback {
    fn on_file_started(&self, path: &Path) {
        self.record(CallbackEvent::Started(path.to_path_buf()));
    }

    fn on_file_completed(&self, source: &Path, destination: &Path) {
        self.record(CallbackEvent::Completed {
            source: source.to_path_buf(),
            destination: destination.to_path_buf(),
        });
    }

    fn on_file_skipped(&self, path: &Path, reason: &SkipReason) {
        self.record(CallbackEvent::Skipped {
            path: path.to_path_buf(),
            reason: reason.clone(),
        });
    }

    fn on_file_duplicate(&self, path: &Path, canonical: &Path) {
        self.record(CallbackEvent::Duplicate {
            path: path.to_path_buf(),
            canonical: canonical.to_path_buf(),
        });
    }

    fn on_file_error(&self, path: &Path, error: &FileError) {
        self.record(CallbackEvent::Error {
            path: path.to_path_buf(),
            kind: error.kind,
        });
    }

    fn on_progress_tick(&self, snapshot: &ProgressSnapshot) {
        self.record(CallbackEvent::Tick(snapshot.clone()));
    }

    fn on_status_changed(&self, status: SessionStatus) {
        self.record(CallbackEvent::Status(status));
    }

    fn on_low_space(&self, available_bytes: u64, threshold_bytes: u64) {
        self.record(CallbackEvent::LowSpace {
            available_bytes,
            threshold_bytes,
        });
    }
}
