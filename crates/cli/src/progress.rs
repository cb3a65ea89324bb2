//! Log-based progress reporting.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, info, warn};

use archivist_core::{FileError, ProgressCallback, ProgressSnapshot, SessionStatus, SkipReason};

/// Writes run progress to the log, at most once per completed ten percent.
#[derive(Debug, Default)]
pub struct LogProgress {
    last_decile: AtomicU64,
}

impl LogProgress {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProgressCallback for LogProgress {
    fn on_file_completed(&self, source: &Path, destination: &Path) {
        debug!("{} -> {}", source.display(), destination.display());
    }

    fn on_file_skipped(&self, path: &Path, reason: &SkipReason) {
        debug!("Skipped {} ({})", path.display(), reason);
    }

    fn on_file_duplicate(&self, path: &Path, canonical: &Path) {
        debug!("{} duplicates {}", path.display(), canonical.display());
    }

    fn on_file_error(&self, path: &Path, error: &FileError) {
        warn!("Failed {}: {}", path.display(), error.message);
    }

    fn on_progress_tick(&self, snapshot: &ProgressSnapshot) {
        let decile = (snapshot.percent_complete() / 10.0).floor() as u64;
        let previous = self.last_decile.swap(decile, Ordering::Relaxed);
        if decile > previous {
            let eta = snapshot
                .eta_seconds
                .map(|s| format!("{}s", s))
                .unwrap_or_else(|| "unknown".to_string());
            info!(
                "{:.0}% ({}/{} files, {} duplicates, {} errors), {:.1} files/s, ETA {}",
                snapshot.percent_complete(),
                snapshot.counters().files_done(),
                snapshot.files_scanned,
                snapshot.files_duplicates,
                snapshot.files_error,
                snapshot.processing_rate,
                eta
            );
        }
    }

    fn on_status_changed(&self, status: SessionStatus) {
        info!("Session status: {}", status);
    }

    fn on_low_space(&self, available_bytes: u64, threshold_bytes: u64) {
        warn!(
            "Only {} bytes free at the destination (threshold {}); paused until space is freed",
            available_bytes, threshold_bytes
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use archivist_core::SessionCounters;
    use std::collections::BTreeMap;
    use std::time::Duration;

    fn snapshot(done: u64) -> ProgressSnapshot {
        ProgressSnapshot::from_counters(
            "s",
            SessionStatus::Running,
            &SessionCounters {
                files_scanned: 100,
                files_processed: done,
                ..Default::default()
            },
            Duration::from_secs(1),
            BTreeMap::new(),
            None,
        )
    }

    #[test]
    fn test_tracks_last_logged_decile() {
        let progress = LogProgress::new();
        progress.on_progress_tick(&snapshot(15));
        assert_eq!(progress.last_decile.load(Ordering::Relaxed), 1);
        progress.on_progress_tick(&snapshot(42));
        assert_eq!(progress.last_decile.load(Ordering::Relaxed), 4);
    }
}
