//! Single owner of the run's counters.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use super::ProgressCallback;
use crate::metrics;
use crate::pipeline::{FileOutcome, SkipReason};
use crate::scan::SourceEntry;
use crate::session::{ProgressSnapshot, SnapshotFile};
use crate::space::LowSpace;
use crate::store::{Session, SessionCounters, SessionStatus, SessionStore};

/// Everything workers and controllers report to the aggregator.
#[derive(Debug)]
pub(crate) enum AggregatorEvent {
    Started(PathBuf),
    /// Bytes moved for the file currently being handled.
    Bytes(PathBuf),
    Finished {
        entry: SourceEntry,
        outcome: FileOutcome,
    },
    Status(SessionStatus),
    LowSpace(LowSpace),
}

/// Merges outcomes into counters, persists them, writes snapshots and
/// notifies the callback, strictly in that order for every event.
pub(crate) struct Aggregator {
    rx: mpsc::Receiver<AggregatorEvent>,
    session_id: String,
    status: SessionStatus,
    store: Arc<dyn SessionStore>,
    snapshot_file: SnapshotFile,
    callback: Arc<dyn ProgressCallback>,
    published: Arc<watch::Sender<Option<ProgressSnapshot>>>,
    counters: SessionCounters,
    baseline: SessionCounters,
    category_counts: BTreeMap<String, u64>,
    current_file: Option<PathBuf>,
    started: Instant,
    tick_interval: Duration,
    last_tick: Instant,
}

impl Aggregator {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        rx: mpsc::Receiver<AggregatorEvent>,
        session: &Session,
        counters: SessionCounters,
        store: Arc<dyn SessionStore>,
        callback: Arc<dyn ProgressCallback>,
        published: Arc<watch::Sender<Option<ProgressSnapshot>>>,
        tick_interval: Duration,
    ) -> Self {
        let now = Instant::now();
        Self {
            rx,
            session_id: session.id.clone(),
            status: session.status,
            store,
            snapshot_file: SnapshotFile::for_destination(&session.destination_root),
            callback,
            published,
            counters,
            baseline: counters,
            category_counts: BTreeMap::new(),
            current_file: None,
            started: now,
            tick_interval,
            last_tick: now,
        }
    }

    /// Consume events until every sender is dropped; returns the final counters.
    pub(crate) async fn run(mut self) -> SessionCounters {
        debug!("Aggregator started for session {}", self.session_id);
        while let Some(event) = self.rx.recv().await {
            self.handle(event).await;
        }
        debug!("Aggregator finished for session {}", self.session_id);
        self.counters
    }

    async fn handle(&mut self, event: AggregatorEvent) {
        match event {
            AggregatorEvent::Started(path) => {
                self.callback.on_file_started(&path);
                self.current_file = Some(path);
            }
            AggregatorEvent::Bytes(path) => {
                self.current_file = Some(path);
                if self.last_tick.elapsed() >= self.tick_interval {
                    let snapshot = self.persist_snapshot().await;
                    self.callback.on_progress_tick(&snapshot);
                }
            }
            AggregatorEvent::Finished { entry, outcome } => self.finish(entry, outcome).await,
            AggregatorEvent::Status(status) => self.change_status(status).await,
            AggregatorEvent::LowSpace(event) => {
                self.callback
                    .on_low_space(event.available_bytes, event.threshold_bytes);
            }
        }
    }

    async fn finish(&mut self, entry: SourceEntry, outcome: FileOutcome) {
        let path = entry.path;
        match &outcome {
            FileOutcome::Completed { bytes, kind, .. } => {
                self.counters.files_processed += 1;
                self.counters.bytes_processed += bytes;
                *self
                    .category_counts
                    .entry(kind.as_str().to_string())
                    .or_default() += 1;
                metrics::BYTES_COPIED.inc_by(*bytes);
            }
            // Counted when the session first produced it.
            FileOutcome::Skipped(SkipReason::AlreadyProcessed) => {}
            FileOutcome::Skipped(_) => self.counters.files_skipped += 1,
            FileOutcome::Duplicate { .. } => self.counters.files_duplicates += 1,
            FileOutcome::Error(e) => {
                warn!("{}", e);
                self.counters.files_error += 1;
            }
            FileOutcome::Stopped { .. } => {}
        }
        metrics::FILES_PROCESSED
            .with_label_values(&[outcome.label()])
            .inc();
        if self.current_file.as_deref() == Some(path.as_path()) {
            self.current_file = None;
        }

        if let Err(e) = self.store.update_counters(&self.session_id, &self.counters) {
            error!("Failed to persist counters for {}: {}", self.session_id, e);
        }
        let snapshot = self.persist_snapshot().await;

        match &outcome {
            FileOutcome::Completed { destination, .. } => {
                self.callback.on_file_completed(&path, destination)
            }
            FileOutcome::Skipped(reason) => self.callback.on_file_skipped(&path, reason),
            FileOutcome::Duplicate { canonical_path, .. } => {
                self.callback.on_file_duplicate(&path, canonical_path)
            }
            FileOutcome::Error(e) => self.callback.on_file_error(&path, e),
            FileOutcome::Stopped { .. } => {}
        }
        self.callback.on_progress_tick(&snapshot);
    }

    async fn change_status(&mut self, status: SessionStatus) {
        if let Err(e) = self.store.update_status(&self.session_id, status, None) {
            error!(
                "Failed to set session {} to {}: {}",
                self.session_id, status, e
            );
        }
        if status != self.status {
            info!("Session {} is now {}", self.session_id, status);
        }
        self.status = status;

        let snapshot = self.persist_snapshot().await;
        self.callback.on_status_changed(status);
        self.callback.on_progress_tick(&snapshot);
    }

    fn snapshot(&self) -> ProgressSnapshot {
        let elapsed = self.started.elapsed();
        ProgressSnapshot::from_counters(
            self.session_id.clone(),
            self.status,
            &self.counters,
            elapsed,
            self.category_counts.clone(),
            self.current_file.as_deref(),
        )
        .with_baseline(&self.baseline, elapsed)
    }

    async fn persist_snapshot(&mut self) -> ProgressSnapshot {
        let snapshot = self.snapshot();
        if let Err(e) = self.snapshot_file.write(&snapshot).await {
            error!("Failed to write progress snapshot: {}", e);
        }
        self.published.send_replace(Some(snapshot.clone()));
        self.last_tick = Instant::now();
        snapshot
    }
}
