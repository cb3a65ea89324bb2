//! Run orchestrator implementation.
//!
//! One run walks the source tree once, then feeds every entry through a
//! bounded queue to a fixed pool of workers. Workers report outcomes to a
//! single aggregator task which owns the counters.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::content::MediaProcessor;
use crate::dedup::DedupEngine;
use crate::metrics;
use crate::pipeline::{FileOutcome, FilePipeline, PipelineConfig};
use crate::placer::{ByteProgress, FsPlacer, Placer};
use crate::scan::{attach_sidecars, SourceEntry, SourceEnumerator};
use crate::session::{create_mapping_writer, ProgressSnapshot, SessionManager};
use crate::space::{LowSpace, SpaceMonitor, SpaceReport};
use crate::store::{Session, SessionCounters, SessionStatus, SessionStore};

use super::aggregator::{Aggregator, AggregatorEvent};
use super::callback::{NoopCallback, ProgressCallback};
use super::config::{OrchestratorConfig, RetryConfig};
use super::gate::{GateState, RunGate};
use super::types::{OrchestratorError, OrchestratorState, RunRequest, RunSummary};

/// Byte-progress events are sent at most once per this many bytes.
const BYTE_PROGRESS_STEP: u64 = 1024 * 1024;

/// Services a run depends on.
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn SessionStore>,
    pub dedup: Arc<DedupEngine>,
    pub processor: Arc<dyn MediaProcessor>,
    pub placer: Arc<dyn Placer>,
    pub enumerator: Arc<dyn SourceEnumerator>,
    pub space: SpaceMonitor,
}

/// Control handles of the run in flight.
#[derive(Clone)]
struct RunControl {
    gate: RunGate,
    /// Set once processing starts.
    events: Option<mpsc::Sender<AggregatorEvent>>,
}

/// Drives one migration run at a time.
pub struct Orchestrator {
    config: OrchestratorConfig,
    pipeline_config: PipelineConfig,
    parts: Collaborators,
    sessions: SessionManager,
    callback: Arc<dyn ProgressCallback>,
    state: Arc<watch::Sender<OrchestratorState>>,
    progress: Arc<watch::Sender<Option<ProgressSnapshot>>>,
    active: Mutex<Option<RunControl>>,
}

impl Orchestrator {
    pub fn new(
        config: OrchestratorConfig,
        pipeline_config: PipelineConfig,
        parts: Collaborators,
    ) -> Self {
        let (state, _) = watch::channel(OrchestratorState::Idle);
        let (progress, _) = watch::channel(None);
        Self {
            config,
            pipeline_config,
            sessions: SessionManager::new(Arc::clone(&parts.store)),
            parts,
            callback: Arc::new(NoopCallback),
            state: Arc::new(state),
            progress: Arc::new(progress),
            active: Mutex::new(None),
        }
    }

    /// Route progress notifications to `callback`.
    pub fn with_callback(mut self, callback: Arc<dyn ProgressCallback>) -> Self {
        self.callback = callback;
        self
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn state(&self) -> OrchestratorState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<OrchestratorState> {
        self.state.subscribe()
    }

    /// Latest snapshot of the current or last run.
    pub fn progress(&self) -> Option<ProgressSnapshot> {
        self.progress.borrow().clone()
    }

    pub fn subscribe_progress(&self) -> watch::Receiver<Option<ProgressSnapshot>> {
        self.progress.subscribe()
    }

    /// Migrate `request.source` into `request.destination` under a new session.
    pub async fn run(&self, request: RunRequest) -> Result<RunSummary, OrchestratorError> {
        let gate = self.begin().await?;
        let result = self.start_new(&request, gate).await;
        self.finish(result).await
    }

    /// Continue an interrupted session, skipping every source it already mapped.
    pub async fn resume(&self, session_id: &str) -> Result<RunSummary, OrchestratorError> {
        let gate = self.begin().await?;
        let result = self.start_resume(session_id, gate).await;
        self.finish(result).await
    }

    /// Hold workers at their next stage boundary. Returns `false` when no
    /// run is processing.
    pub async fn pause(&self) -> bool {
        let Some(control) = self.active.lock().await.clone() else {
            return false;
        };
        if !control.gate.pause() {
            return false;
        }
        info!("Pausing run");
        self.state.send_replace(OrchestratorState::Paused);
        if let Some(events) = control.events {
            let _ = events
                .send(AggregatorEvent::Status(SessionStatus::Paused))
                .await;
        }
        true
    }

    /// Release workers held by [`pause`](Self::pause) or by low space.
    pub async fn resume_processing(&self) -> bool {
        let Some(control) = self.active.lock().await.clone() else {
            return false;
        };
        if !control.gate.resume() {
            return false;
        }
        info!("Resuming run");
        if control.events.is_some() {
            self.state.send_replace(OrchestratorState::Processing);
        } else {
            self.state.send_replace(OrchestratorState::Scanning);
        }
        if let Some(events) = control.events {
            let _ = events
                .send(AggregatorEvent::Status(SessionStatus::Running))
                .await;
        }
        true
    }

    /// Ask the run to wind down. In-flight files finish their current stage
    /// and are left pending.
    pub async fn stop(&self) -> bool {
        let Some(control) = self.active.lock().await.clone() else {
            return false;
        };
        info!("Stopping run");
        control.gate.stop();
        true
    }

    async fn begin(&self) -> Result<RunGate, OrchestratorError> {
        let mut active = self.active.lock().await;
        if active.is_some() {
            return Err(OrchestratorError::AlreadyRunning);
        }
        let gate = RunGate::new();
        *active = Some(RunControl {
            gate: gate.clone(),
            events: None,
        });
        self.state.send_replace(OrchestratorState::Scanning);
        Ok(gate)
    }

    async fn finish(
        &self,
        result: Result<RunSummary, OrchestratorError>,
    ) -> Result<RunSummary, OrchestratorError> {
        *self.active.lock().await = None;
        match &result {
            Ok(summary) => {
                let state = if summary.status == SessionStatus::Completed {
                    OrchestratorState::Completed
                } else {
                    OrchestratorState::Stopped
                };
                self.state.send_replace(state);
            }
            Err(e) => {
                error!("Run failed: {}", e);
                self.state.send_replace(OrchestratorState::Error);
            }
        }
        result
    }

    async fn start_new(
        &self,
        request: &RunRequest,
        gate: RunGate,
    ) -> Result<RunSummary, OrchestratorError> {
        let (source, destination) = prepare_roots(&request.source, &request.destination).await?;
        let entries = self.scan(&source).await?;
        let total_bytes: u64 = entries.iter().map(SourceEntry::total_size).sum();
        info!(
            "Scanned {} files ({} bytes) under {}",
            entries.len(),
            total_bytes,
            source.display()
        );

        let preflight = self.parts.space.preflight(total_bytes, &destination)?;
        let session = self.sessions.create_session(&source, &destination)?;
        let counters = SessionCounters {
            files_scanned: entries.len() as u64,
            bytes_total: total_bytes,
            ..Default::default()
        };
        self.execute(session, entries, counters, preflight, gate)
            .await
    }

    async fn start_resume(
        &self,
        session_id: &str,
        gate: RunGate,
    ) -> Result<RunSummary, OrchestratorError> {
        let point = self.sessions.prepare_resume(session_id).await?;
        let session = point.session;
        let confirmed = self.parts.dedup.confirm_mapped(&session.id)?;
        if confirmed > 0 {
            debug!("Confirmed {} canonical claims of mapped files", confirmed);
        }
        if let Some(snapshot) = &point.snapshot {
            info!(
                "Last snapshot of {} at {}: {}/{} files done",
                session.id,
                snapshot.timestamp,
                snapshot.counters().files_done(),
                snapshot.files_scanned
            );
        }

        let destination = session.destination_root.clone();
        let swept = tokio::task::spawn_blocking(move || FsPlacer::sweep_partials(&destination))
            .await
            .map_err(|e| OrchestratorError::Task(e.to_string()))?;
        match swept {
            Ok(0) => {}
            Ok(n) => info!("Removed {} partial files from an interrupted run", n),
            Err(e) => warn!("Failed to sweep partial files: {}", e),
        }

        let entries = self.scan(&session.source_root).await?;
        let mut counters = SessionCounters {
            files_scanned: entries.len() as u64,
            ..Default::default()
        };
        let mut remaining = Vec::with_capacity(entries.len());
        for entry in entries {
            counters.bytes_total += entry.total_size();
            if !point.mapped_sources.contains(&entry.path) {
                remaining.push(entry);
                continue;
            }
            counters.files_processed += 1;
            counters.bytes_processed += entry.total_size();
            // Queued again only to place the sidecars it is still missing.
            if entry
                .sidecars
                .iter()
                .any(|s| !point.mapped_sources.contains(&s.path))
            {
                remaining.push(entry);
            }
        }
        info!(
            "Resuming session {}: {} of {} files already mapped",
            session.id, counters.files_processed, counters.files_scanned
        );

        let remaining_bytes = counters.bytes_total - counters.bytes_processed;
        let preflight = self
            .parts
            .space
            .preflight(remaining_bytes, &session.destination_root)?;
        let session = self
            .sessions
            .update_status(&session.id, SessionStatus::Running, None)?;
        self.execute(session, remaining, counters, preflight, gate)
            .await
    }

    /// Walk `root` off the async runtime and pair sidecars with their main
    /// files. Unreadable entries are logged and skipped.
    async fn scan(&self, root: &Path) -> Result<Vec<SourceEntry>, OrchestratorError> {
        let enumerator = Arc::clone(&self.parts.enumerator);
        let sidecar_extensions = self.pipeline_config.sidecar_extensions.clone();
        let root = root.to_path_buf();
        tokio::task::spawn_blocking(move || {
            std::fs::read_dir(&root).map_err(|source| OrchestratorError::ScanFailed {
                root: root.clone(),
                source,
            })?;
            let mut entries = Vec::new();
            for item in enumerator.enumerate(&root) {
                match item {
                    Ok(entry) => entries.push(entry),
                    Err(e) => warn!("Skipping unreadable entry: {}", e),
                }
            }
            Ok(attach_sidecars(entries, &sidecar_extensions))
        })
        .await
        .map_err(|e| OrchestratorError::Task(e.to_string()))?
    }

    async fn execute(
        &self,
        session: Session,
        entries: Vec<SourceEntry>,
        counters: SessionCounters,
        preflight: SpaceReport,
        gate: RunGate,
    ) -> Result<RunSummary, OrchestratorError> {
        let started = Instant::now();
        let capacity = self.config.queue_capacity.max(1);
        let store = Arc::clone(&self.parts.store);

        let (mappings, writer) = create_mapping_writer(Arc::clone(&store), capacity);
        let writer_task = tokio::spawn(writer.run());

        let (events_tx, events_rx) = mpsc::channel(capacity);
        let aggregator = Aggregator::new(
            events_rx,
            &session,
            counters,
            Arc::clone(&store),
            Arc::clone(&self.callback),
            Arc::clone(&self.progress),
            Duration::from_millis(self.config.progress_interval_ms),
        );
        let aggregator_task = tokio::spawn(aggregator.run());

        {
            let mut active = self.active.lock().await;
            if let Some(control) = active.as_mut() {
                control.events = Some(events_tx.clone());
            }
        }
        let initial_status = if gate.state() == GateState::Paused {
            self.state.send_replace(OrchestratorState::Paused);
            SessionStatus::Paused
        } else {
            self.state.send_replace(OrchestratorState::Processing);
            SessionStatus::Running
        };
        let _ = events_tx
            .send(AggregatorEvent::Status(initial_status))
            .await;

        let pipeline = Arc::new(FilePipeline::new(
            &self.pipeline_config,
            &session,
            Arc::clone(&store),
            Arc::clone(&self.parts.dedup),
            Arc::clone(&self.parts.processor),
            Arc::clone(&self.parts.placer),
            mappings,
        ));

        // Space watch and the auto-pause it drives.
        let (shutdown_tx, _) = broadcast::channel(1);
        let (low_tx, low_rx) = mpsc::channel(4);
        let watch_task = {
            let space = self.parts.space.clone();
            let destination = session.destination_root.clone();
            let shutdown_rx = shutdown_tx.subscribe();
            tokio::spawn(async move { space.watch(destination, low_tx, shutdown_rx).await })
        };
        let auto_pause_task = tokio::spawn(auto_pause(
            low_rx,
            gate.clone(),
            Arc::clone(&self.state),
            events_tx.clone(),
        ));

        let total = entries.len();
        let (work_tx, work_rx) = mpsc::channel(capacity);
        let work_rx = Arc::new(Mutex::new(work_rx));
        let feeder_task = tokio::spawn(feed(entries, work_tx, gate.clone()));

        let workers = self.config.workers.max(1);
        info!(
            "Processing {} files for session {} with {} workers",
            total, session.id, workers
        );
        let handles: Vec<JoinHandle<()>> = (0..workers)
            .map(|id| {
                tokio::spawn(worker(
                    id,
                    Arc::clone(&work_rx),
                    Arc::clone(&pipeline),
                    gate.clone(),
                    events_tx.clone(),
                    self.config.retry.clone(),
                ))
            })
            .collect();
        drop(work_rx);

        let mut task_failure = None;
        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                error!("Worker task failed: {}", e);
                task_failure.get_or_insert_with(|| e.to_string());
            }
        }
        if let Err(e) = feeder_task.await {
            error!("Feeder task failed: {}", e);
        }
        let _ = shutdown_tx.send(());
        if let Err(e) = watch_task.await {
            warn!("Space watch task failed: {}", e);
        }
        if let Err(e) = auto_pause_task.await {
            warn!("Auto-pause task failed: {}", e);
        }

        let status = if gate.is_stopping() {
            SessionStatus::Stopped
        } else {
            SessionStatus::Completed
        };
        let _ = events_tx.send(AggregatorEvent::Status(status)).await;

        // The aggregator ends once every sender is gone.
        drop(events_tx);
        if let Some(control) = self.active.lock().await.as_mut() {
            control.events = None;
        }
        drop(pipeline);

        let counters = aggregator_task
            .await
            .map_err(|e| OrchestratorError::Task(e.to_string()))?;
        writer_task
            .await
            .map_err(|e| OrchestratorError::Task(e.to_string()))?;
        if let Some(reason) = task_failure {
            return Err(OrchestratorError::Task(reason));
        }

        if status == SessionStatus::Completed {
            if let Err(e) = self.sessions.clear_snapshot(&session).await {
                warn!("Failed to clear snapshot of {}: {}", session.id, e);
            }
        }

        let elapsed = started.elapsed();
        info!(
            "Session {} {} in {:.1}s: {} processed, {} duplicates, {} skipped, {} errors",
            session.id,
            status,
            elapsed.as_secs_f64(),
            counters.files_processed,
            counters.files_duplicates,
            counters.files_skipped,
            counters.files_error
        );

        Ok(RunSummary {
            session_id: session.id,
            status,
            counters,
            elapsed,
            preflight,
        })
    }
}

/// Canonical source and destination roots, creating the destination.
async fn prepare_roots(
    source: &Path,
    destination: &Path,
) -> Result<(PathBuf, PathBuf), OrchestratorError> {
    let source = tokio::fs::canonicalize(source)
        .await
        .map_err(|e| OrchestratorError::invalid_path(source, e.to_string()))?;
    let is_dir = tokio::fs::metadata(&source)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false);
    if !is_dir {
        return Err(OrchestratorError::invalid_path(&source, "not a directory"));
    }

    tokio::fs::create_dir_all(destination)
        .await
        .map_err(|e| OrchestratorError::invalid_path(destination, e.to_string()))?;
    let destination = tokio::fs::canonicalize(destination)
        .await
        .map_err(|e| OrchestratorError::invalid_path(destination, e.to_string()))?;

    if destination.starts_with(&source) {
        return Err(OrchestratorError::invalid_path(
            &destination,
            "destination is inside the source tree",
        ));
    }
    Ok((source, destination))
}

async fn feed(entries: Vec<SourceEntry>, queue: mpsc::Sender<SourceEntry>, gate: RunGate) {
    for entry in entries {
        if gate.is_stopping() {
            break;
        }
        if queue.send(entry).await.is_err() {
            break;
        }
    }
    debug!("Feeder finished");
}

async fn worker(
    id: usize,
    queue: Arc<Mutex<mpsc::Receiver<SourceEntry>>>,
    pipeline: Arc<FilePipeline>,
    gate: RunGate,
    events: mpsc::Sender<AggregatorEvent>,
    retry: RetryConfig,
) {
    debug!(worker = id, "Worker started");
    loop {
        let next = queue.lock().await.recv().await;
        let Some(entry) = next else {
            break;
        };
        if gate.is_stopping() {
            break;
        }

        let _ = events
            .send(AggregatorEvent::Started(entry.path.clone()))
            .await;
        let outcome = process_with_retry(&pipeline, &entry, &gate, &events, &retry).await;
        let stopped = matches!(outcome, FileOutcome::Stopped { .. });
        if events
            .send(AggregatorEvent::Finished { entry, outcome })
            .await
            .is_err()
        {
            break;
        }
        if stopped {
            break;
        }
    }
    debug!(worker = id, "Worker finished");
}

/// Run the pipeline, retrying transient errors with exponential backoff.
async fn process_with_retry(
    pipeline: &FilePipeline,
    entry: &SourceEntry,
    gate: &RunGate,
    events: &mpsc::Sender<AggregatorEvent>,
    retry: &RetryConfig,
) -> FileOutcome {
    let progress = byte_progress(entry.path.clone(), events.clone());
    let mut attempt = 1;
    loop {
        let outcome = pipeline.process(entry, gate, Some(progress.clone())).await;
        if !outcome.is_transient_error() || attempt >= retry.max_attempts {
            return outcome;
        }

        let delay = retry.delay_for(attempt);
        if let FileOutcome::Error(e) = &outcome {
            warn!(
                "Attempt {}/{} failed, retrying in {:?}: {}",
                attempt, retry.max_attempts, delay, e
            );
        }
        metrics::RETRY_ATTEMPTS.inc();
        attempt += 1;
        tokio::time::sleep(delay).await;
    }
}

/// Reports bytes moved for `path`, dropping events when the aggregator is busy.
fn byte_progress(path: PathBuf, events: mpsc::Sender<AggregatorEvent>) -> ByteProgress {
    let last = AtomicU64::new(0);
    Arc::new(move |bytes| {
        let previous = last.load(Ordering::Relaxed);
        // Counts restart between hashing and copying.
        if bytes < previous || bytes - previous >= BYTE_PROGRESS_STEP {
            last.store(bytes, Ordering::Relaxed);
            let _ = events.try_send(AggregatorEvent::Bytes(path.clone()));
        }
    })
}

async fn auto_pause(
    mut low_space: mpsc::Receiver<LowSpace>,
    gate: RunGate,
    state: Arc<watch::Sender<OrchestratorState>>,
    events: mpsc::Sender<AggregatorEvent>,
) {
    while let Some(event) = low_space.recv().await {
        if gate.pause() {
            warn!(
                "Destination space low ({} bytes free, threshold {}), pausing",
                event.available_bytes, event.threshold_bytes
            );
            metrics::AUTO_PAUSES.inc();
            state.send_replace(OrchestratorState::Paused);
            let _ = events
                .send(AggregatorEvent::Status(SessionStatus::Paused))
                .await;
        }
        let _ = events.send(AggregatorEvent::LowSpace(event)).await;
    }
}
