//! The per-file state machine.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, warn};

use super::skip::SkipRules;
use super::types::{error_chain, ErrorKind, FileError, FileOutcome, PipelineStage, SkipReason};
use super::PipelineConfig;
use crate::content::{sniff_type, MediaKind, MediaProcessor, Metadata};
use crate::dedup::{DedupCandidate, DedupDecision, DedupEngine, DedupError};
use crate::orchestrator::{Checkpoint, RunGate};
use crate::placer::{
    ByteProgress, PlacedFile, PlacementRequest, Placer, PlacerError, StagedFile,
};
use crate::scan::SourceEntry;
use crate::session::MappingHandle;
use crate::store::{FileRecordUpdate, NewFileRecord, NewMapping, Session, SessionStore};

/// Runs one file at a time through every stage for a single session.
///
/// Instances are shared by all workers of a run. The pause/stop gate is
/// observed between stages up to the file operation. From there on a file
/// is committed only under a pending mapping, which is completed before
/// anything else can interrupt. Canonical status for a file's content is
/// confirmed only after that, so a file that was never produced never
/// turns its duplicates away.
pub struct FilePipeline {
    skip_unknown: bool,
    skip_rules: SkipRules,
    session_id: String,
    source_root: PathBuf,
    destination_root: PathBuf,
    store: Arc<dyn SessionStore>,
    dedup: Arc<DedupEngine>,
    processor: Arc<dyn MediaProcessor>,
    placer: Arc<dyn Placer>,
    mappings: MappingHandle,
}

/// State carried between stages for one file.
struct FileContext<'a> {
    entry: &'a SourceEntry,
    file_id: i64,
    progress: Option<ByteProgress>,
    hash: Option<String>,
    kind: MediaKind,
}

impl FilePipeline {
    pub fn new(
        config: &PipelineConfig,
        session: &Session,
        store: Arc<dyn SessionStore>,
        dedup: Arc<DedupEngine>,
        processor: Arc<dyn MediaProcessor>,
        placer: Arc<dyn Placer>,
        mappings: MappingHandle,
    ) -> Self {
        Self {
            skip_unknown: config.skip_unknown,
            skip_rules: SkipRules::from_config(config),
            session_id: session.id.clone(),
            source_root: session.source_root.clone(),
            destination_root: session.destination_root.clone(),
            store,
            dedup,
            processor,
            placer,
            mappings,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Drive `entry` to a terminal outcome.
    ///
    /// `progress` receives cumulative bytes while the file is hashed and
    /// while it is copied.
    pub async fn process(
        &self,
        entry: &SourceEntry,
        gate: &RunGate,
        progress: Option<ByteProgress>,
    ) -> FileOutcome {
        let path = entry.path.as_path();

        if gate.checkpoint().await == Checkpoint::Stop {
            return FileOutcome::Stopped {
                stage: PipelineStage::AlreadyProcessed,
            };
        }
        match self.store.find_mapping(&self.session_id, path) {
            Ok(Some(mapping)) => {
                debug!("{} already mapped, skipping", path.display());
                self.place_sidecars(entry, &mapping.destination_path).await;
                return FileOutcome::Skipped(SkipReason::AlreadyProcessed);
            }
            Ok(None) => {}
            Err(e) => return store_error(PipelineStage::AlreadyProcessed, path, &e),
        }

        let file_id = match self.store.upsert_file_record(NewFileRecord {
            session_id: self.session_id.clone(),
            source_path: entry.path.clone(),
            size: entry.size,
            extension: entry.extension(),
        }) {
            Ok(record) => record.id,
            Err(e) => return store_error(PipelineStage::AlreadyProcessed, path, &e),
        };

        let mut ctx = FileContext {
            entry,
            file_id,
            progress,
            hash: None,
            kind: MediaKind::Unknown,
        };
        let outcome = self.run_stages(&mut ctx, gate).await;
        self.record_outcome(&ctx, &outcome);

        debug!(
            path = %path.display(),
            outcome = outcome.label(),
            "File finished"
        );
        outcome
    }

    async fn run_stages(&self, ctx: &mut FileContext<'_>, gate: &RunGate) -> FileOutcome {
        let path = ctx.entry.path.as_path();

        macro_rules! boundary {
            ($stage:expr) => {
                if gate.checkpoint().await == Checkpoint::Stop {
                    return FileOutcome::Stopped { stage: $stage };
                }
            };
        }

        boundary!(PipelineStage::SkippedByPattern);
        if let Some(rule) = self.skip_rules.matching_rule(path, &self.source_root) {
            return FileOutcome::Skipped(SkipReason::Pattern(rule));
        }

        boundary!(PipelineStage::TypeDetected);
        let sniffed = sniff_type(path).await;
        ctx.kind = self.processor.classify(path, sniffed);

        boundary!(PipelineStage::UnknownTypeFilter);
        if ctx.kind == MediaKind::Unknown && self.skip_unknown {
            return FileOutcome::Skipped(SkipReason::UnknownType);
        }

        boundary!(PipelineStage::DuplicateCheck);
        let extension = ctx.entry.extension();
        let candidate = DedupCandidate {
            file_id: ctx.file_id,
            session_id: &self.session_id,
            path,
            extension: extension.as_deref(),
        };
        let mut dedup = match self
            .dedup
            .register_and_check(&candidate, ctx.progress.as_ref())
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => return FileOutcome::Error(dedup_error(path, &e)),
        };
        // Returning before the mapping drops the claim unconfirmed.
        let claim = dedup.claim.take();
        ctx.hash = Some(dedup.hash);
        if let DedupDecision::Duplicate {
            of, canonical_path, ..
        } = dedup.decision
        {
            return FileOutcome::Duplicate { of, canonical_path };
        }

        boundary!(PipelineStage::Categorize);
        let metadata = match self.processor.extract_metadata(path).await {
            Ok(metadata) => metadata,
            Err(e) => {
                debug!("No metadata for {}: {}", path.display(), e);
                Metadata::default()
            }
        };
        let fragment = self
            .processor
            .build_destination_fragment(path, ctx.kind, &metadata);

        boundary!(PipelineStage::ResolveDestinationPath);
        let desired = match self.destination_for(&fragment) {
            Some(desired) => desired,
            None => {
                return FileOutcome::Error(FileError::new(
                    ErrorKind::Io,
                    PipelineStage::ResolveDestinationPath,
                    path,
                    format!("fragment {} escapes the destination", fragment.display()),
                ))
            }
        };

        boundary!(PipelineStage::ResolveNameConflict);
        match self.placer.resolve_name(&desired).await {
            Ok(free) if free != desired => {
                debug!("{} is taken, expecting {}", desired.display(), free.display());
            }
            Ok(_) => {}
            Err(e) => {
                return FileOutcome::Error(placer_error(
                    PipelineStage::ResolveNameConflict,
                    path,
                    &e,
                ))
            }
        }

        boundary!(PipelineStage::PerformFileOperation);
        let request = PlacementRequest {
            source: ctx.entry.path.clone(),
            destination: desired,
        };
        let placed = match self.place_mapped(request, ctx.progress.clone()).await {
            Ok(placed) => placed,
            Err(error) => return FileOutcome::Error(error),
        };

        if let Some(claim) = claim {
            if let Err(e) = claim.confirm() {
                warn!(
                    "Could not confirm canonical status of {}: {}",
                    path.display(),
                    e
                );
            }
        }
        let sidecar_bytes = self.place_sidecars(ctx.entry, &placed.destination).await;

        FileOutcome::Completed {
            destination: placed.destination,
            bytes: placed.size_bytes + sidecar_bytes,
            kind: ctx.kind,
        }
    }

    /// Resolve a fragment under the destination root, rejecting escapes.
    fn destination_for(&self, fragment: &Path) -> Option<PathBuf> {
        let contained = fragment
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        if !contained || fragment.file_name().is_none() {
            return None;
        }
        Some(self.destination_root.join(fragment))
    }

    /// Stage, commit and map one file.
    ///
    /// Nothing is left behind on failure: neither the temp file nor a mapping.
    async fn place_mapped(
        &self,
        request: PlacementRequest,
        progress: Option<ByteProgress>,
    ) -> Result<PlacedFile, FileError> {
        let source = request.source.clone();
        let staged = self
            .placer
            .stage(request, progress)
            .await
            .map_err(|e| placer_error(PipelineStage::PerformFileOperation, &source, &e))?;

        let placed = self.commit_mapped(&staged).await;
        if placed.is_err() {
            self.placer.discard(&staged).await;
        }
        placed
    }

    /// Commit a staged file under the first free name.
    ///
    /// Each attempt is recorded as a pending mapping before the commit and
    /// completed right after it, so an interruption in between can be
    /// settled from the mapping log alone.
    async fn commit_mapped(&self, staged: &StagedFile) -> Result<PlacedFile, FileError> {
        let source = staged.source.as_path();
        let mut from = 0;
        loop {
            let claim = self
                .placer
                .claim_name(staged, from)
                .await
                .map_err(|e| placer_error(PipelineStage::PerformFileOperation, source, &e))?;
            let pending = self
                .mappings
                .begin(NewMapping {
                    session_id: self.session_id.clone(),
                    source_path: staged.source.clone(),
                    destination_path: claim.path().to_path_buf(),
                    temp_path: Some(staged.temp.clone()),
                    size: staged.size_bytes,
                })
                .await
                .map_err(|e| {
                    FileError::from_error(ErrorKind::Store, PipelineStage::RecordMapping, source, &e)
                })?;

            match self.placer.commit(staged, &claim).await {
                Ok(true) => {
                    let placed = staged.placed_as(claim.path().to_path_buf());
                    return match self.mappings.complete(pending.id).await {
                        Ok(()) => Ok(placed),
                        Err(e) => {
                            self.unwind(&placed, pending.id).await;
                            Err(FileError::from_error(
                                ErrorKind::Store,
                                PipelineStage::RecordMapping,
                                source,
                                &e,
                            ))
                        }
                    };
                }
                Ok(false) => {
                    self.forget(pending.id).await;
                    from = claim.attempt() + 1;
                }
                Err(e) => {
                    self.forget(pending.id).await;
                    return Err(placer_error(PipelineStage::PerformFileOperation, source, &e));
                }
            }
        }
    }

    /// Remove a committed file whose mapping could not be completed.
    async fn unwind(&self, placed: &PlacedFile, mapping_id: i64) {
        let rollback = self.placer.rollback(placed).await;
        if !rollback.success() {
            warn!(
                "Could not roll back unmapped file {}: {:?}",
                placed.destination.display(),
                rollback.errors
            );
        }
        self.forget(mapping_id).await;
    }

    /// Drop a pending mapping; one left behind is settled on resume.
    async fn forget(&self, mapping_id: i64) {
        if let Err(e) = self.mappings.discard(mapping_id).await {
            warn!("Could not discard pending mapping {}: {}", mapping_id, e);
        }
    }

    /// Place the sidecars of `entry` that are not mapped yet next to its
    /// main file at `main`. Returns the bytes placed.
    ///
    /// A sidecar that cannot be placed is logged and left for the next run.
    async fn place_sidecars(&self, entry: &SourceEntry, main: &Path) -> u64 {
        let mut bytes = 0;
        for sidecar in &entry.sidecars {
            match self.store.find_mapping(&self.session_id, &sidecar.path) {
                Ok(None) => {}
                Ok(Some(_)) => continue,
                Err(e) => {
                    warn!("Skipping sidecar {}: {}", sidecar.path.display(), e);
                    continue;
                }
            }
            let request = PlacementRequest {
                source: sidecar.path.clone(),
                destination: sidecar.destination_for(main),
            };
            match self.place_mapped(request, None).await {
                Ok(placed) => bytes += placed.size_bytes,
                Err(e) => warn!("Sidecar {} not migrated: {}", sidecar.path.display(), e),
            }
        }
        bytes
    }

    /// Persist the terminal status on the file record.
    fn record_outcome(&self, ctx: &FileContext<'_>, outcome: &FileOutcome) {
        let mut update = FileRecordUpdate::status(outcome.processing_status());
        if let Some(hash) = &ctx.hash {
            update = update.with_hash(hash.clone());
        }
        if ctx.kind != MediaKind::Unknown {
            update = update.with_category(ctx.kind.as_str());
        }
        match outcome {
            FileOutcome::Duplicate { of, .. } => update = update.with_duplicate_of(*of),
            FileOutcome::Error(e) => update = update.with_error(e.to_string()),
            _ => {}
        }
        if let Err(e) = self.store.update_file_record(ctx.file_id, update) {
            warn!(
                "Failed to update file record {} ({}): {}",
                ctx.file_id,
                ctx.entry.path.display(),
                e
            );
        }
    }
}

fn store_error(
    stage: PipelineStage,
    path: &Path,
    error: &(dyn std::error::Error + 'static),
) -> FileOutcome {
    FileOutcome::Error(FileError::from_error(ErrorKind::Store, stage, path, error))
}

fn dedup_error(path: &Path, error: &DedupError) -> FileError {
    let kind = match error {
        DedupError::HashCompute { source, .. } => match ErrorKind::from_io(source) {
            ErrorKind::SourceMissing => ErrorKind::SourceMissing,
            ErrorKind::TransientIo => ErrorKind::TransientIo,
            ErrorKind::Corrupted => ErrorKind::Corrupted,
            _ => ErrorKind::HashCompute,
        },
        // Contention outlasted the in-engine retries; let the orchestrator try again.
        DedupError::RegistryContention { .. } => ErrorKind::TransientIo,
        DedupError::Store(_) => ErrorKind::Store,
    };
    FileError::new(kind, PipelineStage::DuplicateCheck, path, error_chain(error))
}

fn placer_error(stage: PipelineStage, path: &Path, error: &PlacerError) -> FileError {
    let kind = match error {
        PlacerError::NameConflictExhausted { .. } => ErrorKind::NameConflictExhausted,
        PlacerError::SourceNotFound { .. } => ErrorKind::SourceMissing,
        other => other.io_error().map(ErrorKind::from_io).unwrap_or(ErrorKind::Io),
    };
    FileError::new(kind, stage, path, error_chain(error))
}
