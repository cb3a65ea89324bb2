//! Undo engine implementation.

use std::collections::BTreeSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::UndoError;
use crate::metrics;
use crate::session::{was_committed, SessionManager};
use crate::store::{DedupStore, FileMapping, MappingStatus, Session, SessionStatus, SessionStore};

/// What [`UndoEngine::execute`] would remove.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UndoPreview {
    pub session_id: String,
    /// Produced files that still exist.
    pub files_to_delete: Vec<PathBuf>,
    pub bytes_to_free: u64,
    /// Mapped files that are already gone.
    pub files_missing: usize,
}

/// Outcome of an undo run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UndoReport {
    pub session_id: String,
    pub deleted: usize,
    /// Mapped files that were already gone; their mappings are still marked undone.
    pub missing: usize,
    pub failed: usize,
    pub dirs_removed: usize,
    pub bytes_freed: u64,
    pub groups_released: usize,
    pub errors: Vec<String>,
}

impl UndoReport {
    pub fn success(&self) -> bool {
        self.failed == 0
    }

    /// Whether the run changed anything on disk or in the mapping log.
    pub fn is_noop(&self) -> bool {
        self.deleted == 0 && self.missing == 0 && self.dirs_removed == 0
    }
}

/// Deletes the files a session produced and restores its duplicate claims.
pub struct UndoEngine {
    sessions: SessionManager,
    dedup: Arc<dyn DedupStore>,
}

impl UndoEngine {
    pub fn new(store: Arc<dyn SessionStore>, dedup: Arc<dyn DedupStore>) -> Self {
        Self {
            sessions: SessionManager::new(store),
            dedup,
        }
    }

    fn session(&self, session_id: &str) -> Result<Session, UndoError> {
        self.sessions
            .store()
            .get_session(session_id)?
            .ok_or_else(|| UndoError::SessionNotFound(session_id.to_string()))
    }

    fn live_mappings(&self, session_id: &str) -> Result<Vec<FileMapping>, UndoError> {
        Ok(self
            .sessions
            .store()
            .mappings(session_id, Some(MappingStatus::Completed))?)
    }

    /// Dry run: list the produced files that still exist.
    ///
    /// Mappings a crash left pending count when their file was committed.
    pub async fn preview(&self, session_id: &str) -> Result<UndoPreview, UndoError> {
        self.session(session_id)?;
        let mut mappings = self.live_mappings(session_id)?;
        for pending in self
            .sessions
            .store()
            .mappings(session_id, Some(MappingStatus::Pending))?
        {
            if was_committed(&pending).await {
                mappings.push(pending);
            }
        }

        let mut preview = UndoPreview {
            session_id: session_id.to_string(),
            files_to_delete: Vec::new(),
            bytes_to_free: 0,
            files_missing: 0,
        };

        for mapping in mappings {
            match tokio::fs::symlink_metadata(&mapping.destination_path).await {
                Ok(meta) if meta.is_file() => {
                    preview.bytes_to_free += meta.len();
                    preview.files_to_delete.push(mapping.destination_path);
                }
                _ => preview.files_missing += 1,
            }
        }
        Ok(preview)
    }

    /// Delete every produced file of the session, prune the directories
    /// that become empty, and mark the session undone.
    ///
    /// Running it again on an undone session reports no work.
    pub async fn execute(&self, session_id: &str) -> Result<UndoReport, UndoError> {
        let session = self.session(session_id)?;
        let root = session.destination_root.as_path();
        self.sessions.reconcile_pending(session_id).await?;
        let mappings = self.live_mappings(session_id)?;
        info!(
            "Undoing session {}: {} mapped files",
            session_id,
            mappings.len()
        );

        let mut report = UndoReport {
            session_id: session_id.to_string(),
            ..Default::default()
        };
        let mut touched_dirs = BTreeSet::new();

        for mapping in mappings {
            let path = &mapping.destination_path;
            if !path.starts_with(root) {
                report.failed += 1;
                report.errors.push(format!(
                    "{} is outside destination {}",
                    path.display(),
                    root.display()
                ));
                continue;
            }

            match tokio::fs::remove_file(path).await {
                Ok(()) => {
                    debug!("Deleted {}", path.display());
                    report.deleted += 1;
                    report.bytes_freed += mapping.size;
                    metrics::UNDO_FILES_DELETED.inc();
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    debug!("Already gone: {}", path.display());
                    report.missing += 1;
                }
                Err(e) => {
                    warn!("Failed to delete {}: {}", path.display(), e);
                    report.failed += 1;
                    report.errors.push(format!("{}: {}", path.display(), e));
                    continue;
                }
            }

            if let Err(e) = self.sessions.store().mark_mapping_undone(mapping.id) {
                report.errors.push(format!("{}: {}", path.display(), e));
            }
            if let Some(parent) = path.parent() {
                touched_dirs.insert(parent.to_path_buf());
            }
        }

        // Deepest first so parents see their emptied children gone.
        let mut dirs: Vec<PathBuf> = touched_dirs.into_iter().collect();
        dirs.sort_by_key(|d| std::cmp::Reverse(d.components().count()));
        for dir in dirs {
            report.dirs_removed += prune_empty_dirs(&dir, root).await;
        }

        report.groups_released = self.dedup.release_groups_for_session(session_id)?;
        self.sessions.clear_snapshot(&session).await?;
        self.sessions
            .update_status(session_id, SessionStatus::Undone, None)?;

        info!(
            "Undo of {} finished: {} deleted, {} missing, {} failed, {} directories removed",
            session_id, report.deleted, report.missing, report.failed, report.dirs_removed
        );
        Ok(report)
    }
}

/// Remove `dir` and its ancestors while they are empty, stopping below `root`.
async fn prune_empty_dirs(dir: &Path, root: &Path) -> usize {
    let mut removed = 0;
    let mut current = Some(dir);
    while let Some(dir) = current {
        if dir == root || !dir.starts_with(root) {
            break;
        }
        // Fails on non-empty directories, which ends the walk.
        if tokio::fs::remove_dir(dir).await.is_err() {
            break;
        }
        removed += 1;
        current = dir.parent();
    }
    removed
}
