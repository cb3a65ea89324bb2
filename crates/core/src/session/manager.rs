//! Session contract over the store and the snapshot file.

use std::collections::HashSet;
use std::fs::Metadata;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::{ProgressSnapshot, SessionError, SnapshotFile};
use crate::store::{
    CreateSessionRequest, FileMapping, MappingStatus, NewMapping, Session, SessionStatus,
    SessionStore,
};

/// Everything needed to continue an interrupted session.
#[derive(Debug, Clone)]
pub struct ResumePoint {
    pub session: Session,
    /// Last snapshot written for the session, if it survived.
    pub snapshot: Option<ProgressSnapshot>,
    /// Sources with a completed mapping; these are never processed again.
    pub mapped_sources: HashSet<PathBuf>,
}

/// How the pending mappings of an interrupted run were settled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Reconciled {
    /// Pending mappings whose file had reached its final path.
    pub completed: usize,
    /// Pending mappings whose commit never happened.
    pub discarded: usize,
}

/// Creates, advances and resumes sessions.
pub struct SessionManager {
    store: Arc<dyn SessionStore>,
}

impl SessionManager {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    pub fn create_session(
        &self,
        source_root: &Path,
        destination_root: &Path,
    ) -> Result<Session, SessionError> {
        let session = self.store.create_session(CreateSessionRequest {
            source_root: source_root.to_path_buf(),
            destination_root: destination_root.to_path_buf(),
        })?;
        info!(
            "Created session {} ({} -> {})",
            session.id,
            source_root.display(),
            destination_root.display()
        );
        Ok(session)
    }

    pub fn get_session(&self, id: &str) -> Result<Session, SessionError> {
        self.store
            .get_session(id)?
            .ok_or_else(|| SessionError::NotFound(id.to_string()))
    }

    pub fn update_status(
        &self,
        id: &str,
        status: SessionStatus,
        error_message: Option<&str>,
    ) -> Result<Session, SessionError> {
        Ok(self.store.update_status(id, status, error_message)?)
    }

    pub fn append_mapping(&self, mapping: NewMapping) -> Result<FileMapping, SessionError> {
        Ok(self.store.append_mapping(mapping)?)
    }

    pub async fn write_snapshot(
        &self,
        destination_root: &Path,
        snapshot: &ProgressSnapshot,
    ) -> Result<(), SessionError> {
        SnapshotFile::for_destination(destination_root)
            .write(snapshot)
            .await
    }

    pub fn find_incomplete_sessions(&self) -> Result<Vec<Session>, SessionError> {
        Ok(self.store.find_incomplete_sessions()?)
    }

    /// Snapshot of `session`, ignoring one left by a different session.
    pub async fn load_snapshot(
        &self,
        session: &Session,
    ) -> Result<Option<ProgressSnapshot>, SessionError> {
        let snapshot = SnapshotFile::for_destination(&session.destination_root)
            .load()
            .await?;
        Ok(snapshot.filter(|s| s.session_id == session.id))
    }

    /// Remove the snapshot of `session` if it is the one on disk.
    pub async fn clear_snapshot(&self, session: &Session) -> Result<(), SessionError> {
        let file = SnapshotFile::for_destination(&session.destination_root);
        match file.load().await {
            Ok(Some(s)) if s.session_id != session.id => Ok(()),
            Ok(_) | Err(SessionError::SnapshotCorrupt { .. }) => file.clear().await,
            Err(e) => Err(e),
        }
    }

    /// Why `session` cannot be resumed, or `Ok` if it can.
    pub fn check_resumable(&self, session: &Session) -> Result<(), SessionError> {
        let reason = if !session.status.is_incomplete() {
            Some(format!("status is {}", session.status))
        } else if !session.source_root.is_dir() {
            Some(format!(
                "source {} is not accessible",
                session.source_root.display()
            ))
        } else if !session.destination_root.is_dir() {
            Some(format!(
                "destination {} is not accessible",
                session.destination_root.display()
            ))
        } else {
            None
        };

        match reason {
            Some(reason) => Err(SessionError::NotResumable {
                id: session.id.clone(),
                reason,
            }),
            None => Ok(()),
        }
    }

    pub fn can_resume(&self, session: &Session) -> bool {
        self.check_resumable(session).is_ok()
    }

    /// Settle the mappings a crash left pending.
    ///
    /// Must run before partial files are swept: a pending mapping is
    /// completed only when its destination exists and is the committed
    /// temp file, or the temp is gone and the sizes agree.
    pub async fn reconcile_pending(&self, session_id: &str) -> Result<Reconciled, SessionError> {
        let mut reconciled = Reconciled::default();
        for mapping in self
            .store
            .mappings(session_id, Some(MappingStatus::Pending))?
        {
            if was_committed(&mapping).await {
                debug!(
                    "Completing interrupted mapping {} -> {}",
                    mapping.source_path.display(),
                    mapping.destination_path.display()
                );
                self.store.complete_mapping(mapping.id)?;
                reconciled.completed += 1;
            } else {
                self.store.discard_mapping(mapping.id)?;
                reconciled.discarded += 1;
            }
        }
        if reconciled != Reconciled::default() {
            info!(
                "Session {}: {} interrupted mappings completed, {} discarded",
                session_id, reconciled.completed, reconciled.discarded
            );
        }
        Ok(reconciled)
    }

    /// Load what is needed to continue session `id`.
    pub async fn prepare_resume(&self, id: &str) -> Result<ResumePoint, SessionError> {
        let session = self.get_session(id)?;
        self.check_resumable(&session)?;

        let snapshot = match self.load_snapshot(&session).await {
            Ok(s) => s,
            Err(SessionError::SnapshotCorrupt { path, .. }) => {
                warn!("Ignoring unreadable snapshot {}", path.display());
                None
            }
            Err(e) => return Err(e),
        };
        self.reconcile_pending(&session.id).await?;
        let mapped_sources = self.store.mapped_sources(&session.id)?;

        Ok(ResumePoint {
            session,
            snapshot,
            mapped_sources,
        })
    }

    /// The newest incomplete session that can still be resumed.
    pub async fn find_resumable(&self) -> Result<Option<ResumePoint>, SessionError> {
        for session in self.find_incomplete_sessions()? {
            match self.check_resumable(&session) {
                Ok(()) => return self.prepare_resume(&session.id).await.map(Some),
                Err(e) => warn!("Skipping session {}: {}", session.id, e),
            }
        }
        Ok(None)
    }
}

/// Whether a pending mapping's file made it to its final path.
pub(crate) async fn was_committed(mapping: &FileMapping) -> bool {
    let destination = match tokio::fs::symlink_metadata(&mapping.destination_path).await {
        Ok(meta) if meta.is_file() => meta,
        _ => return false,
    };
    let Some(temp) = &mapping.temp_path else {
        return destination.len() == mapping.size;
    };
    match tokio::fs::symlink_metadata(temp).await {
        Ok(temp) => same_file(&destination, &temp),
        Err(e) if e.kind() == io::ErrorKind::NotFound => destination.len() == mapping.size,
        Err(_) => false,
    }
}

#[cfg(unix)]
fn same_file(a: &Metadata, b: &Metadata) -> bool {
    use std::os::unix::fs::MetadataExt;
    a.dev() == b.dev() && a.ino() == b.ino()
}

#[cfg(not(unix))]
fn same_file(a: &Metadata, b: &Metadata) -> bool {
    a.len() == b.len() && a.modified().ok() == b.modified().ok()
}
