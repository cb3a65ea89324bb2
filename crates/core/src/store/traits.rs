//! Storage traits.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use super::{
    CreateSessionRequest, DuplicateGroup, FileMapping, FileRecord, FileRecordUpdate,
    HashCacheEntry, MappingStatus, NewFileRecord, NewMapping, ProcessingStatus, Session,
    SessionCounters, SessionFilter, SessionStatus, StoreError,
};

/// Sessions, per-file records and the mapping log.
pub trait SessionStore: Send + Sync {
    /// Create a session in `Running` status.
    fn create_session(&self, request: CreateSessionRequest) -> Result<Session, StoreError>;

    /// Get a session by id.
    fn get_session(&self, id: &str) -> Result<Option<Session>, StoreError>;

    /// List sessions, newest first.
    fn list_sessions(&self, filter: &SessionFilter) -> Result<Vec<Session>, StoreError>;

    /// Move a session to a new status, stamping completion time on terminal statuses.
    fn update_status(
        &self,
        id: &str,
        status: SessionStatus,
        error_message: Option<&str>,
    ) -> Result<Session, StoreError>;

    /// Overwrite the aggregate counters of a session.
    fn update_counters(&self, id: &str, counters: &SessionCounters) -> Result<(), StoreError>;

    /// Sessions left `running` or `paused`, newest first.
    fn find_incomplete_sessions(&self) -> Result<Vec<Session>, StoreError>;

    /// Append a completed mapping for a produced destination file.
    fn append_mapping(&self, mapping: NewMapping) -> Result<FileMapping, StoreError>;

    /// Record the intent to commit a file, before it exists at its final path.
    fn begin_mapping(&self, mapping: NewMapping) -> Result<FileMapping, StoreError>;

    /// Promote a pending mapping once its file is in place.
    fn complete_mapping(&self, mapping_id: i64) -> Result<(), StoreError>;

    /// Drop a pending mapping whose commit did not happen.
    fn discard_mapping(&self, mapping_id: i64) -> Result<(), StoreError>;

    /// Mappings of a session, in insertion order.
    fn mappings(
        &self,
        session_id: &str,
        status: Option<MappingStatus>,
    ) -> Result<Vec<FileMapping>, StoreError>;

    /// Flag a mapping as reversed by undo.
    fn mark_mapping_undone(&self, mapping_id: i64) -> Result<(), StoreError>;

    /// Completed mapping of this source in the session, if any.
    fn find_mapping(
        &self,
        session_id: &str,
        source: &Path,
    ) -> Result<Option<FileMapping>, StoreError>;

    /// All sources with a completed mapping in the session.
    fn mapped_sources(&self, session_id: &str) -> Result<HashSet<PathBuf>, StoreError>;

    /// Insert a file record, or return the existing one for the same
    /// (session, source path) after resetting it to `Processing`.
    fn upsert_file_record(&self, record: NewFileRecord) -> Result<FileRecord, StoreError>;

    /// Apply a partial update to a file record.
    fn update_file_record(&self, id: i64, update: FileRecordUpdate) -> Result<(), StoreError>;

    /// Get a file record by id.
    fn get_file_record(&self, id: i64) -> Result<Option<FileRecord>, StoreError>;

    /// File records of a session, optionally filtered by status.
    fn file_records(
        &self,
        session_id: &str,
        status: Option<ProcessingStatus>,
    ) -> Result<Vec<FileRecord>, StoreError>;
}

/// Hash cache and duplicate registry.
pub trait DedupStore: Send + Sync {
    /// Cached hash for `path`, only if size and mtime still match.
    fn cached_hash(&self, path: &Path, size: u64, mtime: i64)
        -> Result<Option<String>, StoreError>;

    /// Insert or replace the cache entry for a path.
    fn store_hash(&self, entry: &HashCacheEntry) -> Result<(), StoreError>;

    /// Group for a (hash, category) key.
    fn find_group(&self, hash: &str, category: &str) -> Result<Option<DuplicateGroup>, StoreError>;

    /// Create the group with its canonical member. Fails with
    /// [`StoreError::Conflict`] when the key already exists.
    fn create_group(
        &self,
        hash: &str,
        category: &str,
        canonical_id: i64,
        canonical_path: &Path,
        canonical_session: &str,
    ) -> Result<DuplicateGroup, StoreError>;

    /// Hand an unconfirmed group to a new canonical, leaving it unconfirmed.
    fn take_over_group(
        &self,
        group_id: i64,
        canonical_id: i64,
        canonical_path: &Path,
        canonical_session: &str,
    ) -> Result<DuplicateGroup, StoreError>;

    /// Mark the group's canonical as produced. Returns `false` if the group
    /// no longer belongs to `canonical_id`.
    fn confirm_group(&self, group_id: i64, canonical_id: i64) -> Result<bool, StoreError>;

    /// Confirm unconfirmed groups of the session whose canonical source has
    /// a completed mapping. Returns the count confirmed.
    fn confirm_mapped_groups(&self, session_id: &str) -> Result<usize, StoreError>;

    /// Record a duplicate member. Re-adding the same path is a no-op.
    fn add_group_member(
        &self,
        group_id: i64,
        file_id: i64,
        source_path: &Path,
    ) -> Result<(), StoreError>;

    /// Drop every group whose canonical belongs to the session. Returns the count removed.
    fn release_groups_for_session(&self, session_id: &str) -> Result<usize, StoreError>;
}
