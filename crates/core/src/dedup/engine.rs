//! Duplicate registry decisions.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

use super::hasher::HashedFile;
use super::{hash_file, CanonicalPolicy, DedupConfig, DedupError, ExtensionClasses, HashCache};
use crate::placer::ByteProgress;
use crate::scan::mtime_nanos;
use crate::store::{DedupStore, HashCacheEntry};

type GroupKey = (String, String);
type KeyLocks = DashMap<GroupKey, Arc<Mutex<()>>>;

/// A file offered to the duplicate registry.
#[derive(Debug, Clone)]
pub struct DedupCandidate<'a> {
    /// File record id of the candidate.
    pub file_id: i64,
    pub session_id: &'a str,
    pub path: &'a Path,
    pub extension: Option<&'a str>,
}

/// Registry verdict for one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DedupDecision {
    /// This file holds canonical status for its key.
    Canonical { group_id: i64 },
    /// Another file already holds canonical status.
    Duplicate {
        group_id: i64,
        of: i64,
        canonical_path: PathBuf,
    },
}

impl DedupDecision {
    pub fn is_canonical(&self) -> bool {
        matches!(self, Self::Canonical { .. })
    }
}

/// Provisional canonical status for one `(hash, class)` key.
///
/// The claim holds the key's lock, so every other file with the same
/// content waits until it is confirmed or dropped. A claim dropped without
/// [`confirm`](Self::confirm) leaves the group unconfirmed, and the next
/// arrival or a later run takes it over.
pub struct CanonicalClaim {
    group_id: i64,
    file_id: i64,
    key: GroupKey,
    store: Arc<dyn DedupStore>,
    locks: Arc<KeyLocks>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl CanonicalClaim {
    pub fn group_id(&self) -> i64 {
        self.group_id
    }

    /// Make canonical status permanent. Call once the file is produced and mapped.
    pub fn confirm(self) -> Result<(), DedupError> {
        if !self.store.confirm_group(self.group_id, self.file_id)? {
            warn!(
                group = self.group_id,
                file = self.file_id,
                "Canonical claim was taken over before confirmation"
            );
        }
        Ok(())
    }
}

impl Drop for CanonicalClaim {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.locks
            .remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}

impl fmt::Debug for CanonicalClaim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CanonicalClaim")
            .field("group_id", &self.group_id)
            .field("file_id", &self.file_id)
            .finish_non_exhaustive()
    }
}

/// Hash, class and verdict produced by [`DedupEngine::register_and_check`].
#[derive(Debug)]
pub struct DedupOutcome {
    pub hash: String,
    pub category: String,
    pub decision: DedupDecision,
    /// Held with a `Canonical` decision until the file is mapped.
    pub claim: Option<CanonicalClaim>,
}

/// Decides canonical vs duplicate per `(hash, extension class)` key.
pub struct DedupEngine {
    config: DedupConfig,
    classes: ExtensionClasses,
    cache: HashCache,
    store: Arc<dyn DedupStore>,
    locks: Arc<KeyLocks>,
}

impl DedupEngine {
    pub fn new(config: DedupConfig, store: Arc<dyn DedupStore>) -> Self {
        Self {
            classes: ExtensionClasses::new(&config.extension_classes),
            cache: HashCache::new(Arc::clone(&store)),
            config,
            store,
            locks: Arc::new(DashMap::new()),
        }
    }

    pub fn policy(&self) -> CanonicalPolicy {
        self.config.canonical_policy
    }

    /// Dedup class for an extension.
    pub fn category_for(&self, extension: Option<&str>) -> String {
        self.classes.class_for(extension)
    }

    /// Content hash, served from the cache while size and mtime are unchanged.
    ///
    /// Files without a modification time are always hashed.
    pub async fn content_hash(
        &self,
        path: &Path,
        progress: Option<&ByteProgress>,
    ) -> Result<String, DedupError> {
        let meta = tokio::fs::metadata(path)
            .await
            .map_err(|e| DedupError::hash_compute(path, e))?;
        if let Some(mtime) = meta.modified().ok().map(mtime_nanos) {
            if let Some(hash) = self.cache.get(path, meta.len(), mtime)? {
                return Ok(hash);
            }
        }

        let hashed = hash_file(path, self.config.hash_buffer_size, progress).await?;
        self.remember(path, &hashed)?;
        Ok(hashed.hash)
    }

    /// Cache a digest under the metadata it was computed with.
    fn remember(&self, path: &Path, hashed: &HashedFile) -> Result<(), DedupError> {
        let Some(mtime) = hashed.mtime else {
            return Ok(());
        };
        self.cache.put(HashCacheEntry {
            path: path.to_path_buf(),
            size: hashed.size,
            mtime,
            hash: hashed.hash.clone(),
        })
    }

    /// Confirm the groups whose canonical was mapped before the session was
    /// interrupted. Returns the count confirmed.
    pub fn confirm_mapped(&self, session_id: &str) -> Result<usize, DedupError> {
        Ok(self.store.confirm_mapped_groups(session_id)?)
    }

    /// Hash the candidate and register it under its `(hash, class)` key.
    ///
    /// A `Canonical` verdict comes with a [`CanonicalClaim`]. Re-registering
    /// the path that holds confirmed canonical status in the same session
    /// returns `Canonical` again. A later session sees that path as a duplicate.
    pub async fn register_and_check(
        &self,
        candidate: &DedupCandidate<'_>,
        progress: Option<&ByteProgress>,
    ) -> Result<DedupOutcome, DedupError> {
        let hash = self.content_hash(candidate.path, progress).await?;
        let category = self.category_for(candidate.extension);
        let (decision, claim) = self.register(&hash, &category, candidate).await?;

        debug!(
            path = %candidate.path.display(),
            %category,
            canonical = decision.is_canonical(),
            "Dedup decision"
        );

        Ok(DedupOutcome {
            hash,
            category,
            decision,
            claim,
        })
    }

    async fn register(
        &self,
        hash: &str,
        category: &str,
        candidate: &DedupCandidate<'_>,
    ) -> Result<(DedupDecision, Option<CanonicalClaim>), DedupError> {
        let key: GroupKey = (hash.to_string(), category.to_string());
        let lock = self
            .locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone();

        let mut claim = CanonicalClaim {
            group_id: 0,
            file_id: candidate.file_id,
            key,
            store: Arc::clone(&self.store),
            locks: Arc::clone(&self.locks),
            guard: Some(lock.lock_owned().await),
        };

        // Dropping the claim on any other path releases the key.
        match self.register_locked(hash, category, candidate)? {
            DedupDecision::Canonical { group_id } => {
                claim.group_id = group_id;
                Ok((DedupDecision::Canonical { group_id }, Some(claim)))
            }
            duplicate => Ok((duplicate, None)),
        }
    }

    fn register_locked(
        &self,
        hash: &str,
        category: &str,
        candidate: &DedupCandidate<'_>,
    ) -> Result<DedupDecision, DedupError> {
        let mut attempt = 0;
        loop {
            if let Some(group) = self.store.find_group(hash, category)? {
                if !group.confirmed {
                    let group = self.store.take_over_group(
                        group.id,
                        candidate.file_id,
                        candidate.path,
                        candidate.session_id,
                    )?;
                    if group.canonical_id == candidate.file_id {
                        debug!(%hash, %category, "Took over unconfirmed canonical claim");
                        return Ok(DedupDecision::Canonical { group_id: group.id });
                    }
                    continue;
                }
                if group.canonical_path == candidate.path
                    && group.canonical_session == candidate.session_id
                {
                    return Ok(DedupDecision::Canonical { group_id: group.id });
                }
                self.store
                    .add_group_member(group.id, candidate.file_id, candidate.path)?;
                return Ok(DedupDecision::Duplicate {
                    group_id: group.id,
                    of: group.canonical_id,
                    canonical_path: group.canonical_path,
                });
            }

            match self.store.create_group(
                hash,
                category,
                candidate.file_id,
                candidate.path,
                candidate.session_id,
            ) {
                Ok(group) => return Ok(DedupDecision::Canonical { group_id: group.id }),
                Err(e) if e.is_conflict() && attempt < self.config.conflict_retries => {
                    attempt += 1;
                    debug!(%hash, %category, attempt, "Registry conflict, retrying");
                }
                Err(e) if e.is_conflict() => {
                    return Err(DedupError::RegistryContention {
                        hash: hash.to_string(),
                        category: category.to_string(),
                    })
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{
        CreateSessionRequest, DuplicateGroup, NewFileRecord, SessionStore, SqliteStore,
        StoreError,
    };
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;

    struct Fixture {
        store: Arc<SqliteStore>,
        engine: Arc<DedupEngine>,
        session_id: String,
        dir: TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            let store = Arc::new(SqliteStore::in_memory().unwrap());
            let engine = Arc::new(DedupEngine::new(
                DedupConfig::default(),
                Arc::clone(&store) as Arc<dyn DedupStore>,
            ));
            let session_id = store
                .create_session(CreateSessionRequest {
                    source_root: "/src".into(),
                    destination_root: "/dst".into(),
                })
                .unwrap()
                .id;
            Self {
                store,
                engine,
                session_id,
                dir: TempDir::new().unwrap(),
            }
        }

        fn file(&self, name: &str, content: &[u8]) -> (i64, PathBuf) {
            let path = self.dir.path().join(name);
            std::fs::write(&path, content).unwrap();
            let record = self
                .store
                .upsert_file_record(NewFileRecord {
                    session_id: self.session_id.clone(),
                    source_path: path.clone(),
                    size: content.len() as u64,
                    extension: None,
                })
                .unwrap();
            (record.id, path)
        }

        fn new_session(&self) -> String {
            self.store
                .create_session(CreateSessionRequest {
                    source_root: "/src".into(),
                    destination_root: "/dst".into(),
                })
                .unwrap()
                .id
        }

        async fn register(&self, id: i64, session_id: &str, path: &Path) -> DedupOutcome {
            let ext = path.extension().and_then(|e| e.to_str());
            self.engine
                .register_and_check(
                    &DedupCandidate {
                        file_id: id,
                        session_id,
                        path,
                        extension: ext,
                    },
                    None,
                )
                .await
                .unwrap()
        }

        /// Register and, when canonical, confirm as if the file was produced.
        async fn check(&self, id: i64, path: &Path) -> DedupOutcome {
            let mut outcome = self.register(id, &self.session_id, path).await;
            if let Some(claim) = outcome.claim.take() {
                claim.confirm().unwrap();
            }
            outcome
        }

        fn group_of(&self, outcome: &DedupOutcome) -> DuplicateGroup {
            self.store
                .find_group(&outcome.hash, &outcome.category)
                .unwrap()
                .unwrap()
        }
    }

    fn set_mtime(path: &Path, time: SystemTime) {
        std::fs::File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(time)
            .unwrap();
    }

    #[tokio::test]
    async fn test_first_is_canonical_second_is_duplicate() {
        let fx = Fixture::new();
        let (a_id, a) = fx.file("a.jpg", b"same bytes");
        let (b_id, b) = fx.file("b.jpeg", b"same bytes");

        let first = fx.check(a_id, &a).await;
        assert!(first.decision.is_canonical());
        assert_eq!(first.category, "jpeg");
        assert!(fx.group_of(&first).confirmed);

        let second = fx.check(b_id, &b).await;
        assert!(second.claim.is_none());
        match second.decision {
            DedupDecision::Duplicate {
                of, canonical_path, ..
            } => {
                assert_eq!(of, a_id);
                assert_eq!(canonical_path, a);
            }
            other => panic!("expected duplicate, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_different_class_is_not_duplicate() {
        let fx = Fixture::new();
        let (a_id, a) = fx.file("a.jpg", b"same bytes");
        let (b_id, b) = fx.file("b.png", b"same bytes");

        assert!(fx.check(a_id, &a).await.decision.is_canonical());
        assert!(fx.check(b_id, &b).await.decision.is_canonical());
    }

    #[tokio::test]
    async fn test_reregistering_canonical_is_idempotent() {
        let fx = Fixture::new();
        let (a_id, a) = fx.file("a.jpg", b"content");

        let first = fx.check(a_id, &a).await;
        let again = fx.check(a_id, &a).await;
        assert_eq!(first.decision, again.decision);
        assert!(again.decision.is_canonical());
    }

    #[tokio::test]
    async fn test_later_session_sees_canonical_path_as_duplicate() {
        let fx = Fixture::new();
        let (a_id, a) = fx.file("a.jpg", b"content");
        assert!(fx.check(a_id, &a).await.decision.is_canonical());

        let later = fx.new_session();
        let outcome = fx.register(a_id + 100, &later, &a).await;
        assert!(matches!(
            outcome.decision,
            DedupDecision::Duplicate { of, .. } if of == a_id
        ));
    }

    #[tokio::test]
    async fn test_unconfirmed_claim_holds_key_until_dropped() {
        let fx = Arc::new(Fixture::new());
        let (a_id, a) = fx.file("a.jpg", b"identical");
        let (b_id, b) = fx.file("b.jpg", b"identical");

        let first = fx.register(a_id, &fx.session_id, &a).await;
        let claim = first.claim.expect("canonical comes with a claim");

        let waiting = {
            let fx = Arc::clone(&fx);
            tokio::spawn(async move { fx.check(b_id, &b).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiting.is_finished());

        // The first file was never produced: the waiter inherits the key.
        drop(claim);
        let second = waiting.await.unwrap();
        assert!(second.decision.is_canonical());
        let group = fx.group_of(&second);
        assert_eq!(group.canonical_id, b_id);
        assert!(group.confirmed);
        assert_eq!(group.duplicate_count, 0);
        assert!(fx.engine.locks.is_empty());
    }

    #[tokio::test]
    async fn test_abandoned_claim_is_taken_over_by_later_session() {
        let fx = Fixture::new();
        let (a_id, a) = fx.file("a.jpg", b"content");
        let first = fx.register(a_id, &fx.session_id, &a).await;
        assert!(first.decision.is_canonical());
        drop(first);

        let later = fx.new_session();
        let mut retry = fx.register(a_id + 100, &later, &a).await;
        assert!(retry.decision.is_canonical());
        retry.claim.take().unwrap().confirm().unwrap();

        let group = fx.group_of(&retry);
        assert_eq!(group.canonical_session, later);
        assert!(group.confirmed);
    }

    #[tokio::test]
    async fn test_concurrent_identical_files_single_canonical() {
        let fx = Arc::new(Fixture::new());
        let files: Vec<(i64, PathBuf)> = (0..8)
            .map(|i| fx.file(&format!("copy{}.jpg", i), b"identical payload"))
            .collect();

        let mut handles = Vec::new();
        for (id, path) in files {
            let fx = Arc::clone(&fx);
            handles.push(tokio::spawn(async move { fx.check(id, &path).await }));
        }

        let mut canonical = 0;
        for handle in handles {
            if handle.await.unwrap().decision.is_canonical() {
                canonical += 1;
            }
        }
        assert_eq!(canonical, 1);
        assert!(fx.engine.locks.is_empty());
    }

    #[tokio::test]
    async fn test_hash_cache_skips_rehash_for_unchanged_metadata() {
        let fx = Fixture::new();
        let (a_id, a) = fx.file("a.jpg", b"original");
        let first = fx.check(a_id, &a).await;
        let stamp = std::fs::metadata(&a).unwrap().modified().unwrap();

        // Same size and mtime: the cached hash wins even though bytes changed.
        std::fs::write(&a, b"modified").unwrap();
        set_mtime(&a, stamp);
        assert_eq!(fx.engine.content_hash(&a, None).await.unwrap(), first.hash);

        // A different mtime forces a fresh hash.
        set_mtime(&a, stamp + Duration::from_secs(5));
        assert_ne!(fx.engine.content_hash(&a, None).await.unwrap(), first.hash);
    }

    #[tokio::test]
    async fn test_cache_entry_uses_metadata_seen_while_hashing() {
        let fx = Fixture::new();
        let (_, a) = fx.file("a.jpg", b"short");
        // Grown after the scan recorded its size.
        std::fs::write(&a, b"considerably longer").unwrap();

        let hash = fx.engine.content_hash(&a, None).await.unwrap();
        let meta = std::fs::metadata(&a).unwrap();
        let mtime = mtime_nanos(meta.modified().unwrap());
        assert_eq!(
            fx.store.cached_hash(&a, meta.len(), mtime).unwrap(),
            Some(hash)
        );
        assert!(fx.store.cached_hash(&a, 5, mtime).unwrap().is_none());
    }

    #[test]
    fn test_digest_without_mtime_is_not_cached() {
        let fx = Fixture::new();
        let path = Path::new("/src/no-mtime.jpg");
        fx.engine
            .remember(
                path,
                &HashedFile {
                    hash: "abc".to_string(),
                    size: 3,
                    mtime: None,
                },
            )
            .unwrap();
        assert!(fx.store.cached_hash(path, 3, 0).unwrap().is_none());
    }

    struct ConflictingStore {
        inner: SqliteStore,
    }

    impl DedupStore for ConflictingStore {
        fn cached_hash(
            &self,
            path: &Path,
            size: u64,
            mtime: i64,
        ) -> Result<Option<String>, StoreError> {
            self.inner.cached_hash(path, size, mtime)
        }

        fn store_hash(&self, entry: &HashCacheEntry) -> Result<(), StoreError> {
            self.inner.store_hash(entry)
        }

        fn find_group(
            &self,
            _hash: &str,
            _category: &str,
        ) -> Result<Option<DuplicateGroup>, StoreError> {
            Ok(None)
        }

        fn create_group(
            &self,
            _hash: &str,
            _category: &str,
            _canonical_id: i64,
            _canonical_path: &Path,
            _canonical_session: &str,
        ) -> Result<DuplicateGroup, StoreError> {
            Err(StoreError::Conflict("always".to_string()))
        }

        fn take_over_group(
            &self,
            _group_id: i64,
            _canonical_id: i64,
            _canonical_path: &Path,
            _canonical_session: &str,
        ) -> Result<DuplicateGroup, StoreError> {
            Err(StoreError::Conflict("always".to_string()))
        }

        fn confirm_group(&self, _group_id: i64, _canonical_id: i64) -> Result<bool, StoreError> {
            Ok(false)
        }

        fn confirm_mapped_groups(&self, _session_id: &str) -> Result<usize, StoreError> {
            Ok(0)
        }

        fn add_group_member(
            &self,
            _group_id: i64,
            _file_id: i64,
            _source_path: &Path,
        ) -> Result<(), StoreError> {
            Ok(())
        }

        fn release_groups_for_session(&self, _session_id: &str) -> Result<usize, StoreError> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn test_persistent_conflict_surfaces_contention() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.jpg");
        std::fs::write(&path, b"x").unwrap();

        let engine = DedupEngine::new(
            DedupConfig::default(),
            Arc::new(ConflictingStore {
                inner: SqliteStore::in_memory().unwrap(),
            }),
        );
        let result = engine
            .register_and_check(
                &DedupCandidate {
                    file_id: 1,
                    session_id: "s",
                    path: &path,
                    extension: Some("jpg"),
                },
                None,
            )
            .await;
        assert!(matches!(
            result,
            Err(DedupError::RegistryContention { .. })
        ));
        assert!(engine.locks.is_empty());
    }
}
