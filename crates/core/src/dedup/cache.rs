//! Hash cache keyed by (path, size, mtime).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;

use super::DedupError;
use crate::metrics;
use crate::store::{DedupStore, HashCacheEntry};

/// In-memory front over the persistent hash cache.
///
/// Reads are lock-free per path; writes go through the store's
/// serialized connection.
pub struct HashCache {
    memory: DashMap<PathBuf, (u64, i64, String)>,
    store: Arc<dyn DedupStore>,
}

impl HashCache {
    pub fn new(store: Arc<dyn DedupStore>) -> Self {
        Self {
            memory: DashMap::new(),
            store,
        }
    }

    /// Cached hash if the file still has the recorded size and mtime.
    pub fn get(&self, path: &Path, size: u64, mtime: i64) -> Result<Option<String>, DedupError> {
        if let Some(entry) = self.memory.get(path) {
            let (cached_size, cached_mtime, hash) = entry.value();
            if *cached_size == size && *cached_mtime == mtime {
                metrics::HASH_CACHE_LOOKUPS.with_label_values(&["hit"]).inc();
                return Ok(Some(hash.clone()));
            }
        }

        let persisted = self.store.cached_hash(path, size, mtime)?;
        match &persisted {
            Some(hash) => {
                metrics::HASH_CACHE_LOOKUPS.with_label_values(&["hit"]).inc();
                self.memory
                    .insert(path.to_path_buf(), (size, mtime, hash.clone()));
            }
            None => {
                metrics::HASH_CACHE_LOOKUPS.with_label_values(&["miss"]).inc();
            }
        }
        Ok(persisted)
    }

    /// Record a freshly computed hash, replacing any stale entry.
    pub fn put(&self, entry: HashCacheEntry) -> Result<(), DedupError> {
        self.store.store_hash(&entry)?;
        self.memory
            .insert(entry.path, (entry.size, entry.mtime, entry.hash));
        Ok(())
    }
}
