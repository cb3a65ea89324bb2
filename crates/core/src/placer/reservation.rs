//! In-process claims on destination names.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Names currently being committed by some worker.
///
/// Filesystem existence checks are racy between workers of the same
/// process; a name must be reserved here before it is checked and committed.
#[derive(Debug, Clone, Default)]
pub struct ReservationSet {
    inner: Arc<Mutex<HashSet<PathBuf>>>,
}

impl ReservationSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `path`. Returns `None` if another worker holds it.
    pub fn try_reserve(&self, path: &Path) -> Option<Reservation> {
        let mut held = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        if held.insert(path.to_path_buf()) {
            Some(Reservation {
                path: path.to_path_buf(),
                set: Arc::clone(&self.inner),
            })
        } else {
            None
        }
    }

    pub fn is_reserved(&self, path: &Path) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .contains(path)
    }
}

/// Held claim on a destination name; released on drop.
#[derive(Debug)]
pub struct Reservation {
    path: PathBuf,
    set: Arc<Mutex<HashSet<PathBuf>>>,
}

impl Reservation {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(&self.path);
    }
}
