//! Mock space probe for testing.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::space::{SpaceError, SpaceProbe};

/// Reports a settable amount of free space for every path.
#[derive(Debug)]
pub struct MockSpaceProbe {
    available: AtomicU64,
}

impl MockSpaceProbe {
    pub fn new(available_bytes: u64) -> Self {
        Self {
            available: AtomicU64::new(available_bytes),
        }
    }

    /// Change the free space seen by subsequent probes.
    pub fn set_available(&self, bytes: u64) {
        self.available.store(bytes, Ordering::SeqCst);
    }
}

impl Default for MockSpaceProbe {
    fn default() -> Self {
        Self::new(u64::MAX)
    }
}

impl SpaceProbe for MockSpaceProbe {
    fn available_bytes(&self, _path: &Path) -> Result<u64, SpaceError> {
        Ok(self.available.load(Ordering::SeqCst))
    }
}
