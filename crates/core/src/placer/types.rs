//! Types for the placer module.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::reservation::Reservation;

/// Receives the cumulative number of bytes processed by a long operation.
pub type ByteProgress = Arc<dyn Fn(u64) + Send + Sync>;

/// A single file to place.
#[derive(Debug, Clone)]
pub struct PlacementRequest {
    /// Source file.
    pub source: PathBuf,
    /// Preferred final path. A numeric suffix is added if it is taken.
    pub destination: PathBuf,
}

/// A source copied into a temporary file next to its desired destination,
/// ready to be committed under a claimed name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedFile {
    pub source: PathBuf,
    /// Hidden temporary file holding the copied bytes.
    pub temp: PathBuf,
    /// Preferred final path.
    pub desired: PathBuf,
    pub size_bytes: u64,
    /// Directories created for this file, parent first.
    pub created_directories: Vec<PathBuf>,
}

impl StagedFile {
    /// The placement this staged file becomes once committed as `destination`.
    pub fn placed_as(&self, destination: PathBuf) -> PlacedFile {
        PlacedFile {
            source: self.source.clone(),
            destination,
            size_bytes: self.size_bytes,
            created_directories: self.created_directories.clone(),
        }
    }
}

/// Exclusive in-process hold on one name of the conflict sequence.
#[derive(Debug)]
pub struct NameClaim {
    attempt: u32,
    reservation: Reservation,
}

impl NameClaim {
    pub(crate) fn new(attempt: u32, reservation: Reservation) -> Self {
        Self {
            attempt,
            reservation,
        }
    }

    pub fn path(&self) -> &Path {
        self.reservation.path()
    }

    /// Position in the conflict sequence; 0 is the desired name.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

/// A file that was committed to the destination tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlacedFile {
    pub source: PathBuf,
    /// Final path, possibly suffixed.
    pub destination: PathBuf,
    pub size_bytes: u64,
    /// Directories created for this file, parent first.
    pub created_directories: Vec<PathBuf>,
}

impl PlacedFile {
    /// Whether the file landed under a different name than requested.
    pub fn was_renamed(&self, requested: &Path) -> bool {
        self.destination != requested
    }
}

/// Result of rolling back a placement.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RollbackResult {
    pub files_removed: usize,
    pub directories_removed: usize,
    pub errors: Vec<String>,
}

impl RollbackResult {
    pub fn success(&self) -> bool {
        self.errors.is_empty()
    }
}
