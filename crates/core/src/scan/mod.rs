//! Source tree enumeration.

mod sidecar;

pub use sidecar::{attach_sidecars, Sidecar, SidecarNaming};

use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::warn;

/// A candidate file discovered under the source root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceEntry {
    pub path: PathBuf,
    pub size: u64,
    pub modified: Option<SystemTime>,
    /// Metadata files that travel with this one.
    pub sidecars: Vec<Sidecar>,
}

impl SourceEntry {
    /// Size of the file and its sidecars.
    pub fn total_size(&self) -> u64 {
        self.size + self.sidecars.iter().map(|s| s.size).sum::<u64>()
    }

    /// Lower-cased extension without the dot.
    pub fn extension(&self) -> Option<String> {
        self.path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
    }
}

/// Nanoseconds since the Unix epoch, saturating at the `i64` range.
pub fn mtime_nanos(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(d) => i64::try_from(d.as_nanos()).unwrap_or(i64::MAX),
        Err(e) => -i64::try_from(e.duration().as_nanos()).unwrap_or(i64::MAX),
    }
}

/// Produces the files to migrate.
///
/// The iterator is lazy and restartable: calling `enumerate` again walks
/// the tree from scratch.
pub trait SourceEnumerator: Send + Sync {
    fn enumerate(&self, root: &Path)
        -> Box<dyn Iterator<Item = io::Result<SourceEntry>> + Send>;
}

/// Recursive walk over regular files, never following symlinks.
#[derive(Debug, Clone, Default)]
pub struct WalkdirEnumerator {
    /// Directories (absolute) that are never descended into.
    excluded: Vec<PathBuf>,
}

impl WalkdirEnumerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Skip everything below `dir`.
    pub fn exclude(mut self, dir: impl Into<PathBuf>) -> Self {
        self.excluded.push(dir.into());
        self
    }
}

impl SourceEnumerator for WalkdirEnumerator {
    fn enumerate(
        &self,
        root: &Path,
    ) -> Box<dyn Iterator<Item = io::Result<SourceEntry>> + Send> {
        let excluded = self.excluded.clone();
        let walker = walkdir::WalkDir::new(root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(move |e| !excluded.iter().any(|x| e.path() == x.as_path()));

        Box::new(walker.filter_map(|entry| match entry {
            Ok(entry) if entry.file_type().is_file() => Some(
                entry
                    .metadata()
                    .map(|meta| SourceEntry {
                        path: entry.path().to_path_buf(),
                        size: meta.len(),
                        modified: meta.modified().ok(),
                        sidecars: Vec::new(),
                    })
                    .map_err(io::Error::from),
            ),
            Ok(_) => None,
            Err(e) => {
                warn!("Unreadable entry while scanning: {}", e);
                None
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_enumerates_regular_files_recursively() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("a/b")).unwrap();
        std::fs::write(dir.path().join("top.jpg"), b"12").unwrap();
        std::fs::write(dir.path().join("a/b/deep.mp4"), b"12345").unwrap();

        let entries: Vec<SourceEntry> = WalkdirEnumerator::new()
            .enumerate(dir.path())
            .collect::<io::Result<_>>()
            .unwrap();
        assert_eq!(entries.len(), 2);
        let deep = entries
            .iter()
            .find(|e| e.path.ends_with("a/b/deep.mp4"))
            .unwrap();
        assert_eq!(deep.size, 5);
        assert!(deep.modified.is_some());
    }

    #[test]
    fn test_excluded_directory_is_skipped() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("out")).unwrap();
        std::fs::write(dir.path().join("keep.jpg"), b"1").unwrap();
        std::fs::write(dir.path().join("out/skip.jpg"), b"1").unwrap();

        let entries: Vec<SourceEntry> = WalkdirEnumerator::new()
            .exclude(dir.path().join("out"))
            .enumerate(dir.path())
            .collect::<io::Result<_>>()
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].path.ends_with("keep.jpg"));
    }

    #[test]
    fn test_mtime_nanos() {
        assert_eq!(mtime_nanos(UNIX_EPOCH), 0);
        assert_eq!(mtime_nanos(UNIX_EPOCH + Duration::from_secs(2)), 2_000_000_000);
        assert_eq!(mtime_nanos(UNIX_EPOCH - Duration::from_nanos(5)), -5);
    }

    #[test]
    fn test_entry_extension_lowercased() {
        let entry = SourceEntry {
            path: PathBuf::from("/src/photo (copy).JPG"),
            size: 1,
            modified: None,
            sidecars: Vec::new(),
        };
        assert_eq!(entry.extension().as_deref(), Some("jpg"));
    }
}
