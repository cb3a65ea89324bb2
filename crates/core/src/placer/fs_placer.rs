//! File system placer implementation.

use std::collections::HashSet;
use std::ffi::{OsStr, OsString};
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader, BufWriter};
use tracing::{debug, warn};
use uuid::Uuid;

use super::config::PlacerConfig;
use super::error::PlacerError;
use super::reservation::ReservationSet;
use super::traits::Placer;
use super::types::{
    ByteProgress, NameClaim, PlacedFile, PlacementRequest, RollbackResult, StagedFile,
};

const PARTIAL_SUFFIX: &str = ".partial";

/// Path for the `attempt`-th name in the conflict sequence.
///
/// Attempt 0 is the desired path itself; attempt `n` inserts `--n` before
/// the extension (`photo.jpg` → `photo--2.jpg`).
pub fn candidate_name(desired: &Path, attempt: u32) -> PathBuf {
    if attempt == 0 {
        return desired.to_path_buf();
    }
    let mut name = desired
        .file_stem()
        .map(OsStr::to_os_string)
        .unwrap_or_default();
    name.push(format!("--{}", attempt));
    if let Some(ext) = desired.extension() {
        name.push(".");
        name.push(ext);
    }
    desired.with_file_name(name)
}

/// File system based placer implementation.
#[derive(Debug)]
pub struct FsPlacer {
    config: PlacerConfig,
    reservations: ReservationSet,
}

impl FsPlacer {
    /// Creates a new file system placer with the given configuration.
    pub fn new(config: PlacerConfig) -> Self {
        Self {
            config,
            reservations: ReservationSet::new(),
        }
    }

    /// Creates a placer with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(PlacerConfig::default())
    }

    /// Remove temporary files left behind by an interrupted run.
    pub fn sweep_partials(root: &Path) -> io::Result<usize> {
        let mut removed = 0;
        for entry in walkdir::WalkDir::new(root).follow_links(false) {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    debug!("Skipping unreadable entry during sweep: {}", e);
                    continue;
                }
            };
            let name = entry.file_name().as_encoded_bytes();
            let is_partial = entry.file_type().is_file()
                && name.starts_with(b".")
                && name.ends_with(PARTIAL_SUFFIX.as_bytes());
            if is_partial {
                std::fs::remove_file(entry.path())?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn temp_path_for(destination: &Path) -> PathBuf {
        let mut name = OsString::from(".");
        name.push(destination.file_name().unwrap_or(OsStr::new("file")));
        name.push(format!(".{}{}", Uuid::new_v4().simple(), PARTIAL_SUFFIX));
        destination.with_file_name(name)
    }

    async fn exists(path: &Path) -> bool {
        fs::symlink_metadata(path).await.is_ok()
    }

    /// Creates parent directories for a path, returning the ones created (parent first).
    async fn ensure_parent_dirs(&self, path: &Path) -> Result<Vec<PathBuf>, PlacerError> {
        let mut created = Vec::new();
        if let Some(parent) = path.parent() {
            if !Self::exists(parent).await {
                let mut current = parent;
                while !Self::exists(current).await {
                    created.push(current.to_path_buf());
                    current = match current.parent() {
                        Some(p) => p,
                        None => break,
                    };
                }

                fs::create_dir_all(parent)
                    .await
                    .map_err(|e| PlacerError::DirectoryCreationFailed {
                        path: parent.to_path_buf(),
                        source: e,
                    })?;
                created.reverse();
            }
        }
        Ok(created)
    }

    /// Copies the source into a fresh temporary file and syncs it to disk.
    async fn copy_to_temp(
        &self,
        source: &Path,
        temp: &Path,
        progress: Option<&ByteProgress>,
    ) -> Result<u64, PlacerError> {
        let source_file = File::open(source).await.map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                PlacerError::SourceNotFound {
                    path: source.to_path_buf(),
                }
            } else {
                PlacerError::copy_failed(source.to_path_buf(), temp.to_path_buf(), e)
            }
        })?;
        let modified = source_file
            .metadata()
            .await
            .ok()
            .and_then(|m| m.modified().ok());

        let dest_file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(temp)
            .await
            .map_err(|e| PlacerError::copy_failed(source.to_path_buf(), temp.to_path_buf(), e))?;

        let mut reader = BufReader::with_capacity(self.config.buffer_size, source_file);
        let mut writer = BufWriter::with_capacity(self.config.buffer_size, dest_file);
        let mut buffer = vec![0u8; self.config.buffer_size.max(1)];
        let mut total_bytes = 0u64;

        loop {
            let bytes_read = reader.read(&mut buffer).await.map_err(|e| {
                PlacerError::copy_failed(source.to_path_buf(), temp.to_path_buf(), e)
            })?;
            if bytes_read == 0 {
                break;
            }

            writer.write_all(&buffer[..bytes_read]).await.map_err(|e| {
                PlacerError::copy_failed(source.to_path_buf(), temp.to_path_buf(), e)
            })?;

            total_bytes += bytes_read as u64;
            if let Some(report) = progress {
                (**report)(total_bytes);
            }
        }

        writer.flush().await.map_err(|e| {
            PlacerError::copy_failed(source.to_path_buf(), temp.to_path_buf(), e)
        })?;
        let dest_file = writer.into_inner();
        dest_file.sync_all().await.map_err(|e| {
            PlacerError::copy_failed(source.to_path_buf(), temp.to_path_buf(), e)
        })?;

        if self.config.preserve_mtime {
            if let Some(modified) = modified {
                let std_file = dest_file.into_std().await;
                let applied = tokio::task::spawn_blocking(move || std_file.set_modified(modified))
                    .await
                    .map_err(io::Error::other)
                    .and_then(|r| r);
                if let Err(e) = applied {
                    warn!("Could not preserve mtime on {}: {}", temp.display(), e);
                }
            }
        }

        Ok(total_bytes)
    }

    /// Remove the directories in `dirs` that are empty, child first.
    async fn prune_dirs(dirs: &[PathBuf], result: &mut RollbackResult) {
        let mut attempted: HashSet<&PathBuf> = HashSet::new();
        for dir in dirs.iter().rev() {
            if !attempted.insert(dir) {
                continue;
            }
            let empty = match fs::read_dir(dir).await {
                Ok(mut entries) => matches!(entries.next_entry().await, Ok(None)),
                Err(_) => false,
            };
            if empty {
                match fs::remove_dir(dir).await {
                    Ok(()) => result.directories_removed += 1,
                    Err(e) => result
                        .errors
                        .push(format!("Failed to remove directory {}: {}", dir.display(), e)),
                }
            }
        }
    }

    async fn remove_if_present(path: &Path, result: &mut RollbackResult) {
        if Self::exists(path).await {
            match fs::remove_file(path).await {
                Ok(()) => result.files_removed += 1,
                Err(e) => result
                    .errors
                    .push(format!("Failed to remove {}: {}", path.display(), e)),
            }
        }
    }
}

#[async_trait]
impl Placer for FsPlacer {
    fn name(&self) -> &str {
        "fs"
    }

    async fn resolve_name(&self, desired: &Path) -> Result<PathBuf, PlacerError> {
        for attempt in 0..=self.config.max_name_conflicts {
            let candidate = candidate_name(desired, attempt);
            if !self.reservations.is_reserved(&candidate) && !Self::exists(&candidate).await {
                return Ok(candidate);
            }
        }
        Err(PlacerError::NameConflictExhausted {
            path: desired.to_path_buf(),
            attempts: self.config.max_name_conflicts + 1,
        })
    }

    async fn stage(
        &self,
        request: PlacementRequest,
        progress: Option<ByteProgress>,
    ) -> Result<StagedFile, PlacerError> {
        let meta = fs::metadata(&request.source).await.map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                PlacerError::SourceNotFound {
                    path: request.source.clone(),
                }
            } else {
                PlacerError::Io(e)
            }
        })?;
        if !meta.is_file() {
            return Err(PlacerError::SourceNotFound {
                path: request.source.clone(),
            });
        }

        let created_directories = self.ensure_parent_dirs(&request.destination).await?;
        let mut staged = StagedFile {
            temp: Self::temp_path_for(&request.destination),
            source: request.source,
            desired: request.destination,
            size_bytes: 0,
            created_directories,
        };

        match self
            .copy_to_temp(&staged.source, &staged.temp, progress.as_ref())
            .await
        {
            Ok(size) => {
                staged.size_bytes = size;
                Ok(staged)
            }
            Err(e) => {
                self.discard(&staged).await;
                Err(e)
            }
        }
    }

    async fn claim_name(&self, staged: &StagedFile, from: u32) -> Result<NameClaim, PlacerError> {
        for attempt in from..=self.config.max_name_conflicts {
            let candidate = candidate_name(&staged.desired, attempt);
            let Some(reservation) = self.reservations.try_reserve(&candidate) else {
                continue;
            };
            if Self::exists(&candidate).await {
                continue;
            }
            return Ok(NameClaim::new(attempt, reservation));
        }

        Err(PlacerError::NameConflictExhausted {
            path: staged.desired.clone(),
            attempts: self.config.max_name_conflicts + 1,
        })
    }

    async fn commit(&self, staged: &StagedFile, claim: &NameClaim) -> Result<bool, PlacerError> {
        let (temp, candidate) = (staged.temp.as_path(), claim.path());
        let committed = match fs::hard_link(temp, candidate).await {
            Ok(()) => {
                if let Err(e) = fs::remove_file(temp).await {
                    warn!("Failed to remove temp file {}: {}", temp.display(), e);
                }
                true
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => false,
            Err(e) => {
                // Filesystems without hard links: the reservation plus an
                // existence check guard the rename instead.
                debug!("Hard link unavailable ({}), renaming instead", e);
                if Self::exists(candidate).await {
                    return Ok(false);
                }
                fs::rename(temp, candidate)
                    .await
                    .map_err(|error| PlacerError::CommitFailed {
                        temp: temp.to_path_buf(),
                        destination: candidate.to_path_buf(),
                        error,
                    })?;
                true
            }
        };

        if committed && claim.attempt() > 0 {
            debug!(
                "Name conflict on {}, placed as {}",
                staged.desired.display(),
                candidate.display()
            );
        }
        Ok(committed)
    }

    async fn discard(&self, staged: &StagedFile) -> RollbackResult {
        let mut result = RollbackResult::default();
        Self::remove_if_present(&staged.temp, &mut result).await;
        Self::prune_dirs(&staged.created_directories, &mut result).await;
        result
    }

    async fn rollback(&self, placed: &PlacedFile) -> RollbackResult {
        let mut result = RollbackResult::default();
        Self::remove_if_present(&placed.destination, &mut result).await;
        Self::prune_dirs(&placed.created_directories, &mut result).await;
        result
    }
}
