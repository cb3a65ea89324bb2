//! Free-space probes.

use std::path::{Path, PathBuf};

use sysinfo::Disks;

use super::SpaceError;

/// Reports free space on the filesystem holding a path.
pub trait SpaceProbe: Send + Sync {
    fn available_bytes(&self, path: &Path) -> Result<u64, SpaceError>;
}

/// Probe backed by the mounted disks reported by the OS.
#[derive(Debug, Default, Clone, Copy)]
pub struct SysinfoProbe;

impl SysinfoProbe {
    pub fn new() -> Self {
        Self
    }
}

impl SpaceProbe for SysinfoProbe {
    fn available_bytes(&self, path: &Path) -> Result<u64, SpaceError> {
        let resolved = nearest_existing(path)
            .and_then(|p| p.canonicalize().ok())
            .unwrap_or_else(|| path.to_path_buf());

        let disks = Disks::new_with_refreshed_list();
        let mounts: Vec<(PathBuf, u64)> = disks
            .list()
            .iter()
            .map(|d| (d.mount_point().to_path_buf(), d.available_space()))
            .collect();

        longest_mount_match(&resolved, &mounts).ok_or_else(|| SpaceError::Probe {
            path: path.to_path_buf(),
            message: "no mounted disk contains this path".to_string(),
        })
    }
}

/// The path itself or its closest existing ancestor.
fn nearest_existing(path: &Path) -> Option<&Path> {
    path.ancestors().find(|p| p.exists())
}

/// Free space of the mount point that is the longest prefix of `path`.
fn longest_mount_match(path: &Path, mounts: &[(PathBuf, u64)]) -> Option<u64> {
    mounts
        .iter()
        .filter(|(mount, _)| path.starts_with(mount))
        .max_by_key(|(mount, _)| mount.components().count())
        .map(|(_, available)| *available)
}
