//! Pairing of sidecar metadata files with the media files they describe.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use super::SourceEntry;

/// How a sidecar's name relates to its main file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SidecarNaming {
    /// `photo.jpg.xmp`: the main file's full name plus an extension.
    Direct,
    /// `photo.xmp`: the main file's base name plus an extension.
    BaseName,
}

/// A metadata file that travels with its main file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sidecar {
    pub path: PathBuf,
    pub size: u64,
    pub naming: SidecarNaming,
}

impl Sidecar {
    /// Where this sidecar goes when its main file is placed at `main`.
    pub fn destination_for(&self, main: &Path) -> PathBuf {
        let mut name = match self.naming {
            SidecarNaming::Direct => main.file_name(),
            SidecarNaming::BaseName => main.file_stem(),
        }
        .map(OsStr::to_os_string)
        .unwrap_or_default();
        if let Some(ext) = self.path.extension() {
            name.push(".");
            name.push(ext);
        }
        main.with_file_name(name)
    }
}

/// File name with every extension stripped (`photo.jpg.xmp` → `photo`).
fn base_name(path: &Path) -> Option<&OsStr> {
    let mut current = Path::new(path.file_name()?);
    while current.extension().is_some() {
        current = Path::new(current.file_stem()?);
    }
    Some(current.as_os_str())
}

/// Attach every sidecar to the main file it belongs to.
///
/// Pairing only happens within one directory. A direct match wins over a
/// base-name match, and among several base-name matches the first main
/// file in scan order takes the sidecar. A file with a sidecar extension
/// is never a main file; one without a main file stays a regular entry.
pub fn attach_sidecars(entries: Vec<SourceEntry>, extensions: &[String]) -> Vec<SourceEntry> {
    if extensions.is_empty() {
        return entries;
    }
    let (sidecars, mut mains): (Vec<_>, Vec<_>) = entries.into_iter().partition(|entry| {
        entry
            .extension()
            .is_some_and(|ext| extensions.iter().any(|s| s.eq_ignore_ascii_case(&ext)))
    });

    let mut by_path = HashMap::new();
    let mut by_base = HashMap::new();
    for (index, main) in mains.iter().enumerate() {
        by_path.insert(main.path.clone(), index);
        if let Some(base) = base_name(&main.path) {
            by_base.entry(main.path.with_file_name(base)).or_insert(index);
        }
    }

    let mut orphans = Vec::new();
    for sidecar in sidecars {
        let paired = by_path
            .get(&sidecar.path.with_extension(""))
            .map(|&index| (index, SidecarNaming::Direct))
            .or_else(|| {
                base_name(&sidecar.path)
                    .and_then(|base| by_base.get(&sidecar.path.with_file_name(base)))
                    .map(|&index| (index, SidecarNaming::BaseName))
            });
        match paired {
            Some((index, naming)) => mains[index].sidecars.push(Sidecar {
                path: sidecar.path,
                size: sidecar.size,
                naming,
            }),
            None => orphans.push(sidecar),
        }
    }

    mains.extend(orphans);
    mains
}
