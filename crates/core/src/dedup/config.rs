//! Configuration for duplicate detection.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// How the canonical member of a duplicate group is chosen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CanonicalPolicy {
    /// The first file to enter the per-key critical section wins.
    #[default]
    ArrivalOrder,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupConfig {
    /// Read buffer used while hashing.
    #[serde(default = "default_hash_buffer_size")]
    pub hash_buffer_size: usize,

    /// Extension classes. Extensions not listed form their own class.
    #[serde(default = "default_extension_classes")]
    pub extension_classes: BTreeMap<String, Vec<String>>,

    /// Retries of the registry critical section after a write conflict.
    #[serde(default = "default_conflict_retries")]
    pub conflict_retries: u32,

    #[serde(default)]
    pub canonical_policy: CanonicalPolicy,
}

fn default_hash_buffer_size() -> usize {
    64 * 1024
}

fn default_conflict_retries() -> u32 {
    3
}

fn default_extension_classes() -> BTreeMap<String, Vec<String>> {
    let classes: [(&str, &[&str]); 8] = [
        ("jpeg", &["jpg", "jpeg", "jpe", "jfif", "jif"]),
        ("tiff", &["tif", "tiff"]),
        ("heif", &["heic", "heif"]),
        ("mpeg4", &["mp4", "m4v"]),
        ("quicktime", &["mov", "qt"]),
        ("mpeg", &["mpg", "mpeg", "mpe"]),
        ("matroska", &["mkv", "mka"]),
        ("aac", &["aac", "m4a"]),
    ];

    classes
        .into_iter()
        .map(|(class, exts)| {
            (
                class.to_string(),
                exts.iter().map(|e| e.to_string()).collect(),
            )
        })
        .collect()
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            hash_buffer_size: default_hash_buffer_size(),
            extension_classes: default_extension_classes(),
            conflict_retries: default_conflict_retries(),
            canonical_policy: CanonicalPolicy::default(),
        }
    }
}

impl DedupConfig {
    pub fn with_hash_buffer_size(mut self, size: usize) -> Self {
        self.hash_buffer_size = size;
        self
    }

    pub fn with_extension_class(mut self, class: impl Into<String>, exts: &[&str]) -> Self {
        self.extension_classes
            .insert(class.into(), exts.iter().map(|e| e.to_string()).collect());
        self
    }
}
