//! Configuration for the placer module.

use serde::{Deserialize, Serialize};

/// Configuration for the file system placer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlacerConfig {
    /// Buffer size for file copies in bytes.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// Highest numeric suffix tried before giving up on a name.
    #[serde(default = "default_max_name_conflicts")]
    pub max_name_conflicts: u32,

    /// Whether copied files keep the source modification time.
    #[serde(default = "default_true")]
    pub preserve_mtime: bool,
}

fn default_buffer_size() -> usize {
    8 * 1024 * 1024 // 8 MB
}

fn default_max_name_conflicts() -> u32 {
    10_000
}

fn default_true() -> bool {
    true
}

impl Default for PlacerConfig {
    fn default() -> Self {
        Self {
            buffer_size: default_buffer_size(),
            max_name_conflicts: default_max_name_conflicts(),
            preserve_mtime: true,
        }
    }
}

impl PlacerConfig {
    /// Sets the buffer size for copies.
    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    /// Sets the suffix limit for name conflicts.
    pub fn with_max_name_conflicts(mut self, max: u32) -> Self {
        self.max_name_conflicts = max;
        self
    }
}
