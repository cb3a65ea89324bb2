//! Configuration for the file pipeline.

use serde::{Deserialize, Serialize};

/// Skip rules applied before any content is read, and the extensions of
/// sidecar files that travel with their main file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Skip files and directories whose name starts with a dot.
    #[serde(default = "default_true")]
    pub skip_hidden: bool,

    /// Exact file names to skip (case-insensitive).
    #[serde(default = "default_skip_names")]
    pub skip_names: Vec<String>,

    /// File name globs to skip (case-insensitive).
    #[serde(default = "default_skip_globs")]
    pub skip_globs: Vec<String>,

    /// Skip files no rule could classify.
    #[serde(default = "default_true")]
    pub skip_unknown: bool,

    /// Extensions (case-insensitive, without the dot) of metadata files
    /// placed next to their main file instead of on their own.
    #[serde(default = "default_sidecar_extensions")]
    pub sidecar_extensions: Vec<String>,
}

fn default_true() -> bool {
    true
}

fn default_skip_names() -> Vec<String> {
    vec![
        ".DS_Store".to_string(),
        "Thumbs.db".to_string(),
        "desktop.ini".to_string(),
    ]
}

fn default_skip_globs() -> Vec<String> {
    vec!["*.tmp".to_string(), "*.temp".to_string(), "*.part".to_string()]
}

fn default_sidecar_extensions() -> Vec<String> {
    ["xmp", "aae", "thm", "srt", "sub", "lrc"]
        .map(String::from)
        .to_vec()
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            skip_hidden: true,
            skip_names: default_skip_names(),
            skip_globs: default_skip_globs(),
            skip_unknown: true,
            sidecar_extensions: default_sidecar_extensions(),
        }
    }
}

impl PipelineConfig {
    pub fn with_skip_hidden(mut self, skip: bool) -> Self {
        self.skip_hidden = skip;
        self
    }

    pub fn with_skip_unknown(mut self, skip: bool) -> Self {
        self.skip_unknown = skip;
        self
    }

    pub fn with_skip_glob(mut self, glob: impl Into<String>) -> Self {
        self.skip_globs.push(glob.into());
        self
    }
}
