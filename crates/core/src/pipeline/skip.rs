//! Name, glob and hidden-file skip rules.

use std::path::{Component, Path};

use glob_match::glob_match;

use super::PipelineConfig;

/// Compiled skip rules. The first matching rule names the skip reason.
#[derive(Debug, Clone)]
pub struct SkipRules {
    hidden: bool,
    names: Vec<String>,
    globs: Vec<String>,
}

impl SkipRules {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            hidden: config.skip_hidden,
            names: config.skip_names.iter().map(|n| n.to_lowercase()).collect(),
            globs: config.skip_globs.iter().map(|g| g.to_lowercase()).collect(),
        }
    }

    /// Rule that excludes `path`, if any. `root` bounds the hidden-directory check.
    pub fn matching_rule(&self, path: &Path, root: &Path) -> Option<String> {
        let name = path.file_name()?.to_string_lossy().to_lowercase();

        if let Some(rule) = self.names.iter().find(|n| **n == name) {
            return Some(format!("name:{rule}"));
        }
        if let Some(glob) = self.globs.iter().find(|g| glob_match(g, &name)) {
            return Some(format!("glob:{glob}"));
        }
        if self.hidden && is_hidden(path, root) {
            return Some("hidden".to_string());
        }
        None
    }
}

/// Whether the file or any directory between it and `root` is dot-prefixed.
fn is_hidden(path: &Path, root: &Path) -> bool {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative.components().any(|c| match c {
        Component::Normal(part) => part.to_string_lossy().starts_with('.'),
        _ => false,
    })
}
