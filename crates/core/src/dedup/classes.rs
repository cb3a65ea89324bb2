//! Extension → coarse class folding.

use std::collections::{BTreeMap, HashMap};

/// Class used for files without an extension.
const NO_EXTENSION: &str = "noext";

/// Case-insensitive lookup from a file extension to its dedup class.
#[derive(Debug, Clone, Default)]
pub struct ExtensionClasses {
    by_extension: HashMap<String, String>,
}

impl ExtensionClasses {
    pub fn new(classes: &BTreeMap<String, Vec<String>>) -> Self {
        let mut by_extension = HashMap::new();
        for (class, extensions) in classes {
            for ext in extensions {
                by_extension
                    .entry(normalize(ext))
                    .or_insert_with(|| class.to_lowercase());
            }
        }
        Self { by_extension }
    }

    /// Class for an extension. Unlisted extensions are their own class.
    pub fn class_for(&self, extension: Option<&str>) -> String {
        match extension.map(normalize) {
            Some(ext) if !ext.is_empty() => self.by_extension.get(&ext).cloned().unwrap_or(ext),
            _ => NO_EXTENSION.to_string(),
        }
    }
}

fn normalize(ext: &str) -> String {
    ext.trim_start_matches('.').to_lowercase()
}
