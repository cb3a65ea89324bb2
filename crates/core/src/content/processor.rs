//! The processor capability consumed by the pipeline.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Utc};

use super::{MediaKind, Metadata, MetadataError, RuleTable};

/// Classification, metadata and destination routing for one file.
#[async_trait]
pub trait MediaProcessor: Send + Sync {
    /// Decide the media kind from the path and sniffed MIME type.
    fn classify(&self, path: &Path, sniffed: Option<&str>) -> MediaKind;

    /// Extract metadata. Callers treat failures as missing metadata.
    async fn extract_metadata(&self, path: &Path) -> Result<Metadata, MetadataError>;

    /// Relative destination path (including file name) under the destination root.
    fn build_destination_fragment(
        &self,
        path: &Path,
        kind: MediaKind,
        metadata: &Metadata,
    ) -> PathBuf;
}

/// Processor driven by a [`RuleTable`], routing files to `<Kind>/<year>/<name>`.
pub struct RuleBasedProcessor {
    rules: RuleTable,
}

impl RuleBasedProcessor {
    pub fn new(rules: RuleTable) -> Self {
        Self { rules }
    }
}

impl Default for RuleBasedProcessor {
    fn default() -> Self {
        Self::new(RuleTable::default_rules())
    }
}

#[async_trait]
impl MediaProcessor for RuleBasedProcessor {
    fn classify(&self, path: &Path, sniffed: Option<&str>) -> MediaKind {
        self.rules.classify(path, sniffed)
    }

    async fn extract_metadata(&self, path: &Path) -> Result<Metadata, MetadataError> {
        let meta = tokio::fs::metadata(path)
            .await
            .map_err(|e| MetadataError::Unreadable {
                path: path.to_path_buf(),
                source: e,
            })?;

        let mut metadata = Metadata {
            size: Some(meta.len()),
            ..Default::default()
        };
        if let Ok(modified) = meta.modified() {
            metadata = metadata.with_modified(DateTime::<Utc>::from(modified));
        }
        Ok(metadata)
    }

    fn build_destination_fragment(
        &self,
        path: &Path,
        kind: MediaKind,
        metadata: &Metadata,
    ) -> PathBuf {
        let year = metadata
            .modified
            .map(|dt| dt.year().to_string())
            .unwrap_or_else(|| "Undated".to_string());
        let name = path
            .file_name()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("unnamed"));

        PathBuf::from(kind.folder_name()).join(year).join(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_fragment_uses_kind_and_year() {
        let processor = RuleBasedProcessor::default();
        let metadata =
            Metadata::default().with_modified(Utc.with_ymd_and_hms(2019, 6, 1, 12, 0, 0).unwrap());

        let fragment = processor.build_destination_fragment(
            Path::new("/src/trip/IMG_1.jpg"),
            MediaKind::Image,
            &metadata,
        );
        assert_eq!(fragment, PathBuf::from("Images/2019/IMG_1.jpg"));
    }

    #[test]
    fn test_fragment_without_date() {
        let processor = RuleBasedProcessor::default();
        let fragment = processor.build_destination_fragment(
            Path::new("/src/song.mp3"),
            MediaKind::Audio,
            &Metadata::default(),
        );
        assert_eq!(fragment, PathBuf::from("Audio/Undated/song.mp3"));
    }

    #[tokio::test]
    async fn test_extract_metadata() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("a.jpg");
        tokio::fs::write(&path, b"12345").await.unwrap();

        let processor = RuleBasedProcessor::default();
        let metadata = processor.extract_metadata(&path).await.unwrap();
        assert_eq!(metadata.size, Some(5));
        assert!(metadata.modified.is_some());

        let missing = processor.extract_metadata(&dir.path().join("nope")).await;
        assert!(matches!(missing, Err(MetadataError::Unreadable { .. })));
    }
}
