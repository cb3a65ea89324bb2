//! Ordered classification rules.
//!
//! Rules are evaluated top to bottom; the earliest declared rule that
//! matches decides the kind. Evaluation is pure: it looks only at the
//! path string and an already-sniffed MIME type.

use std::path::Path;

use super::MediaKind;

const IMAGE_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "bmp", "tif", "tiff", "webp", "heic", "heif", "cr2", "nef", "dng",
];
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "m4v", "mov", "avi", "mkv", "webm", "mpg", "3gp"];
const AUDIO_EXTENSIONS: &[&str] = &["mp3", "m4a", "aac", "flac", "ogg", "wav"];
const DOCUMENT_EXTENSIONS: &[&str] = &["pdf", "doc", "docx", "odt", "txt", "rtf", "md"];

/// What a rule looks at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleMatcher {
    /// Case-insensitive extension set.
    Extensions(Vec<String>),
    /// Prefix of the sniffed MIME type, e.g. `image/`.
    MimePrefix(String),
}

impl RuleMatcher {
    fn matches(&self, path: &Path, sniffed: Option<&str>) -> bool {
        match self {
            Self::Extensions(exts) => path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| exts.iter().any(|x| x.eq_ignore_ascii_case(e)))
                .unwrap_or(false),
            Self::MimePrefix(prefix) => sniffed.is_some_and(|mime| mime.starts_with(prefix.as_str())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    pub name: String,
    pub kind: MediaKind,
    pub matcher: RuleMatcher,
}

impl Rule {
    pub fn extensions(name: impl Into<String>, kind: MediaKind, exts: &[&str]) -> Self {
        Self {
            name: name.into(),
            kind,
            matcher: RuleMatcher::Extensions(exts.iter().map(|e| e.to_string()).collect()),
        }
    }

    pub fn mime_prefix(name: impl Into<String>, kind: MediaKind, prefix: &str) -> Self {
        Self {
            name: name.into(),
            kind,
            matcher: RuleMatcher::MimePrefix(prefix.to_string()),
        }
    }
}

/// Ordered rule list; the first match wins.
#[derive(Debug, Clone, Default)]
pub struct RuleTable {
    rules: Vec<Rule>,
}

impl RuleTable {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self { rules }
    }

    /// Sniffed content first, then extensions.
    pub fn default_rules() -> Self {
        Self::new(vec![
            Rule::mime_prefix("sniffed-image", MediaKind::Image, "image/"),
            Rule::mime_prefix("sniffed-video", MediaKind::Video, "video/"),
            Rule::mime_prefix("sniffed-audio", MediaKind::Audio, "audio/"),
            Rule::mime_prefix("sniffed-pdf", MediaKind::Document, "application/pdf"),
            Rule::extensions("image-extension", MediaKind::Image, IMAGE_EXTENSIONS),
            Rule::extensions("video-extension", MediaKind::Video, VIDEO_EXTENSIONS),
            Rule::extensions("audio-extension", MediaKind::Audio, AUDIO_EXTENSIONS),
            Rule::extensions("document-extension", MediaKind::Document, DOCUMENT_EXTENSIONS),
        ])
    }

    /// First rule matching the file, if any.
    pub fn evaluate(&self, path: &Path, sniffed: Option<&str>) -> Option<&Rule> {
        self.rules.iter().find(|r| r.matcher.matches(path, sniffed))
    }

    /// Kind decided by the first matching rule, `Unknown` when none match.
    pub fn classify(&self, path: &Path, sniffed: Option<&str>) -> MediaKind {
        self.evaluate(path, sniffed)
            .map(|r| r.kind)
            .unwrap_or(MediaKind::Unknown)
    }
}
