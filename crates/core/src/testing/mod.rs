//! Testing utilities and mock implementations.
//!
//! This module provides controllable stand-ins for the collaborators that
//! touch the outside world, allowing full runs against a temporary
//! directory without depending on the host's disks.
//!
//! # Example
//!
//! ```rust,ignore
//! use archivist_core::testing::{MockSpaceProbe, RecordingCallback};
//!
//! let probe = Arc::new(MockSpaceProbe::new(10 * 1024 * 1024 * 1024));
//! let callback = Arc::new(RecordingCallback::new());
//!
//! // Drop below the low-space threshold mid-run.
//! probe.set_available(1024);
//! ```

mod mock_placer;
mod mock_space_probe;
mod recording_callback;

pub use mock_placer::MockPlacer;
pub use mock_space_probe::MockSpaceProbe;
pub use recording_callback::{CallbackEvent, RecordingCallback};

/// Test fixtures and helper functions.
pub mod fixtures {
    use std::io;
    use std::path::{Path, PathBuf};

    const JPEG_MAGIC: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F', 0x00];
    const MP3_MAGIC: &[u8] = b"ID3\x04\x00\x00";

    /// JPEG signature followed by `body`.
    pub fn jpeg(body: &[u8]) -> Vec<u8> {
        [JPEG_MAGIC, body].concat()
    }

    /// MP3 (ID3) signature followed by `body`.
    pub fn mp3(body: &[u8]) -> Vec<u8> {
        [MP3_MAGIC, body].concat()
    }

    /// Write `contents` to `root/relative`, creating parent directories.
    pub fn write_file(root: &Path, relative: &str, contents: &[u8]) -> io::Result<PathBuf> {
        let path = root.join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, contents)?;
        Ok(path)
    }

    /// Every regular file under `root`, relative to it, sorted.
    pub fn list_files(root: &Path) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = walkdir::WalkDir::new(root)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
            .filter_map(|e| e.path().strip_prefix(root).ok().map(Path::to_path_buf))
            .collect();
        files.sort();
        files
    }
}
