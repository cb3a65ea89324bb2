//! Streaming content hashing.

use std::path::Path;

use sha2::{Digest, Sha256};
use tokio::fs::File;
use tokio::io::AsyncReadExt;

use super::DedupError;
use crate::placer::ByteProgress;
use crate::scan::mtime_nanos;

/// Digest of a file together with the metadata it was read under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashedFile {
    pub hash: String,
    /// Size reported by the open handle before reading.
    pub size: u64,
    /// Modification time of the open handle, `None` where the platform has none.
    pub mtime: Option<i64>,
}

/// SHA-256 of a file, read sequentially in `buffer_size` chunks.
///
/// `progress` receives the cumulative number of bytes hashed after every chunk.
pub async fn hash_file(
    path: &Path,
    buffer_size: usize,
    progress: Option<&ByteProgress>,
) -> Result<HashedFile, DedupError> {
    let mut file = File::open(path)
        .await
        .map_err(|e| DedupError::hash_compute(path, e))?;
    let meta = file
        .metadata()
        .await
        .map_err(|e| DedupError::hash_compute(path, e))?;

    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; buffer_size.max(1)];
    let mut total = 0u64;

    loop {
        let read = file
            .read(&mut buffer)
            .await
            .map_err(|e| DedupError::hash_compute(path, e))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
        total += read as u64;
        if let Some(report) = progress {
            (**report)(total);
        }
    }

    Ok(HashedFile {
        hash: format!("{:x}", hasher.finalize()),
        size: meta.len(),
        mtime: meta.modified().ok().map(mtime_nanos),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_hash_known_content() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("hello.txt");
        tokio::fs::write(&path, b"hello world").await.unwrap();

        let hashed = hash_file(&path, 4, None).await.unwrap();
        assert_eq!(
            hashed.hash,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
        assert_eq!(hashed.size, 11);
        assert!(hashed.mtime.is_some());
    }

    #[tokio::test]
    async fn test_hash_independent_of_buffer_size() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.bin");
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        tokio::fs::write(&path, &data).await.unwrap();

        let small = hash_file(&path, 7, None).await.unwrap();
        let large = hash_file(&path, 65536, None).await.unwrap();
        assert_eq!(small.hash, large.hash);
    }

    #[tokio::test]
    async fn test_hash_reports_progress() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.bin");
        tokio::fs::write(&path, vec![1u8; 1000]).await.unwrap();

        let seen = Arc::new(AtomicU64::new(0));
        let seen_clone = Arc::clone(&seen);
        let progress: ByteProgress = Arc::new(move |bytes| {
            seen_clone.store(bytes, Ordering::SeqCst);
        });

        hash_file(&path, 100, Some(&progress)).await.unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 1000);
    }

    #[tokio::test]
    async fn test_hash_missing_file() {
        let result = hash_file(Path::new("/nonexistent/file.bin"), 1024, None).await;
        assert!(matches!(result, Err(DedupError::HashCompute { .. })));
    }
}
