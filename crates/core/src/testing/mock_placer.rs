//! Mock placer for testing.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::placer::{
    ByteProgress, FsPlacer, NameClaim, PlacedFile, PlacementRequest, Placer, PlacerError,
    RollbackResult, StagedFile,
};

/// Placer that commits real files through [`FsPlacer`] but can be slowed
/// down and made to fail.
///
/// Provides controllable behavior for testing:
/// - Inject a queue of I/O failures, consumed one per staging attempt
/// - Delay every staging to widen race windows
/// - Count attempts and commits
///
/// # Example
///
/// ```rust,ignore
/// use archivist_core::testing::MockPlacer;
///
/// let placer = MockPlacer::new();
/// placer.fail_next(2, std::io::ErrorKind::PermissionDenied).await;
///
/// // Third attempt succeeds.
/// assert_eq!(placer.attempt_count(), 3);
/// ```
#[derive(Debug)]
pub struct MockPlacer {
    inner: FsPlacer,
    /// Failures returned before delegating, oldest first.
    failures: Arc<RwLock<VecDeque<io::ErrorKind>>>,
    /// Simulated extra time per staging.
    placement_duration: Arc<RwLock<Duration>>,
    placements: AtomicUsize,
    attempts: AtomicUsize,
}

impl Default for MockPlacer {
    fn default() -> Self {
        Self::new()
    }
}

impl MockPlacer {
    /// Create a mock over a default [`FsPlacer`].
    pub fn new() -> Self {
        Self::with_inner(FsPlacer::with_defaults())
    }

    pub fn with_inner(inner: FsPlacer) -> Self {
        Self {
            inner,
            failures: Arc::new(RwLock::new(VecDeque::new())),
            placement_duration: Arc::new(RwLock::new(Duration::ZERO)),
            placements: AtomicUsize::new(0),
            attempts: AtomicUsize::new(0),
        }
    }

    /// Fail the next `count` staging attempts with `kind`.
    pub async fn fail_next(&self, count: usize, kind: io::ErrorKind) {
        let mut failures = self.failures.write().await;
        for _ in 0..count {
            failures.push_back(kind);
        }
    }

    /// Set the simulated placement duration.
    pub async fn set_placement_duration(&self, duration: Duration) {
        *self.placement_duration.write().await = duration;
    }

    /// Get the number of successful commits.
    pub async fn placement_count(&self) -> usize {
        self.placements.load(Ordering::SeqCst)
    }

    /// Calls to `stage`, failed ones included.
    pub fn attempt_count(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Placer for MockPlacer {
    fn name(&self) -> &str {
        "mock"
    }

    async fn resolve_name(&self, desired: &Path) -> Result<PathBuf, PlacerError> {
        self.inner.resolve_name(desired).await
    }

    async fn stage(
        &self,
        request: PlacementRequest,
        progress: Option<ByteProgress>,
    ) -> Result<StagedFile, PlacerError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        let duration = *self.placement_duration.read().await;
        if !duration.is_zero() {
            tokio::time::sleep(duration).await;
        }

        if let Some(kind) = self.failures.write().await.pop_front() {
            return Err(PlacerError::copy_failed(
                request.source,
                request.destination,
                io::Error::new(kind, "injected failure"),
            ));
        }

        self.inner.stage(request, progress).await
    }

    async fn claim_name(&self, staged: &StagedFile, from: u32) -> Result<NameClaim, PlacerError> {
        self.inner.claim_name(staged, from).await
    }

    async fn commit(&self, staged: &StagedFile, claim: &NameClaim) -> Result<bool, PlacerError> {
        let committed = self.inner.commit(staged, claim).await?;
        if committed {
            self.placements.fetch_add(1, Ordering::SeqCst);
        }
        Ok(committed)
    }

    async fn discard(&self, staged: &StagedFile) -> RollbackResult {
        self.inner.discard(staged).await
    }

    async fn rollback(&self, placed: &PlacedFile) -> RollbackResult {
        self.inner.rollback(placed).await
    }
}
