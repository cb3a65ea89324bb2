//! Trait definitions for the placer module.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::error::PlacerError;
use super::types::{
    ByteProgress, NameClaim, PlacedFile, PlacementRequest, RollbackResult, StagedFile,
};

/// Commits files into the destination tree.
///
/// Placement is split into staging, claiming a name and committing so a
/// caller can record its intent between the last two steps.
#[async_trait]
pub trait Placer: Send + Sync {
    /// Returns the name of this placer implementation.
    fn name(&self) -> &str;

    /// First name in the suffix sequence that is currently free.
    ///
    /// This is advisory: [`Placer::claim_name`] re-verifies the name right
    /// before it is committed.
    async fn resolve_name(&self, desired: &Path) -> Result<PathBuf, PlacerError>;

    /// Copy the source into a synced temporary file beside the desired path.
    async fn stage(
        &self,
        request: PlacementRequest,
        progress: Option<ByteProgress>,
    ) -> Result<StagedFile, PlacerError>;

    /// Reserve the first free name at or after position `from` in the
    /// suffix sequence.
    async fn claim_name(&self, staged: &StagedFile, from: u32) -> Result<NameClaim, PlacerError>;

    /// Publish the staged file under a claimed name without clobbering.
    ///
    /// Returns `false` when the name was taken after it was claimed; the
    /// staged file is left in place for another attempt.
    async fn commit(&self, staged: &StagedFile, claim: &NameClaim) -> Result<bool, PlacerError>;

    /// Remove a staged file that will not be committed.
    async fn discard(&self, staged: &StagedFile) -> RollbackResult;

    /// Remove a committed file and any directories created for it that are now empty.
    async fn rollback(&self, placed: &PlacedFile) -> RollbackResult;

    /// Stage, claim and commit in one go.
    async fn place(
        &self,
        request: PlacementRequest,
        progress: Option<ByteProgress>,
    ) -> Result<PlacedFile, PlacerError> {
        let staged = self.stage(request, progress).await?;
        let mut from = 0;
        let placed = loop {
            let claim = match self.claim_name(&staged, from).await {
                Ok(claim) => claim,
                Err(e) => break Err(e),
            };
            match self.commit(&staged, &claim).await {
                Ok(true) => break Ok(staged.placed_as(claim.path().to_path_buf())),
                Ok(false) => from = claim.attempt() + 1,
                Err(e) => break Err(e),
            }
        };
        if placed.is_err() {
            self.discard(&staged).await;
        }
        placed
    }
}
