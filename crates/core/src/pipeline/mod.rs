//! Per-file processing pipeline.
//!
//! Each source file passes through a fixed sequence of stages, each of which
//! either ends the file's handling or hands it to the next one:
//!
//! 1. `AlreadyProcessed` / `SkippedByPattern` / `TypeDetected` / `UnknownTypeFilter`:
//!    cheap rejections before any content is hashed.
//! 2. `DuplicateCheck`: register with the [`DedupEngine`](crate::dedup::DedupEngine).
//! 3. `Categorize` / `ResolveDestinationPath` / `ResolveNameConflict`: route the file.
//! 4. `PerformFileOperation` / `RecordMapping` / `UpdateProgress`: commit the copy,
//!    then its mapping, then the file record.
//!
//! The pipeline never retries; transient failures are returned as
//! [`ErrorKind::TransientIo`] and retried by the orchestrator.

mod config;
mod file_pipeline;
mod skip;
mod types;

pub use config::PipelineConfig;
pub use file_pipeline::FilePipeline;
pub use skip::SkipRules;
pub use types::{ErrorKind, FileError, FileOutcome, PipelineStage, SkipReason};
