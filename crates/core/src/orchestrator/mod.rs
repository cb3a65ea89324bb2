//! Run orchestrator for source-to-destination migrations.
//!
//! The orchestrator owns the run lifecycle:
//! - **Scanning**: one walk of the source tree, plus the space preflight
//! - **Processing**: a fixed pool of workers, each driving one file at a time
//!   through the pipeline, with transient errors retried
//! - **Control**: pause, resume and stop observed at stage boundaries
//!
//! Outcomes flow to a single aggregator which persists counters, writes the
//! progress snapshot and notifies the [`ProgressCallback`].

mod aggregator;
mod callback;
mod config;
mod gate;
mod runner;
mod types;

pub use callback::{NoopCallback, ProgressCallback};
pub use config::{OrchestratorConfig, RetryConfig};
pub use gate::{Checkpoint, GateState, RunGate};
pub use runner::{Collaborators, Orchestrator};
pub use types::{OrchestratorError, OrchestratorState, RunRequest, RunSummary};
