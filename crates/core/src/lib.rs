pub mod config;
pub mod content;
pub mod dedup;
pub mod metrics;
pub mod orchestrator;
pub mod pipeline;
pub mod placer;
pub mod scan;
pub mod session;
pub mod space;
pub mod store;
pub mod testing;
pub mod undo;

pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, DatabaseConfig,
    RunConfig,
};
pub use content::{MediaKind, MediaProcessor, RuleBasedProcessor, RuleTable};
pub use dedup::{DedupConfig, DedupEngine, DedupError};
pub use orchestrator::{
    Collaborators, NoopCallback, Orchestrator, OrchestratorConfig, OrchestratorError,
    OrchestratorState, ProgressCallback, RetryConfig, RunRequest, RunSummary,
};
pub use pipeline::{ErrorKind, FileError, FileOutcome, PipelineConfig, PipelineStage, SkipReason};
pub use placer::{FsPlacer, Placer, PlacerConfig, PlacerError};
pub use scan::{SourceEntry, SourceEnumerator, WalkdirEnumerator};
pub use session::{ProgressSnapshot, ResumePoint, SessionError, SessionManager};
pub use space::{SpaceConfig, SpaceError, SpaceMonitor, SpaceProbe, SysinfoProbe};
pub use store::{
    DedupStore, SessionCounters, SessionStatus, SessionStore, SqliteStore, StoreError,
};
pub use undo::{UndoEngine, UndoError, UndoPreview, UndoReport};
