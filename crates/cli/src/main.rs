mod progress;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::signal;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use archivist_core::{
    load_config, metrics, validate_config, Collaborators, Config, DedupEngine, FsPlacer,
    Orchestrator, OrchestratorState, RuleBasedProcessor, RuleTable, RunRequest, SpaceMonitor,
    SpaceProbe, SqliteStore, SysinfoProbe, UndoEngine, WalkdirEnumerator,
};

use progress::LogProgress;

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("archivist {}", VERSION);

    // Determine config path
    let config_path = std::env::var("ARCHIVIST_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("archivist.toml"));

    // Load configuration
    info!("Loading configuration from {:?}", config_path);
    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    // Validate configuration
    validate_config(&config).context("Configuration validation failed")?;

    let db_path = config
        .database_path()
        .context("run.destination or database.path must be set")?;
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {:?}", parent))?;
    }
    info!("Database path: {:?}", db_path);
    let store = Arc::new(SqliteStore::new(&db_path).context("Failed to open session store")?);

    let registry = prometheus::Registry::new();
    for metric in metrics::all_metrics() {
        registry
            .register(metric)
            .context("Failed to register metrics")?;
    }

    let result = match std::env::var("ARCHIVIST_UNDO") {
        Ok(session_id) => {
            let preview = std::env::var("ARCHIVIST_UNDO_PREVIEW").is_ok_and(|v| v == "1");
            undo(store, &session_id, preview).await
        }
        Err(_) => migrate(&config, store).await,
    };

    let mut buffer = String::new();
    if prometheus::TextEncoder::new()
        .encode_utf8(&registry.gather(), &mut buffer)
        .is_ok()
    {
        debug!("Metrics:\n{}", buffer);
    }
    result
}

/// Resume the matching incomplete session, or start a new one.
async fn migrate(config: &Config, store: Arc<SqliteStore>) -> Result<()> {
    let source = config
        .run
        .source
        .clone()
        .context("run.source is required")?;
    let destination = config
        .run
        .destination
        .clone()
        .context("run.destination is required")?;

    let probe: Arc<dyn SpaceProbe> = Arc::new(SysinfoProbe::new());
    let parts = Collaborators {
        store: store.clone(),
        dedup: Arc::new(DedupEngine::new(config.dedup.clone(), store)),
        processor: Arc::new(RuleBasedProcessor::new(RuleTable::default_rules())),
        placer: Arc::new(FsPlacer::new(config.placer.clone())),
        enumerator: Arc::new(WalkdirEnumerator::new()),
        space: SpaceMonitor::new(config.space.clone(), Arc::clone(&probe)),
    };
    let orchestrator = Arc::new(
        Orchestrator::new(config.orchestrator.clone(), config.pipeline.clone(), parts)
            .with_callback(Arc::new(LogProgress::new())),
    );

    // Translate Ctrl-C into a graceful stop
    {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move {
            if signal::ctrl_c().await.is_ok() {
                info!("Received Ctrl-C, stopping after the current stage");
                orchestrator.stop().await;
            }
        });
    }

    spawn_space_recovery(
        Arc::clone(&orchestrator),
        probe,
        destination.clone(),
        config.space.low_space_threshold_bytes,
        Duration::from_millis(config.space.poll_interval_ms),
    );

    let resumable = orchestrator
        .sessions()
        .find_resumable()
        .await
        .context("Failed to look up incomplete sessions")?
        .filter(|point| same_path(&point.session.source_root, &source))
        .filter(|point| same_path(&point.session.destination_root, &destination));

    let summary = match resumable {
        Some(point) => {
            info!("Resuming session {}", point.session.id);
            orchestrator.resume(&point.session.id).await?
        }
        None => {
            orchestrator
                .run(RunRequest::new(&source, &destination))
                .await?
        }
    };

    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

/// While auto-paused for low space, resume once space is back above the threshold.
fn spawn_space_recovery(
    orchestrator: Arc<Orchestrator>,
    probe: Arc<dyn SpaceProbe>,
    destination: PathBuf,
    threshold: u64,
    interval: Duration,
) {
    let mut state = orchestrator.subscribe_state();
    tokio::spawn(async move {
        while state.changed().await.is_ok() {
            if *state.borrow_and_update() != OrchestratorState::Paused {
                continue;
            }
            loop {
                tokio::time::sleep(interval).await;
                if orchestrator.state() != OrchestratorState::Paused {
                    break;
                }
                match probe.available_bytes(&destination) {
                    Ok(available) if available >= threshold => {
                        info!("{} bytes free again, resuming", available);
                        orchestrator.resume_processing().await;
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => warn!("Space probe failed: {}", e),
                }
            }
        }
    });
}

fn same_path(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

async fn undo(store: Arc<SqliteStore>, session_id: &str, preview: bool) -> Result<()> {
    let engine = UndoEngine::new(store.clone(), store);

    if preview {
        let preview = engine
            .preview(session_id)
            .await
            .with_context(|| format!("Failed to preview undo of {}", session_id))?;
        info!(
            "Undo of {} would delete {} files ({} bytes)",
            session_id,
            preview.files_to_delete.len(),
            preview.bytes_to_free
        );
        println!("{}", serde_json::to_string_pretty(&preview)?);
        return Ok(());
    }

    let report = engine
        .execute(session_id)
        .await
        .with_context(|| format!("Failed to undo {}", session_id))?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    if !report.success() {
        bail!("{} files could not be removed", report.failed);
    }
    Ok(())
}
