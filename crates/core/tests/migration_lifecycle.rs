//! Migration lifecycle integration tests.
//!
//! These tests drive full runs through the orchestrator against temporary
//! source and destination trees:
//! scanning -> processing (dedup, placement, mapping) -> completed | stopped
//! plus pause/resume, crash recovery, retries and space handling.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tempfile::TempDir;

use archivist_core::{
    orchestrator::ProgressCallback,
    session::SnapshotFile,
    store::{CreateSessionRequest, MappingStatus, NewMapping, ProcessingStatus, SessionFilter},
    testing::{fixtures, CallbackEvent, MockPlacer, MockSpaceProbe, RecordingCallback},
    Collaborators, DedupConfig, DedupEngine, Orchestrator, OrchestratorConfig, OrchestratorError,
    OrchestratorState, PipelineConfig, ProgressSnapshot, RetryConfig, RuleBasedProcessor,
    RunRequest, SessionStatus, SessionStore, SpaceConfig, SpaceError, SpaceMonitor, SqliteStore,
    WalkdirEnumerator,
};

const GB: u64 = 1024 * 1024 * 1024;

/// Test helper wiring an orchestrator over temporary directories.
struct TestHarness {
    store: Arc<SqliteStore>,
    probe: Arc<MockSpaceProbe>,
    placer: Arc<MockPlacer>,
    callback: Arc<RecordingCallback>,
    source: PathBuf,
    destination: PathBuf,
    _temp_dir: TempDir,
}

impl TestHarness {
    fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let source = temp_dir.path().join("source");
        let destination = temp_dir.path().join("archive");
        std::fs::create_dir_all(&source).expect("Failed to create source");

        let store = Arc::new(
            SqliteStore::new(&temp_dir.path().join("test.db")).expect("Failed to create store"),
        );

        Self {
            store,
            probe: Arc::new(MockSpaceProbe::new(100 * GB)),
            placer: Arc::new(MockPlacer::new()),
            callback: Arc::new(RecordingCallback::new()),
            source,
            destination,
            _temp_dir: temp_dir,
        }
    }

    fn config() -> OrchestratorConfig {
        OrchestratorConfig::default()
            .with_workers(4)
            .with_retry(RetryConfig {
                max_attempts: 3,
                initial_delay_ms: 10,
                max_delay_ms: 50,
                backoff_multiplier: 2.0,
            })
    }

    fn space_config() -> SpaceConfig {
        SpaceConfig::default()
            .with_low_space_threshold(GB)
            .with_poll_interval_ms(20)
    }

    fn orchestrator(&self) -> Orchestrator {
        self.orchestrator_with(Self::config(), Self::space_config())
    }

    fn orchestrator_with(&self, config: OrchestratorConfig, space: SpaceConfig) -> Orchestrator {
        let parts = Collaborators {
            store: self.store.clone(),
            dedup: Arc::new(DedupEngine::new(DedupConfig::default(), self.store.clone())),
            processor: Arc::new(RuleBasedProcessor::default()),
            placer: self.placer.clone(),
            enumerator: Arc::new(WalkdirEnumerator::new()),
            space: SpaceMonitor::new(space, self.probe.clone()),
        };
        Orchestrator::new(config, PipelineConfig::default(), parts)
            .with_callback(self.callback.clone())
    }

    fn request(&self) -> RunRequest {
        RunRequest::new(&self.source, &self.destination)
    }

    fn write_source(&self, relative: &str, contents: &[u8]) -> PathBuf {
        fixtures::write_file(&self.source, relative, contents).expect("Failed to write source")
    }

    /// Produced files, excluding the `conf/` bookkeeping directory.
    fn produced_files(&self) -> Vec<PathBuf> {
        fixtures::list_files(&self.destination)
            .into_iter()
            .filter(|p| !p.starts_with("conf"))
            .collect()
    }

    fn source_root(&self) -> PathBuf {
        self.source.canonicalize().expect("source exists")
    }

    fn destination_root(&self) -> PathBuf {
        self.destination.canonicalize().expect("destination exists")
    }
}

/// Wait until `condition` holds, polling every 10 ms for up to 5 seconds.
async fn wait_for(mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met in time");
}

fn started_count(callback: &RecordingCallback) -> usize {
    callback
        .events()
        .iter()
        .filter(|e| matches!(e, CallbackEvent::Started(_)))
        .count()
}

// =============================================================================
// Full runs
// =============================================================================

#[tokio::test]
async fn test_full_run_counts_every_outcome() {
    let harness = TestHarness::new();
    harness.write_source("2019/beach.jpg", &fixtures::jpeg(b"beach"));
    harness.write_source("backup/beach.jpg", &fixtures::jpeg(b"beach"));
    harness.write_source("2019/song.mp3", &fixtures::mp3(b"song"));
    harness.write_source("2019/.DS_Store", b"junk");
    harness.write_source("2019/export.tmp", b"partial export");
    harness.write_source("2019/blob.bin", b"\x00\x01\x02");

    let orchestrator = harness.orchestrator();
    let summary = orchestrator.run(harness.request()).await.unwrap();

    assert_eq!(summary.status, SessionStatus::Completed);
    let counters = summary.counters;
    assert_eq!(counters.files_scanned, 6);
    assert_eq!(counters.files_processed, 2);
    assert_eq!(counters.files_duplicates, 1);
    assert_eq!(counters.files_skipped, 3);
    assert_eq!(counters.files_error, 0);
    assert_eq!(counters.files_pending(), 0);
    assert_eq!(orchestrator.state(), OrchestratorState::Completed);

    // Exactly one copy of the photo and one song were produced.
    assert_eq!(harness.produced_files().len(), 2);

    // The session row matches the summary and the snapshot is gone.
    let session = harness.store.get_session(&summary.session_id).unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::Completed);
    assert_eq!(session.counters, counters);
    assert!(SnapshotFile::for_destination(&harness.destination)
        .load()
        .await
        .unwrap()
        .is_none());

    let statuses = harness.callback.statuses();
    assert_eq!(statuses.first(), Some(&SessionStatus::Running));
    assert_eq!(statuses.last(), Some(&SessionStatus::Completed));
}

#[tokio::test]
async fn test_concurrent_identical_files_produce_one_canonical() {
    let harness = TestHarness::new();
    for i in 0..24 {
        harness.write_source(&format!("card{:02}/IMG_0001.jpg", i), &fixtures::jpeg(b"same"));
    }

    let orchestrator =
        harness.orchestrator_with(TestHarness::config().with_workers(8), TestHarness::space_config());
    let summary = orchestrator.run(harness.request()).await.unwrap();

    assert_eq!(summary.counters.files_processed, 1);
    assert_eq!(summary.counters.files_duplicates, 23);
    assert_eq!(harness.produced_files().len(), 1);

    // Every duplicate points at the one produced canonical source.
    let canonicals: Vec<PathBuf> = harness
        .callback
        .events()
        .into_iter()
        .filter_map(|e| match e {
            CallbackEvent::Duplicate { canonical, .. } => Some(canonical),
            _ => None,
        })
        .collect();
    assert_eq!(canonicals.len(), 23);
    let (source, _) = harness.callback.completed().remove(0);
    assert!(canonicals.iter().all(|c| *c == source));
}

#[tokio::test]
async fn test_copy_with_uppercase_extension_is_duplicate() {
    let harness = TestHarness::new();
    harness.write_source("photo.jpg", &fixtures::jpeg(b"holiday"));
    harness.write_source("photo (copy).JPG", &fixtures::jpeg(b"holiday"));

    let orchestrator =
        harness.orchestrator_with(TestHarness::config().with_workers(2), TestHarness::space_config());
    let summary = orchestrator.run(harness.request()).await.unwrap();

    let mappings = harness
        .store
        .mappings(&summary.session_id, Some(MappingStatus::Completed))
        .unwrap();
    assert_eq!(mappings.len(), 1);

    let completed = harness
        .store
        .file_records(&summary.session_id, Some(ProcessingStatus::Completed))
        .unwrap();
    let duplicates = harness
        .store
        .file_records(&summary.session_id, Some(ProcessingStatus::Duplicate))
        .unwrap();
    assert_eq!(completed.len(), 1);
    assert_eq!(duplicates.len(), 1);
    assert_eq!(duplicates[0].duplicate_of, Some(completed[0].id));
    assert_eq!(completed[0].source_path, mappings[0].source_path);
}

#[tokio::test]
async fn test_same_names_get_suffixes() {
    let harness = TestHarness::new();
    harness.write_source("a/IMG_0001.jpg", &fixtures::jpeg(b"one"));
    harness.write_source("b/IMG_0001.jpg", &fixtures::jpeg(b"two"));
    harness.write_source("c/IMG_0001.jpg", &fixtures::jpeg(b"three"));

    let summary = harness.orchestrator().run(harness.request()).await.unwrap();
    assert_eq!(summary.counters.files_processed, 3);

    let names: Vec<String> = harness
        .produced_files()
        .iter()
        .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
        .collect();
    assert_eq!(names.len(), 3);
    assert!(names.contains(&"IMG_0001.jpg".to_string()));
    assert!(names.contains(&"IMG_0001--1.jpg".to_string()));
    assert!(names.contains(&"IMG_0001--2.jpg".to_string()));
}

#[tokio::test]
async fn test_second_session_over_same_source_finds_only_duplicates() {
    let harness = TestHarness::new();
    harness.write_source("a.jpg", &fixtures::jpeg(b"a"));
    harness.write_source("b.mp3", &fixtures::mp3(b"b"));

    let first = harness.orchestrator().run(harness.request()).await.unwrap();
    assert_eq!(first.counters.files_processed, 2);

    let second = harness.orchestrator().run(harness.request()).await.unwrap();
    assert_ne!(first.session_id, second.session_id);
    assert_eq!(second.counters.files_processed, 0);
    assert_eq!(second.counters.files_duplicates, 2);
    assert_eq!(harness.produced_files().len(), 2);
}

// =============================================================================
// Start-time validation
// =============================================================================

#[tokio::test]
async fn test_preflight_rejects_insufficient_space() {
    let harness = TestHarness::new();
    harness.write_source("a.jpg", &fixtures::jpeg(&[7u8; 989])); // 1000 bytes
    harness.probe.set_available(1_000);

    let orchestrator = harness.orchestrator();
    let result = orchestrator.run(harness.request()).await;

    match result {
        Err(OrchestratorError::Space(SpaceError::InsufficientSpace {
            required,
            available,
        })) => {
            assert_eq!(required, 1_430);
            assert_eq!(available, 1_000);
        }
        other => panic!("expected insufficient space, got {:?}", other.map(|s| s.status)),
    }
    assert_eq!(orchestrator.state(), OrchestratorState::Error);
    assert!(harness.produced_files().is_empty());
    assert!(harness
        .store
        .list_sessions(&SessionFilter::new())
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_preflight_override_proceeds() {
    let harness = TestHarness::new();
    harness.write_source("a.jpg", &fixtures::jpeg(b"a"));
    harness.probe.set_available(1);

    let space = TestHarness::space_config()
        .with_low_space_threshold(0)
        .with_override_preflight(true);
    let summary = harness
        .orchestrator_with(TestHarness::config(), space)
        .run(harness.request())
        .await
        .unwrap();

    assert!(summary.preflight.overridden);
    assert_eq!(summary.counters.files_processed, 1);
}

#[tokio::test]
async fn test_second_run_rejected_while_active() {
    let harness = TestHarness::new();
    harness.write_source("a.jpg", &fixtures::jpeg(b"a"));
    harness
        .placer
        .set_placement_duration(Duration::from_millis(300))
        .await;

    let orchestrator = Arc::new(harness.orchestrator());
    let running = {
        let orchestrator = orchestrator.clone();
        let request = harness.request();
        tokio::spawn(async move { orchestrator.run(request).await })
    };
    wait_for(|| started_count(&harness.callback) > 0).await;

    let second = orchestrator.run(harness.request()).await;
    assert!(matches!(second, Err(OrchestratorError::AlreadyRunning)));

    let summary = running.await.unwrap().unwrap();
    assert_eq!(summary.status, SessionStatus::Completed);
}

// =============================================================================
// Control: pause, resume, stop
// =============================================================================

#[tokio::test]
async fn test_pause_never_truncates_and_resume_finishes() {
    let harness = TestHarness::new();
    let payload = vec![42u8; 256 * 1024];
    for i in 0..6 {
        let mut body = payload.clone();
        body.push(i as u8);
        harness.write_source(&format!("photo{}.jpg", i), &fixtures::jpeg(&body));
    }
    harness
        .placer
        .set_placement_duration(Duration::from_millis(150))
        .await;

    let orchestrator = Arc::new(
        harness.orchestrator_with(TestHarness::config().with_workers(2), TestHarness::space_config()),
    );
    let running = {
        let orchestrator = orchestrator.clone();
        let request = harness.request();
        tokio::spawn(async move { orchestrator.run(request).await })
    };
    wait_for(|| started_count(&harness.callback) > 0).await;

    assert!(orchestrator.pause().await);
    assert_eq!(orchestrator.state(), OrchestratorState::Paused);

    // In-flight placements drain, then nothing else is placed.
    tokio::time::sleep(Duration::from_millis(500)).await;
    let placed_while_paused = harness.placer.placement_count().await;
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(harness.placer.placement_count().await, placed_while_paused);
    assert!(placed_while_paused < 6);

    // Every produced file is complete; no temporary files are visible.
    for relative in harness.produced_files() {
        let name = relative.file_name().unwrap().to_string_lossy().into_owned();
        assert!(!name.ends_with(".partial"), "temporary file left: {}", name);
        let len = std::fs::metadata(harness.destination.join(&relative)).unwrap().len();
        assert_eq!(len, (fixtures::jpeg(&payload).len() + 1) as u64);
    }
    let sessions = harness.store.list_sessions(&SessionFilter::new()).unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].status, SessionStatus::Paused);

    assert!(orchestrator.resume_processing().await);
    let summary = running.await.unwrap().unwrap();
    assert_eq!(summary.status, SessionStatus::Completed);
    assert_eq!(summary.counters.files_processed, 6);
    assert_eq!(harness.produced_files().len(), 6);
}

#[tokio::test]
async fn test_stop_finishes_as_stopped_with_pending_files() {
    let harness = TestHarness::new();
    for i in 0..8 {
        harness.write_source(&format!("clip{}.jpg", i), &fixtures::jpeg(&[i as u8; 64]));
    }
    harness
        .placer
        .set_placement_duration(Duration::from_millis(100))
        .await;

    let orchestrator = Arc::new(
        harness.orchestrator_with(TestHarness::config().with_workers(1), TestHarness::space_config()),
    );
    let running = {
        let orchestrator = orchestrator.clone();
        let request = harness.request();
        tokio::spawn(async move { orchestrator.run(request).await })
    };
    wait_for(|| !harness.callback.completed().is_empty()).await;
    assert!(orchestrator.stop().await);

    let summary = running.await.unwrap().unwrap();
    assert_eq!(summary.status, SessionStatus::Stopped);
    assert_eq!(orchestrator.state(), OrchestratorState::Stopped);
    assert!(summary.counters.files_processed >= 1);
    assert!(summary.counters.files_pending() > 0);
    assert_eq!(summary.counters.files_error, 0);

    // Completed files keep valid mappings.
    let mappings = harness.store.mappings(&summary.session_id, None).unwrap();
    assert_eq!(mappings.len() as u64, summary.counters.files_processed);
    for mapping in mappings {
        assert!(mapping.destination_path.exists());
    }

    let session = harness.store.get_session(&summary.session_id).unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::Stopped);
}

// =============================================================================
// Crash recovery
// =============================================================================

/// Records, at every completion callback, what the on-disk snapshot says.
struct SnapshotProbe {
    destination: PathBuf,
    completions: AtomicU64,
    observed: Mutex<Vec<(u64, u64)>>,
}

impl ProgressCallback for SnapshotProbe {
    fn on_file_completed(&self, _source: &Path, _destination: &Path) {
        let completed = self.completions.fetch_add(1, Ordering::SeqCst) + 1;
        let file = SnapshotFile::for_destination(&self.destination);
        let bytes = std::fs::read(file.path()).expect("snapshot written before callback");
        let snapshot: ProgressSnapshot = serde_json::from_slice(&bytes).expect("valid snapshot");
        self.observed
            .lock()
            .unwrap()
            .push((completed, snapshot.files_processed));
    }
}

#[tokio::test]
async fn test_snapshot_is_written_before_each_completion_is_reported() {
    let harness = TestHarness::new();
    for i in 0..10 {
        harness.write_source(&format!("p{}.jpg", i), &fixtures::jpeg(&[i as u8; 32]));
    }
    let probe = Arc::new(SnapshotProbe {
        destination: harness.destination.clone(),
        completions: AtomicU64::new(0),
        observed: Mutex::new(Vec::new()),
    });

    let parts = Collaborators {
        store: harness.store.clone(),
        dedup: Arc::new(DedupEngine::new(DedupConfig::default(), harness.store.clone())),
        processor: Arc::new(RuleBasedProcessor::default()),
        placer: harness.placer.clone(),
        enumerator: Arc::new(WalkdirEnumerator::new()),
        space: SpaceMonitor::new(TestHarness::space_config(), harness.probe.clone()),
    };
    let orchestrator = Orchestrator::new(TestHarness::config(), PipelineConfig::default(), parts)
        .with_callback(probe.clone());
    orchestrator.run(harness.request()).await.unwrap();

    // A crash right after any completion leaves a snapshot that counts
    // exactly the files completed so far.
    let observed = probe.observed.lock().unwrap().clone();
    assert_eq!(observed.len(), 10);
    for (completed, in_snapshot) in observed {
        assert_eq!(completed, in_snapshot);
    }
}

#[tokio::test]
async fn test_resume_after_crash_skips_mapped_files() {
    let harness = TestHarness::new();
    let a = harness.write_source("a.jpg", &fixtures::jpeg(b"a"));
    harness.write_source("b.jpg", &fixtures::jpeg(b"b"));
    harness.write_source("c.mp3", &fixtures::mp3(b"c"));
    std::fs::create_dir_all(&harness.destination).unwrap();

    // A session that died after producing a.jpg and leaving a partial copy.
    let session = harness
        .store
        .create_session(CreateSessionRequest {
            source_root: harness.source_root(),
            destination_root: harness.destination_root(),
        })
        .unwrap();
    let produced = fixtures::write_file(&harness.destination, "Images/Undated/a.jpg", b"a").unwrap();
    harness
        .store
        .append_mapping(NewMapping {
            session_id: session.id.clone(),
            source_path: harness.source_root().join("a.jpg"),
            destination_path: produced,
            temp_path: None,
            size: std::fs::metadata(&a).unwrap().len(),
        })
        .unwrap();
    let partial = fixtures::write_file(
        &harness.destination,
        "Images/Undated/.b.jpg.0123456789abcdef.partial",
        b"half",
    )
    .unwrap();

    let orchestrator = harness.orchestrator();
    let point = orchestrator.sessions().find_resumable().await.unwrap().unwrap();
    assert_eq!(point.session.id, session.id);

    let summary = orchestrator.resume(&session.id).await.unwrap();

    assert_eq!(summary.session_id, session.id);
    assert_eq!(summary.status, SessionStatus::Completed);
    assert_eq!(summary.counters.files_scanned, 3);
    assert_eq!(summary.counters.files_processed, 3);
    assert_eq!(summary.counters.files_pending(), 0);
    // Only b.jpg and c.mp3 were placed again.
    assert_eq!(harness.placer.placement_count().await, 2);
    assert!(!partial.exists());
    assert_eq!(harness.store.mappings(&session.id, None).unwrap().len(), 3);
}

#[tokio::test]
async fn test_resume_completes_mapping_interrupted_after_commit() {
    let harness = TestHarness::new();
    let contents = fixtures::jpeg(b"a");
    harness.write_source("a.jpg", &contents);
    harness.write_source("b.jpg", &fixtures::jpeg(b"b"));
    std::fs::create_dir_all(&harness.destination).unwrap();

    // Died between committing a.jpg and completing its mapping.
    let session = harness
        .store
        .create_session(CreateSessionRequest {
            source_root: harness.source_root(),
            destination_root: harness.destination_root(),
        })
        .unwrap();
    let produced =
        fixtures::write_file(&harness.destination_root(), "Images/Undated/a.jpg", &contents)
            .unwrap();
    harness
        .store
        .begin_mapping(NewMapping {
            session_id: session.id.clone(),
            source_path: harness.source_root().join("a.jpg"),
            destination_path: produced.clone(),
            temp_path: Some(produced.with_file_name(".a.jpg.0123456789abcdef.partial")),
            size: contents.len() as u64,
        })
        .unwrap();

    let summary = harness.orchestrator().resume(&session.id).await.unwrap();

    assert_eq!(summary.counters.files_processed, 2);
    assert_eq!(harness.placer.placement_count().await, 1);
    assert!(!harness
        .produced_files()
        .iter()
        .any(|p| p.ends_with("a--1.jpg")));
    assert_eq!(harness.produced_files().len(), 2);
    assert_eq!(
        harness
            .store
            .mappings(&session.id, Some(MappingStatus::Completed))
            .unwrap()
            .len(),
        2
    );
}

#[tokio::test]
async fn test_failed_file_is_produced_by_next_session() {
    let harness = TestHarness::new();
    harness.write_source("a.jpg", &fixtures::jpeg(b"a"));
    harness.placer.fail_next(1, io::ErrorKind::Other).await;

    let first = harness.orchestrator().run(harness.request()).await.unwrap();
    assert_eq!(first.counters.files_error, 1);
    assert!(harness.produced_files().is_empty());

    // The failed copy must not leave its content marked as already produced.
    let second = harness.orchestrator().run(harness.request()).await.unwrap();
    assert_eq!(second.counters.files_processed, 1);
    assert_eq!(second.counters.files_duplicates, 0);
    assert_eq!(harness.produced_files().len(), 1);
}

#[tokio::test]
async fn test_sidecars_travel_with_their_main_file() {
    let harness = TestHarness::new();
    harness.write_source("trip/beach.jpg", &fixtures::jpeg(b"beach"));
    harness.write_source("trip/beach.jpg.xmp", b"<x:xmpmeta/>");
    harness.write_source("trip/beach.AAE", b"<plist/>");

    let summary = harness.orchestrator().run(harness.request()).await.unwrap();

    assert_eq!(summary.counters.files_scanned, 1);
    assert_eq!(summary.counters.files_processed, 1);
    let produced = harness.produced_files();
    assert_eq!(produced.len(), 3);
    let main = produced.iter().find(|p| p.ends_with("beach.jpg")).unwrap();
    let folder = main.parent().unwrap();
    assert!(produced.contains(&folder.join("beach.jpg.xmp")));
    assert!(produced.contains(&folder.join("beach.AAE")));
    assert_eq!(
        harness
            .store
            .mappings(&summary.session_id, Some(MappingStatus::Completed))
            .unwrap()
            .len(),
        3
    );
}

// Some Unix filesystems refuse names that are not valid UTF-8.
#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_non_utf8_names_stay_distinct() {
    use std::ffi::OsStr;
    use std::os::unix::ffi::OsStrExt;

    let harness = TestHarness::new();
    let first = harness.source.join(OsStr::from_bytes(b"a\xff.jpg"));
    let second = harness.source.join(OsStr::from_bytes(b"a\xfe.jpg"));
    std::fs::write(&first, fixtures::jpeg(b"first")).unwrap();
    std::fs::write(&second, fixtures::jpeg(b"second")).unwrap();

    let summary = harness.orchestrator().run(harness.request()).await.unwrap();

    assert_eq!(summary.counters.files_processed, 2);
    assert_eq!(summary.counters.files_duplicates, 0);
    let names: Vec<Vec<u8>> = harness
        .produced_files()
        .iter()
        .map(|p| p.file_name().unwrap().as_bytes().to_vec())
        .collect();
    assert_eq!(names.len(), 2);
    assert!(names.contains(&b"a\xff.jpg".to_vec()));
    assert!(names.contains(&b"a\xfe.jpg".to_vec()));

    let sources: Vec<PathBuf> = harness
        .store
        .mappings(&summary.session_id, None)
        .unwrap()
        .into_iter()
        .map(|m| m.source_path)
        .collect();
    assert!(sources.contains(&harness.source_root().join(OsStr::from_bytes(b"a\xff.jpg"))));
    assert!(sources.contains(&harness.source_root().join(OsStr::from_bytes(b"a\xfe.jpg"))));
}

#[tokio::test]
async fn test_completed_session_is_not_resumable() {
    let harness = TestHarness::new();
    harness.write_source("a.jpg", &fixtures::jpeg(b"a"));
    let orchestrator = harness.orchestrator();
    let summary = orchestrator.run(harness.request()).await.unwrap();

    let result = orchestrator.resume(&summary.session_id).await;
    assert!(matches!(result, Err(OrchestratorError::Session(_))));
    assert!(orchestrator.sessions().find_resumable().await.unwrap().is_none());
}

// =============================================================================
// Errors and retries
// =============================================================================

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let harness = TestHarness::new();
    harness.write_source("a.jpg", &fixtures::jpeg(b"a"));
    harness
        .placer
        .fail_next(2, io::ErrorKind::PermissionDenied)
        .await;

    let summary = harness.orchestrator().run(harness.request()).await.unwrap();

    assert_eq!(summary.counters.files_processed, 1);
    assert_eq!(summary.counters.files_error, 0);
    assert_eq!(harness.placer.attempt_count(), 3);
}

#[tokio::test]
async fn test_exhausted_retries_record_error_and_session_completes() {
    let harness = TestHarness::new();
    harness.write_source("a.jpg", &fixtures::jpeg(b"a"));
    harness
        .placer
        .fail_next(10, io::ErrorKind::PermissionDenied)
        .await;

    let summary = harness.orchestrator().run(harness.request()).await.unwrap();

    assert_eq!(summary.status, SessionStatus::Completed);
    assert_eq!(summary.counters.files_error, 1);
    assert_eq!(harness.placer.attempt_count(), 3);
    assert!(harness.callback.events().iter().any(|e| matches!(
        e,
        CallbackEvent::Error {
            kind: archivist_core::ErrorKind::TransientIo,
            ..
        }
    )));
}

// =============================================================================
// Space monitoring
// =============================================================================

#[tokio::test]
async fn test_low_space_auto_pauses_until_resumed() {
    let harness = TestHarness::new();
    for i in 0..4 {
        harness.write_source(&format!("v{}.jpg", i), &fixtures::jpeg(&[i as u8; 16]));
    }
    harness
        .placer
        .set_placement_duration(Duration::from_millis(100))
        .await;

    let orchestrator = Arc::new(
        harness.orchestrator_with(TestHarness::config().with_workers(1), TestHarness::space_config()),
    );
    let running = {
        let orchestrator = orchestrator.clone();
        let request = harness.request();
        tokio::spawn(async move { orchestrator.run(request).await })
    };
    wait_for(|| started_count(&harness.callback) > 0).await;

    harness.probe.set_available(GB / 2);
    wait_for(|| orchestrator.state() == OrchestratorState::Paused).await;
    wait_for(|| {
        harness
            .callback
            .events()
            .iter()
            .any(|e| matches!(e, CallbackEvent::LowSpace { .. }))
    })
    .await;
    assert!(harness.callback.statuses().contains(&SessionStatus::Paused));

    harness.probe.set_available(100 * GB);
    assert!(orchestrator.resume_processing().await);

    let summary = running.await.unwrap().unwrap();
    assert_eq!(summary.status, SessionStatus::Completed);
    assert_eq!(summary.counters.files_processed, 4);
}
