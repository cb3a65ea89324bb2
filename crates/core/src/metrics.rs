//! Prometheus metrics for core components.

use once_cell::sync::Lazy;
use prometheus::{IntCounter, IntCounterVec, Opts};

/// Files that reached a terminal outcome, by outcome.
pub static FILES_PROCESSED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "archivist_files_processed_total",
            "Files that reached a terminal pipeline outcome",
        ),
        &["outcome"], // "completed", "skipped", "duplicate", "error", "stopped"
    )
    .unwrap()
});

pub static BYTES_COPIED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "archivist_bytes_copied_total",
        "Total bytes copied into the destination",
    )
    .unwrap()
});

pub static HASH_CACHE_LOOKUPS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("archivist_hash_cache_lookups_total", "Hash cache lookups"),
        &["result"], // "hit", "miss"
    )
    .unwrap()
});

pub static RETRY_ATTEMPTS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "archivist_retry_attempts_total",
        "Retries after transient file errors",
    )
    .unwrap()
});

/// Automatic pauses triggered by low destination space.
pub static AUTO_PAUSES: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "archivist_auto_pauses_total",
        "Runs paused because destination space ran low",
    )
    .unwrap()
});

pub static UNDO_FILES_DELETED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "archivist_undo_files_deleted_total",
        "Destination files deleted by undo",
    )
    .unwrap()
});

/// All collectors, for registration by a host process.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        Box::new(FILES_PROCESSED.clone()),
        Box::new(BYTES_COPIED.clone()),
        Box::new(HASH_CACHE_LOOKUPS.clone()),
        Box::new(RETRY_ATTEMPTS.clone()),
        Box::new(AUTO_PAUSES.clone()),
        Box::new(UNDO_FILES_DELETED.clone()),
    ]
}
