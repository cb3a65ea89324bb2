//! Orchestrator configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the worker pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Number of concurrent workers (1-16).
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Capacity of the work queue and the outcome channel.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Minimum spacing of progress ticks driven by byte progress (milliseconds).
    /// Every finished file and status change still produces a snapshot.
    #[serde(default = "default_progress_interval")]
    pub progress_interval_ms: u64,

    /// Retry policy for transient file errors.
    #[serde(default)]
    pub retry: RetryConfig,
}

/// Retry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per file, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry in milliseconds.
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,

    /// Upper bound for a single retry delay in milliseconds.
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Exponential backoff multiplier.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

fn default_workers() -> usize {
    4
}

fn default_queue_capacity() -> usize {
    256
}

fn default_progress_interval() -> u64 {
    1000 // 1 second
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> u64 {
    200
}

fn default_max_delay() -> u64 {
    5000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1) as i32;
        let millis = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(exponent);
        Duration::from_millis(millis.min(self.max_delay_ms as f64) as u64)
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
            progress_interval_ms: default_progress_interval(),
            retry: RetryConfig::default(),
        }
    }
}

impl OrchestratorConfig {
    /// Sets the worker count.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Sets the retry policy.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }
}
