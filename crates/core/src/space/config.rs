//! Space monitor configuration.

use serde::{Deserialize, Serialize};

/// Configuration for preflight and continuous space checks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpaceConfig {
    /// Multiplier applied to the source size for derived outputs.
    #[serde(default = "default_export_overhead")]
    pub export_overhead: f64,

    /// Safety multiplier applied on top of the overhead.
    #[serde(default = "default_safety_buffer")]
    pub safety_buffer: f64,

    /// Free space below which processing is auto-paused.
    #[serde(default = "default_low_space_threshold")]
    pub low_space_threshold_bytes: u64,

    /// How often free space is polled while processing (milliseconds).
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Run even when the preflight estimate does not fit.
    #[serde(default)]
    pub override_preflight: bool,
}

fn default_export_overhead() -> f64 {
    1.3
}

fn default_safety_buffer() -> f64 {
    1.1
}

fn default_low_space_threshold() -> u64 {
    5_000_000_000 // 5 GB
}

fn default_poll_interval() -> u64 {
    5000
}

impl Default for SpaceConfig {
    fn default() -> Self {
        Self {
            export_overhead: default_export_overhead(),
            safety_buffer: default_safety_buffer(),
            low_space_threshold_bytes: default_low_space_threshold(),
            poll_interval_ms: default_poll_interval(),
            override_preflight: false,
        }
    }
}

impl SpaceConfig {
    pub fn with_low_space_threshold(mut self, bytes: u64) -> Self {
        self.low_space_threshold_bytes = bytes;
        self
    }

    pub fn with_poll_interval_ms(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    pub fn with_override_preflight(mut self, value: bool) -> Self {
        self.override_preflight = value;
        self
    }
}
