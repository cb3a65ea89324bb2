//! Preflight estimate and the background low-space watch.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::{SpaceConfig, SpaceError, SpaceProbe};

/// Outcome of a preflight check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpaceReport {
    pub source_bytes: u64,
    pub required_bytes: u64,
    pub available_bytes: u64,
    /// The estimate did not fit but the run was allowed anyway.
    pub overridden: bool,
}

impl SpaceReport {
    pub fn sufficient(&self) -> bool {
        self.available_bytes >= self.required_bytes
    }
}

/// Raised when free space drops below the configured threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LowSpace {
    pub available_bytes: u64,
    pub threshold_bytes: u64,
}

/// Space checks for one destination filesystem.
#[derive(Clone)]
pub struct SpaceMonitor {
    config: SpaceConfig,
    probe: Arc<dyn SpaceProbe>,
}

impl SpaceMonitor {
    pub fn new(config: SpaceConfig, probe: Arc<dyn SpaceProbe>) -> Self {
        Self { config, probe }
    }

    pub fn config(&self) -> &SpaceConfig {
        &self.config
    }

    /// Bytes the destination must have free to receive `source_bytes`.
    pub fn required_bytes(&self, source_bytes: u64) -> u64 {
        let estimate =
            source_bytes as f64 * self.config.export_overhead * self.config.safety_buffer;
        estimate.round() as u64
    }

    /// Compare the estimated output size against free space at `destination`.
    pub fn preflight(
        &self,
        source_bytes: u64,
        destination: &Path,
    ) -> Result<SpaceReport, SpaceError> {
        let required_bytes = self.required_bytes(source_bytes);
        let available_bytes = self.probe.available_bytes(destination)?;
        let mut report = SpaceReport {
            source_bytes,
            required_bytes,
            available_bytes,
            overridden: false,
        };

        if !report.sufficient() {
            if !self.config.override_preflight {
                return Err(SpaceError::InsufficientSpace {
                    required: required_bytes,
                    available: available_bytes,
                });
            }
            warn!(
                "Preflight estimate exceeds free space ({} > {} bytes), continuing by override",
                required_bytes, available_bytes
            );
            report.overridden = true;
        }

        info!(
            "Preflight: {} source bytes need {} bytes, {} available",
            source_bytes, required_bytes, available_bytes
        );
        Ok(report)
    }

    /// Poll free space until `shutdown` fires, sending one [`LowSpace`] each
    /// time space crosses below the threshold.
    pub async fn watch(
        &self,
        destination: PathBuf,
        events: mpsc::Sender<LowSpace>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        let mut ticker =
            tokio::time::interval(Duration::from_millis(self.config.poll_interval_ms.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let threshold = self.config.low_space_threshold_bytes;
        let mut below = false;

        debug!("Space watch started for {}", destination.display());
        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                _ = ticker.tick() => {
                    let available = match self.probe.available_bytes(&destination) {
                        Ok(bytes) => bytes,
                        Err(e) => {
                            warn!("Space probe failed: {}", e);
                            continue;
                        }
                    };

                    if available < threshold {
                        if !below {
                            below = true;
                            warn!(
                                "Free space {} bytes is below threshold {} bytes",
                                available, threshold
                            );
                            let event = LowSpace {
                                available_bytes: available,
                                threshold_bytes: threshold,
                            };
                            if events.send(event).await.is_err() {
                                break;
                            }
                        }
                    } else if below {
                        info!("Free space recovered to {} bytes", available);
                        below = false;
                    }
                }
            }
        }
        debug!("Space watch stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockSpaceProbe;

    const GB: u64 = 1_000_000_000;

    fn monitor(available: u64, config: SpaceConfig) -> (SpaceMonitor, Arc<MockSpaceProbe>) {
        let probe = Arc::new(MockSpaceProbe::new(available));
        (SpaceMonitor::new(config, probe.clone()), probe)
    }

    #[test]
    fn test_required_bytes_applies_overhead_and_buffer() {
        let (monitor, _) = monitor(0, SpaceConfig::default());
        assert_eq!(monitor.required_bytes(100 * GB), 143 * GB);
        assert_eq!(monitor.required_bytes(0), 0);
    }

    #[test]
    fn test_preflight_rejects_insufficient_space() {
        let (monitor, _) = monitor(100 * GB, SpaceConfig::default());
        let err = monitor.preflight(100 * GB, Path::new("/dst")).unwrap_err();
        match err {
            SpaceError::InsufficientSpace {
                required,
                available,
            } => {
                assert_eq!(required, 143 * GB);
                assert_eq!(available, 100 * GB);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_preflight_override() {
        let config = SpaceConfig::default().with_override_preflight(true);
        let (monitor, _) = monitor(100 * GB, config);
        let report = monitor.preflight(100 * GB, Path::new("/dst")).unwrap();
        assert!(report.overridden);
        assert!(!report.sufficient());
    }

    #[test]
    fn test_preflight_passes() {
        let (monitor, _) = monitor(200 * GB, SpaceConfig::default());
        let report = monitor.preflight(100 * GB, Path::new("/dst")).unwrap();
        assert!(report.sufficient());
        assert!(!report.overridden);
    }

    #[tokio::test]
    async fn test_watch_fires_once_per_crossing() {
        let config = SpaceConfig::default()
            .with_low_space_threshold(10)
            .with_poll_interval_ms(5);
        let (monitor, probe) = monitor(100, config);
        let (tx, mut rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let handle = tokio::spawn({
            let monitor = monitor.clone();
            async move { monitor.watch(PathBuf::from("/dst"), tx, shutdown_rx).await }
        });

        probe.set_available(5);
        let first = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.available_bytes, 5);

        // Staying low does not repeat the event.
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(rx.try_recv().is_err());

        probe.set_available(50);
        tokio::time::sleep(Duration::from_millis(40)).await;
        probe.set_available(3);
        let second = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second.available_bytes, 3);

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();
    }
}
