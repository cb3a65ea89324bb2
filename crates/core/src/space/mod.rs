//! Destination disk-space accounting.
//!
//! Two checks guard a run:
//! - **Preflight**: before any file operation, the estimated output size is
//!   compared with free space and the run is refused if it does not fit.
//! - **Watch**: while processing, free space is polled and a low-space event is
//!   raised each time it drops below the threshold. The receiver decides to
//!   pause; the monitor never stops a run on its own.

mod config;
mod error;
mod monitor;
mod probe;

pub use config::SpaceConfig;
pub use error::SpaceError;
pub use monitor::{LowSpace, SpaceMonitor, SpaceReport};
pub use probe::{SpaceProbe, SysinfoProbe};
