//! Session lifecycle, progress snapshots and resumption.
//!
//! The durable records live in the [`store`](crate::store); this module
//! adds the atomically replaced `<destination>/conf/progress.json`
//! snapshot, the rules for picking up an interrupted session and the
//! single writer through which every mapping is appended.

mod error;
mod manager;
mod snapshot;
mod writer;

pub use error::SessionError;
pub(crate) use manager::was_committed;
pub use manager::{Reconciled, ResumePoint, SessionManager};
pub use snapshot::{ProgressSnapshot, SnapshotFile};
pub use writer::{create_mapping_writer, MappingHandle, MappingWriter};
