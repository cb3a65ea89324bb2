//! Durable storage for sessions, per-file records, mappings and the
//! duplicate registry.
//!
//! A single [`SqliteStore`] implements both [`SessionStore`] and
//! [`DedupStore`]; components receive it as an injected `Arc<dyn ...>`
//! handle rather than reaching for a global connection.

mod error;
mod sqlite;
mod traits;
mod types;

pub use error::StoreError;
pub use sqlite::SqliteStore;
pub use traits::{DedupStore, SessionStore};
pub use types::{
    CreateSessionRequest, DuplicateGroup, FileMapping, FileRecord, FileRecordUpdate,
    HashCacheEntry, MappingStatus, NewFileRecord, NewMapping, ProcessingStatus, Session,
    SessionCounters, SessionFilter, SessionStatus,
};
