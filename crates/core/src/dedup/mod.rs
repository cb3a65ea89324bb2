//! Content-addressed duplicate detection.
//!
//! Files are hashed once (or served from the hash cache), their extension is
//! folded into a coarse class, and the resulting `(hash, class)` key is
//! registered in the duplicate registry under a per-key lock. The first
//! registration for a key gets a provisional canonical claim, which becomes
//! permanent only once its file has been produced and mapped.

mod cache;
mod classes;
mod config;
mod engine;
mod error;
mod hasher;

pub use cache::HashCache;
pub use classes::ExtensionClasses;
pub use config::{CanonicalPolicy, DedupConfig};
pub use engine::{CanonicalClaim, DedupCandidate, DedupDecision, DedupEngine, DedupOutcome};
pub use error::DedupError;
pub use hasher::{hash_file, HashedFile};
