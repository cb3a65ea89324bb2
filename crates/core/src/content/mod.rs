//! Media classification and destination routing.
//!
//! The pipeline consumes this through the [`MediaProcessor`] trait:
//!
//! ```text
//! sniff_type(path)              -> Option<mime>
//! classify(path, mime)          -> MediaKind     (ordered RuleTable)
//! extract_metadata(path)        -> Metadata      (failures treated as missing)
//! build_destination_fragment()  -> relative path under the destination root
//! ```

mod processor;
mod rules;
mod sniff;
mod types;

pub use processor::{MediaProcessor, RuleBasedProcessor};
pub use rules::{Rule, RuleMatcher, RuleTable};
pub use sniff::{sniff_bytes, sniff_type};
pub use types::{MediaKind, Metadata, MetadataError};
