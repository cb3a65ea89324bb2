//! Reversal of a session's produced files.
//!
//! Undo works purely from the mapping log: every destination file a
//! session produced is recorded there before the file is reported as
//! completed, so deleting exactly the mapped paths never touches files the
//! session did not create. Source trees are never modified.

mod engine;
mod error;

pub use engine::{UndoEngine, UndoPreview, UndoReport};
pub use error::UndoError;
