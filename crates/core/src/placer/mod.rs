//! Atomic file placement into the destination tree.
//!
//! A placement stages the source in a hidden `.partial` file next to its
//! final location, syncs it, claims the first free name in the `name`,
//! `name--1`, `name--2`, ... sequence and commits under it without ever
//! clobbering an existing file. Readers never observe a partially written file at a
//! final path.

mod config;
mod error;
mod fs_placer;
mod reservation;
mod traits;
mod types;

pub use config::PlacerConfig;
pub use error::PlacerError;
pub use fs_placer::{candidate_name, FsPlacer};
pub use reservation::{Reservation, ReservationSet};
pub use traits::Placer;
pub use types::{
    ByteProgress, NameClaim, PlacedFile, PlacementRequest, RollbackResult, StagedFile,
};
