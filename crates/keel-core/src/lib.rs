//! Keel Core Types
//!
//! Shared building blocks for the keel key/value stack:
//!
//! - [`Record`]: the unit of persistence, with its bit-exact on-disk codec
//! - [`Error`] / [`Result`]: the error surface shared by the store and its
//!   HTTP front-ends
//!
//! Everything that touches a segment file - the store core, recovery,
//! compaction - goes through this crate's codec, so the byte layout is
//! defined in exactly one place.

pub mod error;
pub mod record;

pub use error::{Error, Result};
pub use record::{Record, RECORD_HEADER_SIZE, TOMBSTONE};
