//! Error Types for the Keel Stack
//!
//! ## Error Categories
//!
//! ### Lookup
//! - `NotFound`: no live record for the key. Always a distinct variant,
//!   never folded into an I/O failure, so callers can branch on it.
//!
//! ### I/O
//! - `Io`: file-system failure surfaced from `Get`/`Put`/`Open`/`Close`.
//!
//! ### Data Integrity
//! - `Corrupt`: a record that cannot be decoded at an offset the index
//!   claims is valid.
//!
//! ### Lifecycle
//! - `Closed`: a write was submitted after the store shut its writer down.
//!
//! ## Usage
//! All fallible operations return `Result<T>`, aliased to
//! `Result<T, Error>`, so errors propagate with `?`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("record not found")]
    NotFound,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt record: {0}")]
    Corrupt(String),

    #[error("store is closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, Error>;
