//! Keel Store
//!
//! A log-structured key/value store: records are appended to segment
//! files, an in-memory index maps each key to its latest record, and a
//! background task compacts older segments.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   put/delete   ┌──────────────┐
//! │   Callers    │ ─────────────► │ writer task  │──► current-data
//! └──────┬───────┘                └──────┬───────┘      (active)
//!        │ get                           │ seal at threshold
//!        ▼                               ▼
//! ┌──────────────┐                segment-0, segment-1, ...
//! │  key index   │ ◄───────────── (sealed, read-only)
//! └──────────────┘     replay            ▲
//!                                        │ merge two oldest
//!                                 ┌──────┴───────┐
//!                                 │  compactor   │
//!                                 └──────────────┘
//! ```
//!
//! ## Main Components
//!
//! - [`Store`]: open/get/put/delete/close, plus on-demand [`Store::compact`]
//! - [`SealedSegment`]: read-only segment with a cached handle
//! - [`KeyIndex`]: key → `(segment id, offset)` of the latest record
//! - [`StoreConfig`]: rotation threshold, compaction interval, queue depth
//!
//! ## Guarantees
//!
//! - Writes are totally ordered by a single writer task; the index is
//!   updated only after an append succeeds, so reads never observe a
//!   partially written record.
//! - Reopening a directory replays every segment oldest-first and yields
//!   the same visible state, tolerating a partial trailing record.
//! - Compaction preserves read semantics; its only atomic commit point is
//!   a file rename.

pub mod config;
pub mod index;
pub mod segment;
pub mod store;

mod compaction;

pub use config::StoreConfig;
pub use index::{KeyIndex, Location};
pub use keel_core::{Error, Record, Result, TOMBSTONE};
pub use segment::{SealedSegment, ACTIVE_FILE_NAME, SEGMENT_PREFIX};
pub use store::Store;
