//! Background Segment Compaction
//!
//! A ticker periodically merges the two oldest sealed segments into one,
//! keeping only the latest record per key and dropping tombstones. Each
//! cycle reduces the sealed-segment count by one, so under a bounded write
//! rate the store converges to a bounded number of segments.
//!
//! ## Cycle
//!
//! 1. Snapshot the two oldest sealed segments A and B (id_A < id_B).
//!    Both are frozen, so the merge scan runs without the store lock and
//!    writes continue undisturbed.
//! 2. Scan A then B into a latest-wins map; records in B override A, and
//!    a tombstone deletes its key from the map.
//! 3. Write the survivors to a temp file next to A and atomically rename
//!    it over A's path. The rename is the only commit point: a failure
//!    before it leaves the segment set untouched.
//! 4. Under the store lock, retire B and rebuild the index from scratch
//!    by rescanning every sealed segment plus the active one, so no entry
//!    can keep pointing into the retired segment.
//!
//! Dropping tombstones in step 2 is safe because A is the oldest segment:
//! nothing older exists to resurrect a deleted key, and keys rewritten in
//! newer segments are re-established by the index rebuild.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use keel_core::{Record, Result};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::index::{KeyIndex, Location};
use crate::segment::{self, SealedSegment, ACTIVE_FILE_NAME};
use crate::store::Shared;

pub(crate) async fn run_compactor(
    shared: Arc<Shared>,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately; wait a full period instead.
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match compact_once(&shared).await {
                    Ok(true) => {}
                    Ok(false) => debug!("compaction skipped"),
                    Err(err) => warn!(%err, "compaction cycle failed"),
                }
            }
            _ = shutdown_rx.changed() => break,
        }
    }
}

/// Merge the two oldest sealed segments. Returns `false` when fewer than
/// two exist or another cycle holds the gate.
pub(crate) async fn compact_once(shared: &Arc<Shared>) -> Result<bool> {
    let Ok(_gate) = shared.compaction_gate.try_lock() else {
        return Ok(false);
    };

    let (older, newer) = {
        let state = shared.state.read().await;
        let mut oldest = state.sealed.values().take(2).cloned();
        match (oldest.next(), oldest.next()) {
            (Some(a), Some(b)) => (a, b),
            _ => return Ok(false),
        }
    };

    // Latest-wins merge; both inputs are frozen.
    let mut live: BTreeMap<String, String> = BTreeMap::new();
    for segment in [&older, &newer] {
        for (_, record) in segment::scan_segment(segment.path()).await? {
            if record.is_tombstone() {
                live.remove(&record.key);
            } else {
                live.insert(record.key, record.value);
            }
        }
    }

    let tmp_path = older.path().with_extension("tmp");
    let mut tmp = File::create(&tmp_path).await?;
    let mut merged_bytes = 0u64;
    for (key, value) in &live {
        let encoded = Record::new(key.clone(), value.clone()).encode();
        merged_bytes += encoded.len() as u64;
        tmp.write_all(&encoded).await?;
    }
    tmp.sync_all().await?;
    drop(tmp);

    // Commit point.
    tokio::fs::rename(&tmp_path, older.path()).await?;

    let merged = SealedSegment::open(older.path(), older.id()).await?;

    let mut state = shared.state.write().await;
    if let Err(err) = tokio::fs::remove_file(newer.path()).await {
        // Abort with the segment map untouched: the merged file subsumes
        // the newer one, so reads and recovery both stay correct, and the
        // next cycle retries the deletion.
        warn!(%err, id = newer.id(), "failed to delete merged segment");
        return Err(err.into());
    }
    state.sealed.remove(&newer.id());
    state.sealed.insert(older.id(), Arc::new(merged));

    // Full index rebuild: sealed segments oldest-first, then the active
    // file. A record the writer appends during this scan is either seen by
    // the scan or re-applied by the writer once it re-acquires the lock.
    let mut index = KeyIndex::new();
    for (id, segment) in state.sealed.iter() {
        for (offset, record) in segment::scan_segment(segment.path()).await? {
            index.apply(&record, Location { segment_id: *id, offset });
        }
    }
    let active_path = shared.dir.join(ACTIVE_FILE_NAME);
    for (offset, record) in segment::scan_segment(&active_path).await? {
        index.apply(
            &record,
            Location {
                segment_id: state.active_id,
                offset,
            },
        );
    }
    state.index = index;

    info!(
        merged = older.id(),
        retired = newer.id(),
        live_keys = live.len(),
        bytes = merged_bytes,
        "compacted segments"
    );
    Ok(true)
}
