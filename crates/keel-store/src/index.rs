//! In-Memory Key Index
//!
//! Maps every live key to the location of its latest record. Tombstones
//! remove the key outright, so an index miss means "no live record" -
//! the read path still re-checks the decoded value against the tombstone
//! sentinel, keeping the externally observable semantics identical either
//! way.

use std::collections::HashMap;

use keel_core::Record;

/// Where the latest record for a key lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    pub segment_id: u64,
    pub offset: u64,
}

#[derive(Debug, Default)]
pub struct KeyIndex {
    map: HashMap<String, Location>,
}

impl KeyIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Location> {
        self.map.get(key).copied()
    }

    /// Apply one record in write order: later applications win.
    pub fn apply(&mut self, record: &Record, location: Location) {
        if record.is_tombstone() {
            self.map.remove(&record.key);
        } else {
            self.map.insert(record.key.clone(), location);
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}
