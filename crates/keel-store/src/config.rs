//! Store Configuration
//!
//! Controls how the store rotates segments and how often it compacts:
//!
//! - **segment_max_size**: seal the active segment once its size reaches
//!   this many bytes (default: 10MB)
//! - **compaction_interval_ms**: how often the background compactor wakes
//!   up (default: 5s, `0` disables it)
//! - **write_queue_depth**: capacity of the channel feeding the writer
//!   task; senders back off when it is full (default: 1024)

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Seal the active segment at this size in bytes (default: 10MB)
    #[serde(default = "default_segment_max_size")]
    pub segment_max_size: u64,

    /// Milliseconds between compaction cycles; 0 disables compaction
    #[serde(default = "default_compaction_interval_ms")]
    pub compaction_interval_ms: u64,

    /// Capacity of the write queue (default: 1024)
    #[serde(default = "default_write_queue_depth")]
    pub write_queue_depth: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            segment_max_size: default_segment_max_size(),
            compaction_interval_ms: default_compaction_interval_ms(),
            write_queue_depth: default_write_queue_depth(),
        }
    }
}

impl StoreConfig {
    pub(crate) fn compaction_interval(&self) -> Option<Duration> {
        (self.compaction_interval_ms > 0).then(|| Duration::from_millis(self.compaction_interval_ms))
    }
}

fn default_segment_max_size() -> u64 {
    10 * 1024 * 1024 // 10MB
}

fn default_compaction_interval_ms() -> u64 {
    5_000
}

fn default_write_queue_depth() -> usize {
    1024
}
