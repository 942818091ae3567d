//! Store Core
//!
//! The log-structured key/value store: an append-only segment log, an
//! in-memory index over it, and the tasks that keep both consistent.
//!
//! ## Write Path
//!
//! All mutations funnel through a single writer task. Callers enqueue a
//! record on a bounded channel and await a reply; the writer dequeues in
//! FIFO order, appends to the active segment, and only then updates the
//! index. This serialization turns arbitrary caller concurrency into a
//! totally ordered write log, which is what makes latest-wins trivially
//! correct.
//!
//! ```text
//! put/delete ──► write channel ──► writer task ──► append ──► index
//!      ▲                                             │
//!      └───────────── oneshot reply ◄────────────────┘
//! ```
//!
//! When the active segment reaches the configured size threshold the
//! writer seals it: the file is renamed from `current-data` to
//! `segment-<id>`, reopened read-only, and a fresh active file is started.
//! Rotation happens inside the writer while it holds the store lock, so
//! readers never observe a half-renamed segment map.
//!
//! ## Read Path
//!
//! `get` takes the shared lock only to look up the key and snapshot the
//! segment handle, then reads the record without any lock. Reads of the
//! active segment open an independent handle so the appender's file
//! position is untouched.
//!
//! ## Recovery
//!
//! On open, sealed segments are replayed oldest-first, then the active
//! file; later records overwrite earlier index entries, so the index ends
//! at exactly the latest-wins state. A partial trailing record in the
//! active file is truncated away.
//!
//! ## Shutdown
//!
//! `close` flips a quit channel; the writer drains whatever was already
//! queued, syncs the active file, and exits together with the compactor.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use keel_core::{Error, Record, Result};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::compaction;
use crate::config::StoreConfig;
use crate::index::{KeyIndex, Location};
use crate::segment::{self, SealedSegment, ACTIVE_FILE_NAME};

/// Index and segment map, guarded by one reader/writer lock.
pub(crate) struct State {
    pub(crate) index: KeyIndex,
    pub(crate) sealed: BTreeMap<u64, Arc<SealedSegment>>,
    pub(crate) active_id: u64,
}

pub(crate) struct Shared {
    pub(crate) dir: PathBuf,
    pub(crate) config: StoreConfig,
    pub(crate) state: RwLock<State>,
    /// Held for the duration of a compaction cycle; `try_lock` keeps at
    /// most one cycle in flight.
    pub(crate) compaction_gate: Mutex<()>,
}

struct WriteRequest {
    record: Record,
    reply: oneshot::Sender<Result<()>>,
}

/// Handle to an open store. Cheap to share behind an `Arc`; all methods
/// take `&self`.
pub struct Store {
    shared: Arc<Shared>,
    write_tx: mpsc::Sender<WriteRequest>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Store {
    /// Open the store in `dir`, creating the directory if needed, then
    /// replay every segment to rebuild the index and start the writer and
    /// compactor tasks.
    pub async fn open(dir: impl AsRef<Path>, config: StoreConfig) -> Result<Store> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await?;

        let mut sealed_ids = Vec::new();
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if let Some(id) = entry
                .file_name()
                .to_str()
                .and_then(segment::parse_segment_id)
            {
                sealed_ids.push(id);
            }
        }
        sealed_ids.sort_unstable();

        // Replay oldest to newest so later records overwrite earlier
        // index entries.
        let mut index = KeyIndex::new();
        let mut sealed = BTreeMap::new();
        for id in sealed_ids {
            let path = dir.join(segment::segment_file_name(id));
            for (offset, record) in segment::scan_segment(&path).await? {
                index.apply(&record, Location { segment_id: id, offset });
            }
            sealed.insert(id, Arc::new(SealedSegment::open(&path, id).await?));
        }

        let active_id = sealed.keys().next_back().map(|id| id + 1).unwrap_or(0);

        let active_path = dir.join(ACTIVE_FILE_NAME);
        let active = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&active_path)
            .await?;
        let disk_len = active.metadata().await?.len();
        let mut active_len = 0u64;
        if disk_len > 0 {
            let records = segment::scan_segment(&active_path).await?;
            for (offset, record) in &records {
                index.apply(
                    record,
                    Location {
                        segment_id: active_id,
                        offset: *offset,
                    },
                );
            }
            active_len = records
                .last()
                .map(|(offset, record)| offset + record.encoded_len())
                .unwrap_or(0);
            if active_len < disk_len {
                warn!(
                    dropped = disk_len - active_len,
                    "truncating partial record at end of active segment"
                );
                active.set_len(active_len).await?;
            }
        }

        info!(
            dir = %dir.display(),
            segments = sealed.len(),
            keys = index.len(),
            active_id,
            "store opened"
        );

        let shared = Arc::new(Shared {
            dir,
            config,
            state: RwLock::new(State {
                index,
                sealed,
                active_id,
            }),
            compaction_gate: Mutex::new(()),
        });

        let (write_tx, write_rx) = mpsc::channel(shared.config.write_queue_depth);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut tasks = Vec::new();
        tasks.push(tokio::spawn(run_writer(
            shared.clone(),
            active,
            active_id,
            active_len,
            write_rx,
            shutdown_rx.clone(),
        )));
        if let Some(interval) = shared.config.compaction_interval() {
            tasks.push(tokio::spawn(compaction::run_compactor(
                shared.clone(),
                interval,
                shutdown_rx,
            )));
        }

        Ok(Store {
            shared,
            write_tx,
            shutdown_tx,
            tasks: Mutex::new(tasks),
        })
    }

    /// Look up the latest value for `key`. Returns [`Error::NotFound`] if
    /// the key was never written or its latest record is a tombstone.
    pub async fn get(&self, key: &str) -> Result<String> {
        let (location, sealed) = {
            let state = self.shared.state.read().await;
            let location = state.index.get(key).ok_or(Error::NotFound)?;
            let sealed = if location.segment_id == state.active_id {
                None
            } else {
                Some(
                    state
                        .sealed
                        .get(&location.segment_id)
                        .cloned()
                        .ok_or_else(|| {
                            Error::Corrupt(format!(
                                "index references missing segment {}",
                                location.segment_id
                            ))
                        })?,
                )
            };
            (location, sealed)
        };

        let record = match sealed {
            Some(segment) => segment.read_at(location.offset).await?,
            None => self.read_active(location).await?,
        };

        if record.is_tombstone() {
            return Err(Error::NotFound);
        }
        Ok(record.value)
    }

    async fn read_active(&self, location: Location) -> Result<Record> {
        let path = self.shared.dir.join(ACTIVE_FILE_NAME);
        match read_active_once(&path, location.offset).await {
            Ok(record) => Ok(record),
            Err(err) => {
                // A rotation may have sealed the file between the index
                // lookup and our open; the location then resolves through
                // the sealed map instead.
                let sealed = {
                    let state = self.shared.state.read().await;
                    state.sealed.get(&location.segment_id).cloned()
                };
                match sealed {
                    Some(segment) => segment.read_at(location.offset).await,
                    None => Err(err),
                }
            }
        }
    }

    /// Write `value` under `key`.
    pub async fn put(&self, key: impl Into<String>, value: impl Into<String>) -> Result<()> {
        self.write(Record::new(key, value)).await
    }

    /// Delete `key` by appending a tombstone.
    pub async fn delete(&self, key: impl Into<String>) -> Result<()> {
        self.write(Record::tombstone(key)).await
    }

    async fn write(&self, record: Record) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.write_tx
            .send(WriteRequest {
                record,
                reply: reply_tx,
            })
            .await
            .map_err(|_| Error::Closed)?;
        reply_rx.await.map_err(|_| Error::Closed)?
    }

    /// Run one compaction cycle now instead of waiting for the ticker.
    /// Returns `false` when there was nothing to compact (fewer than two
    /// sealed segments, or a cycle already in flight).
    pub async fn compact(&self) -> Result<bool> {
        compaction::compact_once(&self.shared).await
    }

    /// Signal the writer and compactor to exit, drain queued writes, and
    /// wait for both tasks.
    pub async fn close(&self) -> Result<()> {
        let _ = self.shutdown_tx.send(true);
        let mut tasks = self.tasks.lock().await;
        for task in tasks.drain(..) {
            if let Err(err) = task.await {
                warn!(%err, "store task failed during shutdown");
            }
        }
        Ok(())
    }
}

async fn read_active_once(path: &Path, offset: u64) -> Result<Record> {
    let mut file = File::open(path).await?;
    segment::read_record_at(&mut file, offset).await
}

struct Writer {
    shared: Arc<Shared>,
    active: File,
    active_id: u64,
    active_len: u64,
}

async fn run_writer(
    shared: Arc<Shared>,
    active: File,
    active_id: u64,
    active_len: u64,
    mut write_rx: mpsc::Receiver<WriteRequest>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut writer = Writer {
        shared,
        active,
        active_id,
        active_len,
    };
    loop {
        tokio::select! {
            request = write_rx.recv() => match request {
                Some(request) => writer.handle(request).await,
                None => break,
            },
            _ = shutdown_rx.changed() => {
                // Drain whatever was queued before the quit signal.
                while let Ok(request) = write_rx.try_recv() {
                    writer.handle(request).await;
                }
                break;
            }
        }
    }
    if let Err(err) = writer.active.sync_all().await {
        warn!(%err, "failed to sync active segment on shutdown");
    }
}

impl Writer {
    async fn handle(&mut self, request: WriteRequest) {
        let result = self.append(request.record).await;
        let _ = request.reply.send(result);
    }

    async fn append(&mut self, record: Record) -> Result<()> {
        let encoded = record.encode();
        let offset = self.active_len;

        if let Err(err) = self.active.write_all(&encoded).await {
            // Drop whatever partial tail the failed write left behind so
            // the next append starts at a known offset.
            let _ = self.active.set_len(offset).await;
            return Err(err.into());
        }
        self.active_len += encoded.len() as u64;

        {
            let mut state = self.shared.state.write().await;
            state.index.apply(
                &record,
                Location {
                    segment_id: self.active_id,
                    offset,
                },
            );
        }

        if self.active_len >= self.shared.config.segment_max_size {
            self.rotate().await?;
        }
        Ok(())
    }

    /// Seal the active segment under the store lock and start a fresh one.
    async fn rotate(&mut self) -> Result<()> {
        let mut state = self.shared.state.write().await;

        self.active.sync_all().await?;
        let active_path = self.shared.dir.join(ACTIVE_FILE_NAME);
        let sealed_path = self
            .shared
            .dir
            .join(segment::segment_file_name(self.active_id));
        tokio::fs::rename(&active_path, &sealed_path).await?;

        let sealed = SealedSegment::open(&sealed_path, self.active_id).await?;
        info!(id = self.active_id, bytes = self.active_len, "sealed segment");
        state.sealed.insert(self.active_id, Arc::new(sealed));

        self.active = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&active_path)
            .await?;
        self.active_id += 1;
        self.active_len = 0;
        state.active_id = self.active_id;
        Ok(())
    }
}
