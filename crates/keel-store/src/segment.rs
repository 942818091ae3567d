//! Segment Files
//!
//! A segment is a contiguous append-only file of encoded records. At any
//! moment exactly one segment - the file named `current-data` - is open for
//! append; all others are sealed under the name `segment-<id>` and never
//! modified again, except by being atomically replaced during compaction.
//!
//! ## Reading
//!
//! Sealed segments keep one cached read handle, shared behind a lock;
//! reads seek to a stored offset and decode a single record. The active
//! segment is read through a fresh handle per read so the writer's append
//! position is never disturbed (see `Store::get`).
//!
//! ## Scanning
//!
//! Recovery and compaction scan a segment front to back. A scan stops at a
//! clean end-of-file or at a partial trailing record; the partial tail is
//! treated as if it had never been written.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use keel_core::{Error, Record, Result, RECORD_HEADER_SIZE};
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, BufReader};
use tokio::sync::Mutex;
use tracing::warn;

/// Name prefix of sealed segment files.
pub const SEGMENT_PREFIX: &str = "segment-";

/// Working name of the active segment.
pub const ACTIVE_FILE_NAME: &str = "current-data";

pub fn segment_file_name(id: u64) -> String {
    format!("{SEGMENT_PREFIX}{id}")
}

pub fn parse_segment_id(name: &str) -> Option<u64> {
    name.strip_prefix(SEGMENT_PREFIX)?.parse().ok()
}

/// A sealed, read-only segment.
pub struct SealedSegment {
    id: u64,
    path: PathBuf,
    file: Mutex<File>,
    len: u64,
}

impl SealedSegment {
    pub async fn open(path: &Path, id: u64) -> Result<Self> {
        let file = File::open(path).await?;
        let len = file.metadata().await?.len();
        Ok(Self {
            id,
            path: path.to_path_buf(),
            file: Mutex::new(file),
            len,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Read the record whose header starts at `offset`.
    pub async fn read_at(&self, offset: u64) -> Result<Record> {
        let mut file = self.file.lock().await;
        read_record_at(&mut file, offset).await
    }
}

/// Seek `file` to `offset` and decode the record there. Unlike a scan, a
/// missing or partial record here is an error: the caller got the offset
/// from the index, so a complete record must exist.
pub(crate) async fn read_record_at(file: &mut File, offset: u64) -> Result<Record> {
    file.seek(SeekFrom::Start(offset)).await?;
    match read_record(file).await? {
        Some(record) => Ok(record),
        None => Err(Error::Corrupt(format!("no record at offset {offset}"))),
    }
}

/// Decode one record from the reader's current position. Returns `None` on
/// a clean end-of-file or when only part of a record is present.
pub(crate) async fn read_record<R>(reader: &mut R) -> Result<Option<Record>>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; RECORD_HEADER_SIZE];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let key_len = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
    let value_len = u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as usize;

    let mut payload = vec![0u8; key_len + value_len];
    match reader.read_exact(&mut payload).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            warn!("partial record at end of segment, ignoring");
            return Ok(None);
        }
        Err(e) => return Err(e.into()),
    }

    Record::from_parts(&payload[..key_len], &payload[key_len..]).map(Some)
}

/// Scan every complete record in the file at `path`, front to back,
/// returning each with the offset its header starts at.
pub(crate) async fn scan_segment(path: &Path) -> Result<Vec<(u64, Record)>> {
    let file = File::open(path).await?;
    let mut reader = BufReader::new(file);
    let mut records = Vec::new();
    let mut offset = 0u64;
    while let Some(record) = read_record(&mut reader).await? {
        let len = record.encoded_len();
        records.push((offset, record));
        offset += len;
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use tokio::io::AsyncWriteExt;

    async fn write_file(path: &Path, data: &[u8]) {
        let mut file = File::create(path).await.unwrap();
        file.write_all(data).await.unwrap();
        file.sync_all().await.unwrap();
    }

    #[test]
    fn test_segment_names() {
        assert_eq!(segment_file_name(0), "segment-0");
        assert_eq!(segment_file_name(17), "segment-17");
        assert_eq!(parse_segment_id("segment-3"), Some(3));
        assert_eq!(parse_segment_id("segment-"), None);
        assert_eq!(parse_segment_id("current-data"), None);
        assert_eq!(parse_segment_id("segment-3.tmp"), None);
    }

    #[tokio::test]
    async fn test_scan_returns_records_with_offsets() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("seg");
        let a = Record::new("a", "1");
        let b = Record::new("bb", "22");
        let mut data = a.encode();
        data.extend_from_slice(&b.encode());
        write_file(&path, &data).await;

        let records = scan_segment(&path).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0], (0, a.clone()));
        assert_eq!(records[1], (a.encoded_len(), b));
    }

    #[tokio::test]
    async fn test_scan_stops_at_partial_tail() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("seg");
        let complete = Record::new("kept", "yes");
        let mut data = complete.encode();
        let partial = Record::new("lost", "never").encode();
        data.extend_from_slice(&partial[..partial.len() - 3]);
        write_file(&path, &data).await;

        let records = scan_segment(&path).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].1, complete);
    }

    #[tokio::test]
    async fn test_scan_stops_at_partial_header() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("seg");
        let complete = Record::new("kept", "yes");
        let mut data = complete.encode();
        data.extend_from_slice(&[5, 0, 0]); // 3 of 8 header bytes
        write_file(&path, &data).await;

        let records = scan_segment(&path).await.unwrap();
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn test_scan_empty_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("seg");
        write_file(&path, &[]).await;
        assert!(scan_segment(&path).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sealed_read_at_offset() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("segment-0");
        let first = Record::new("first", "1");
        let second = Record::new("second", "2");
        let mut data = first.encode();
        data.extend_from_slice(&second.encode());
        write_file(&path, &data).await;

        let segment = SealedSegment::open(&path, 0).await.unwrap();
        assert_eq!(segment.id(), 0);
        assert_eq!(segment.len(), data.len() as u64);
        assert_eq!(segment.read_at(0).await.unwrap(), first);
        assert_eq!(
            segment.read_at(first.encoded_len()).await.unwrap(),
            second
        );
    }

    #[tokio::test]
    async fn test_sealed_read_past_end_is_corrupt() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("segment-0");
        write_file(&path, &Record::new("k", "v").encode()).await;

        let segment = SealedSegment::open(&path, 0).await.unwrap();
        assert!(matches!(
            segment.read_at(1000).await,
            Err(Error::Corrupt(_))
        ));
    }
}
