//! Record Data Structure
//!
//! This module defines the `Record` type - the unit of persistence in keel -
//! and its on-disk codec.
//!
//! ## On-Disk Format
//!
//! Every record is serialized as a fixed 8-byte header followed by the raw
//! key and value bytes:
//!
//! ```text
//! ┌───────────┬─────────────┬──────────────┬────────────────┐
//! │ key_len   │ value_len   │ key bytes    │ value bytes    │
//! │ (u32, LE) │ (u32, LE)   │ (key_len)    │ (value_len)    │
//! └───────────┴─────────────┴──────────────┴────────────────┘
//! ```
//!
//! Total encoded size is `8 + key_len + value_len`. Records are immutable
//! once written.
//!
//! ## Tombstones
//!
//! A record whose value equals the reserved sentinel `__DELETE__` is a
//! tombstone: it marks its key as deleted. Tombstones travel through the
//! same codec as ordinary records; only their value distinguishes them.

use bytes::{BufMut, BytesMut};

use crate::error::{Error, Result};

/// Reserved value marking a key as deleted.
pub const TOMBSTONE: &str = "__DELETE__";

/// Size of the length-prefix header in bytes.
pub const RECORD_HEADER_SIZE: usize = 8;

/// A single key/value record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub key: String,
    pub value: String,
}

impl Record {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// A deletion marker for `key`.
    pub fn tombstone(key: impl Into<String>) -> Self {
        Self::new(key, TOMBSTONE)
    }

    pub fn is_tombstone(&self) -> bool {
        self.value == TOMBSTONE
    }

    /// Size of this record once encoded.
    pub fn encoded_len(&self) -> u64 {
        (RECORD_HEADER_SIZE + self.key.len() + self.value.len()) as u64
    }

    /// Serialize into the on-disk layout.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(self.encoded_len() as usize);
        buf.put_u32_le(self.key.len() as u32);
        buf.put_u32_le(self.value.len() as u32);
        buf.put_slice(self.key.as_bytes());
        buf.put_slice(self.value.as_bytes());
        buf.to_vec()
    }

    /// Decode one record from the start of `data`.
    pub fn decode(data: &[u8]) -> Result<Record> {
        if data.len() < RECORD_HEADER_SIZE {
            return Err(Error::Corrupt("record header truncated".to_string()));
        }
        let key_len = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;
        let value_len = u32::from_le_bytes([data[4], data[5], data[6], data[7]]) as usize;
        let total = RECORD_HEADER_SIZE + key_len + value_len;
        if data.len() < total {
            return Err(Error::Corrupt("record payload truncated".to_string()));
        }
        Self::from_parts(
            &data[RECORD_HEADER_SIZE..RECORD_HEADER_SIZE + key_len],
            &data[RECORD_HEADER_SIZE + key_len..total],
        )
    }

    /// Build a record from raw key and value bytes read off disk.
    pub fn from_parts(key: &[u8], value: &[u8]) -> Result<Record> {
        let key = std::str::from_utf8(key)
            .map_err(|_| Error::Corrupt("key is not valid UTF-8".to_string()))?;
        let value = std::str::from_utf8(value)
            .map_err(|_| Error::Corrupt("value is not valid UTF-8".to_string()))?;
        Ok(Record::new(key, value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ---------------------------------------------------------------
    // Encoding layout
    // ---------------------------------------------------------------

    #[test]
    fn test_encode_layout_is_bit_exact() {
        let record = Record::new("a", "b");
        let encoded = record.encode();
        assert_eq!(
            encoded,
            vec![1, 0, 0, 0, 1, 0, 0, 0, b'a', b'b'],
            "header must be two little-endian u32 lengths"
        );
    }

    #[test]
    fn test_encode_lengths_little_endian() {
        let record = Record::new("key-0", "x".repeat(300));
        let encoded = record.encode();
        assert_eq!(&encoded[0..4], &5u32.to_le_bytes());
        assert_eq!(&encoded[4..8], &300u32.to_le_bytes());
    }

    #[test]
    fn test_encoded_len_matches_encoding() {
        let record = Record::new("key-42", "some value");
        assert_eq!(record.encoded_len(), record.encode().len() as u64);
    }

    #[test]
    fn test_encode_empty_value() {
        let record = Record::new("k", "");
        let encoded = record.encode();
        assert_eq!(encoded.len(), RECORD_HEADER_SIZE + 1);
        assert_eq!(&encoded[4..8], &0u32.to_le_bytes());
    }

    // ---------------------------------------------------------------
    // Decoding
    // ---------------------------------------------------------------

    #[test]
    fn test_decode_roundtrip() {
        let record = Record::new("user-7", r#"{"visits": 3}"#);
        let decoded = Record::decode(&record.encode()).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_decode_roundtrip_unicode() {
        let record = Record::new("clé", "значення");
        let decoded = Record::decode(&record.encode()).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_decode_ignores_trailing_bytes() {
        let mut data = Record::new("a", "1").encode();
        data.extend_from_slice(&Record::new("b", "2").encode());
        let decoded = Record::decode(&data).unwrap();
        assert_eq!(decoded, Record::new("a", "1"));
    }

    #[test]
    fn test_decode_truncated_header_fails() {
        let encoded = Record::new("abc", "def").encode();
        assert!(Record::decode(&encoded[..7]).is_err());
    }

    #[test]
    fn test_decode_truncated_payload_fails() {
        let encoded = Record::new("abc", "def").encode();
        assert!(Record::decode(&encoded[..encoded.len() - 1]).is_err());
    }

    // ---------------------------------------------------------------
    // Tombstones
    // ---------------------------------------------------------------

    #[test]
    fn test_tombstone_value_is_sentinel() {
        let record = Record::tombstone("doomed");
        assert_eq!(record.value, "__DELETE__");
        assert!(record.is_tombstone());
    }

    #[test]
    fn test_tombstone_survives_roundtrip() {
        let record = Record::tombstone("doomed");
        let decoded = Record::decode(&record.encode()).unwrap();
        assert!(decoded.is_tombstone());
        assert_eq!(decoded.key, "doomed");
    }

    #[test]
    fn test_plain_value_is_not_tombstone() {
        assert!(!Record::new("k", "__delete__").is_tombstone());
        assert!(!Record::new("k", "__DELETE_").is_tombstone());
        assert!(!Record::new("k", "v").is_tombstone());
    }
}
