//! On-disk layout of an archive document.
//!
//! ```text
//! header:  "LTND" | schema_version u32
//! body:    info section (JSON)
//!          database section (zstd stream of length-prefixed bincode records)
//!          blob sections (codec byte + data)
//! index:   bincode DocumentIndex
//! footer:  index_offset u64 | index_len u64 | blake3(header..index) | "LTNF"
//! ```
//!
//! Integers in the header, footer, and record prefixes are big-endian.

use std::collections::BTreeMap;

use lantern_types::{
    BlobKey, EntityId, Message, NetworkTask, Session, Timestamp, Transaction,
};
use serde::{Deserialize, Serialize};

use crate::error::{ArchiveError, ArchiveResult};

pub const HEADER_MAGIC: &[u8; 4] = b"LTND";
pub const FOOTER_MAGIC: &[u8; 4] = b"LTNF";
pub const HEADER_SIZE: usize = 8;
/// index_offset + index_len + blake3 digest + magic.
pub const FOOTER_SIZE: usize = 8 + 8 + 32 + 4;

/// Documents without blob sections.
pub const SCHEMA_V1: u32 = 1;
/// Documents with embedded blobs. Written by this version.
pub const SCHEMA_V2: u32 = 2;
pub const CURRENT_SCHEMA: u32 = SCHEMA_V2;

pub fn is_supported_schema(schema: u32) -> bool {
    matches!(schema, SCHEMA_V1 | SCHEMA_V2)
}

/// Location and checksum of one stored section.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    pub offset: u64,
    /// Stored length in bytes.
    pub len: u64,
    /// CRC32 of the stored bytes.
    pub crc32: u32,
    /// Length once decompressed.
    pub raw_len: u64,
}

impl Section {
    pub fn range(&self, file_len: usize) -> ArchiveResult<std::ops::Range<usize>> {
        let start = usize::try_from(self.offset)
            .map_err(|_| ArchiveError::Corrupted("section offset overflows".into()))?;
        let len = usize::try_from(self.len)
            .map_err(|_| ArchiveError::Corrupted("section length overflows".into()))?;
        let end = start
            .checked_add(len)
            .filter(|end| *end <= file_len)
            .ok_or_else(|| {
                ArchiveError::Corrupted(format!(
                    "section at {start} with length {len} runs past the file"
                ))
            })?;
        Ok(start..end)
    }

    pub fn check(&self, bytes: &[u8]) -> ArchiveResult<()> {
        let actual = crc32fast::hash(bytes);
        if actual != self.crc32 {
            return Err(ArchiveError::Corrupted(format!(
                "section at {} failed its checksum: expected {:#010x}, got {actual:#010x}",
                self.offset, self.crc32
            )));
        }
        Ok(())
    }
}

/// Table of contents written after the body.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentIndex {
    pub info: Section,
    pub database: Section,
    /// Sorted by key.
    pub blobs: Vec<(BlobKey, Section)>,
}

/// Document metadata, stored as JSON so tools can read it without the
/// record types.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentInfo {
    pub schema_version: u32,
    pub store_version: u32,
    pub created_at: Timestamp,
    pub session_count: usize,
    pub message_count: usize,
    pub task_count: usize,
    pub transaction_count: usize,
    pub blob_count: usize,
    /// Uncompressed size of every embedded blob.
    pub total_blob_bytes: u64,
    #[serde(default)]
    pub app_info: BTreeMap<String, String>,
    /// Summary of the criteria the document was exported with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
}

/// One record of the database section.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DatabaseRecord {
    Session(Session),
    Message(Message),
    Task(NetworkTask),
    Transaction(Transaction),
    Pin(EntityId),
}

pub struct Footer {
    pub index_offset: u64,
    pub index_len: u64,
    pub digest: [u8; 32],
}

impl Footer {
    pub fn to_bytes(&self) -> [u8; FOOTER_SIZE] {
        let mut buf = [0u8; FOOTER_SIZE];
        buf[0..8].copy_from_slice(&self.index_offset.to_be_bytes());
        buf[8..16].copy_from_slice(&self.index_len.to_be_bytes());
        buf[16..48].copy_from_slice(&self.digest);
        buf[48..52].copy_from_slice(FOOTER_MAGIC);
        buf
    }

    pub fn from_bytes(bytes: &[u8]) -> ArchiveResult<Self> {
        if bytes.len() != FOOTER_SIZE || &bytes[48..52] != FOOTER_MAGIC {
            return Err(ArchiveError::StoreInvalid("document footer is missing".into()));
        }
        let mut index_offset = [0u8; 8];
        let mut index_len = [0u8; 8];
        let mut digest = [0u8; 32];
        index_offset.copy_from_slice(&bytes[0..8]);
        index_len.copy_from_slice(&bytes[8..16]);
        digest.copy_from_slice(&bytes[16..48]);
        Ok(Self {
            index_offset: u64::from_be_bytes(index_offset),
            index_len: u64::from_be_bytes(index_len),
            digest,
        })
    }
}

/// Parse the header, returning the schema version.
pub fn parse_header(bytes: &[u8]) -> ArchiveResult<u32> {
    if bytes.len() < HEADER_SIZE || &bytes[0..4] != HEADER_MAGIC {
        return Err(ArchiveError::StoreInvalid("document header is missing".into()));
    }
    let schema = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    if !is_supported_schema(schema) {
        return Err(ArchiveError::UnsupportedSchema(schema));
    }
    Ok(schema)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn footer_roundtrip() {
        let footer = Footer {
            index_offset: 1234,
            index_len: 56,
            digest: [7; 32],
        };
        let parsed = Footer::from_bytes(&footer.to_bytes()).unwrap();
        assert_eq!(parsed.index_offset, 1234);
        assert_eq!(parsed.index_len, 56);
        assert_eq!(parsed.digest, [7; 32]);
    }

    #[test]
    fn header_rejects_unknown_schema() {
        let mut header = HEADER_MAGIC.to_vec();
        header.extend_from_slice(&3u32.to_be_bytes());
        assert!(matches!(
            parse_header(&header),
            Err(ArchiveError::UnsupportedSchema(3))
        ));
        assert!(matches!(
            parse_header(b"ZIP\0\0\0\0\x02"),
            Err(ArchiveError::StoreInvalid(_))
        ));
    }

    #[test]
    fn section_range_is_bounded() {
        let section = Section {
            offset: 10,
            len: 20,
            crc32: 0,
            raw_len: 20,
        };
        assert_eq!(section.range(30).unwrap(), 10..30);
        assert!(section.range(29).is_err());
    }
}
