//! Checkpoint snapshots of the entity tables.
//!
//! File layout:
//! ```text
//! [4 bytes: magic "LTSS"]
//! [4 bytes: format version (little-endian u32)]
//! [4 bytes: CRC32 of body (little-endian u32)]
//! [N bytes: body = zstd(bincode(TablesImage))]
//! ```

use std::fs;
use std::io::{self, Write};
use std::path::Path;

use tracing::info;

use crate::error::{StoreError, StoreResult};
use crate::tables::TablesImage;

const MAGIC: &[u8; 4] = b"LTSS";
const VERSION: u32 = 1;
const HEADER_SIZE: usize = 12;
const ZSTD_LEVEL: i32 = 3;

/// Write a snapshot atomically: temp file in the same directory, then rename.
pub fn write(path: &Path, image: &TablesImage) -> StoreResult<()> {
    let raw = bincode::serialize(image).map_err(|e| StoreError::Serialization(e.to_string()))?;
    let body = zstd::encode_all(raw.as_slice(), ZSTD_LEVEL)?;
    let crc = crc32fast::hash(&body);

    let dir = path
        .parent()
        .ok_or_else(|| StoreError::StoreInvalid(format!("no parent for {}", path.display())))?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(MAGIC)?;
    tmp.write_all(&VERSION.to_le_bytes())?;
    tmp.write_all(&crc.to_le_bytes())?;
    tmp.write_all(&body)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| StoreError::Io(e.error))?;

    info!(
        path = %path.display(),
        messages = image.messages.len(),
        tasks = image.tasks.len(),
        bytes = HEADER_SIZE + body.len(),
        "wrote snapshot"
    );
    Ok(())
}

/// Read a snapshot. A missing file yields `None`.
pub fn read(path: &Path) -> StoreResult<Option<TablesImage>> {
    let bytes = match fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if bytes.len() < HEADER_SIZE || &bytes[..4] != MAGIC {
        return Err(StoreError::StoreCorrupted("snapshot header is invalid".into()));
    }
    let version = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    if version != VERSION {
        return Err(StoreError::StoreCorrupted(format!(
            "unsupported snapshot version {version}"
        )));
    }
    let expected = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
    let body = &bytes[HEADER_SIZE..];
    let actual = crc32fast::hash(body);
    if actual != expected {
        return Err(StoreError::StoreCorrupted(format!(
            "snapshot checksum mismatch: expected {expected:#010x}, got {actual:#010x}"
        )));
    }
    let raw = zstd::decode_all(body)
        .map_err(|e| StoreError::StoreCorrupted(format!("snapshot decompression failed: {e}")))?;
    let image = bincode::deserialize(&raw)
        .map_err(|e| StoreError::StoreCorrupted(format!("snapshot decoding failed: {e}")))?;
    Ok(Some(image))
}
