//! At-rest encoding of blob payloads.
//!
//! Every encoded payload starts with one codec byte:
//!
//! ```text
//! [1 byte: codec (0 = raw, 1 = zstd)]
//! [N bytes: payload]
//! ```
//!
//! The same framing is used for blobs embedded in archive documents.

use lantern_types::BlobKey;

use crate::error::{BlobError, BlobResult};
use crate::hasher::ContentHasher;

/// Payloads larger than this many bytes are compressed by default.
pub const DEFAULT_COMPRESSION_THRESHOLD: usize = 16 * 1024;

const ZSTD_LEVEL: i32 = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Codec {
    Raw,
    Zstd,
}

impl Codec {
    pub fn tag(&self) -> u8 {
        match self {
            Self::Raw => 0,
            Self::Zstd => 1,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::Raw),
            1 => Some(Self::Zstd),
            _ => None,
        }
    }
}

/// Encode a payload, compressing it when it exceeds `threshold` bytes and
/// compression actually shrinks it.
pub fn encode(data: &[u8], threshold: usize) -> BlobResult<Vec<u8>> {
    if data.len() > threshold {
        let compressed = zstd::encode_all(data, ZSTD_LEVEL)
            .map_err(|e| BlobError::Compression(e.to_string()))?;
        if compressed.len() < data.len() {
            let mut out = Vec::with_capacity(compressed.len() + 1);
            out.push(Codec::Zstd.tag());
            out.extend_from_slice(&compressed);
            return Ok(out);
        }
    }
    let mut out = Vec::with_capacity(data.len() + 1);
    out.push(Codec::Raw.tag());
    out.extend_from_slice(data);
    Ok(out)
}

/// Decode an encoded payload and verify it hashes to `key`.
pub fn decode(key: &BlobKey, encoded: &[u8]) -> BlobResult<Vec<u8>> {
    let (&tag, payload) = encoded.split_first().ok_or_else(|| BlobError::Corrupted {
        key: *key,
        reason: "empty payload".into(),
    })?;
    let data = match Codec::from_tag(tag) {
        Some(Codec::Raw) => payload.to_vec(),
        Some(Codec::Zstd) => zstd::decode_all(payload).map_err(|e| BlobError::Corrupted {
            key: *key,
            reason: format!("decompression failed: {e}"),
        })?,
        None => {
            return Err(BlobError::Corrupted {
                key: *key,
                reason: format!("unknown codec byte: {tag}"),
            })
        }
    };
    if !ContentHasher::BLOB.verify(&data, key) {
        return Err(BlobError::Corrupted {
            key: *key,
            reason: "content hash mismatch".into(),
        });
    }
    Ok(data)
}
