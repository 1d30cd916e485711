use std::collections::HashMap;

use lantern_types::BlobKey;

use crate::error::BlobResult;

/// Aggregate statistics for a blob store.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BlobStats {
    /// Number of live blobs.
    pub count: usize,
    /// Bytes as stored (after compression).
    pub stored_bytes: u64,
    /// Bytes as seen by callers (before compression).
    pub logical_bytes: u64,
}

/// Content-addressed, reference-counted payload store.
///
/// All implementations must satisfy these invariants:
/// - Keys are a pure function of content: the same bytes always produce the
///   same key, and storing them again only increments the reference count.
/// - A blob is retrievable via `get` iff its reference count is above zero.
/// - Reference-count updates are serialized by the store's own lock.
/// - All I/O errors are propagated, never silently ignored.
pub trait BlobStore: Send + Sync {
    /// Store a payload (or take another reference to it) and return its key.
    fn put(&self, data: &[u8]) -> BlobResult<BlobKey>;

    /// Read a payload by key, decompressed.
    ///
    /// Returns `BlobError::NotFound` for unknown or purged keys and
    /// `BlobError::Corrupted` when the stored bytes fail verification.
    fn get(&self, key: &BlobKey) -> BlobResult<Vec<u8>>;

    /// Drop one reference. The blob is purged when the count reaches zero.
    ///
    /// Returns the remaining reference count.
    fn release(&self, key: &BlobKey) -> BlobResult<u64>;

    /// Current reference count; zero for unknown keys.
    fn ref_count(&self, key: &BlobKey) -> u64;

    /// Whether the key resolves to a live blob.
    fn contains(&self, key: &BlobKey) -> bool {
        self.ref_count(key) > 0
    }

    /// Uncompressed size of a live blob.
    fn size(&self, key: &BlobKey) -> Option<u64>;

    /// Keys of all live blobs, sorted.
    fn keys(&self) -> Vec<BlobKey>;

    /// Aggregate statistics.
    fn stats(&self) -> BlobStats;

    /// Replace reference counts with the counts the owner of the references
    /// derived from its own records.
    ///
    /// Blobs absent from `expected` (or expected with count zero) are purged.
    /// Returns the number of purged blobs.
    fn reconcile(&self, expected: &HashMap<BlobKey, u64>) -> BlobResult<usize>;
}
