use std::collections::HashMap;

use lantern_types::BlobKey;
use parking_lot::Mutex;

use crate::codec;
use crate::error::{BlobError, BlobResult};
use crate::hasher::ContentHasher;
use crate::traits::{BlobStats, BlobStore};

struct Entry {
    encoded: Vec<u8>,
    logical_size: u64,
    refs: u64,
}

/// In-memory, HashMap-based blob store.
///
/// Payloads are held encoded, exactly as a file-backed store would keep them
/// on disk, so `stats` reports comparable numbers for both backends.
pub struct InMemoryBlobStore {
    entries: Mutex<HashMap<BlobKey, Entry>>,
    threshold: usize,
}

impl InMemoryBlobStore {
    /// Create a new empty store with the default compression threshold.
    pub fn new() -> Self {
        Self::with_threshold(codec::DEFAULT_COMPRESSION_THRESHOLD)
    }

    /// Create a new empty store that compresses payloads above `threshold`.
    pub fn with_threshold(threshold: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            threshold,
        }
    }

    /// Insert an already encoded payload with an explicit reference count.
    ///
    /// Used when loading blobs out of an archive document, where payloads are
    /// stored encoded and counts come from the document's records. The
    /// payload is verified before it is accepted.
    pub fn insert_encoded(&self, key: BlobKey, encoded: Vec<u8>, refs: u64) -> BlobResult<()> {
        let logical_size = codec::decode(&key, &encoded)?.len() as u64;
        if refs == 0 {
            return Ok(());
        }
        self.entries.lock().insert(
            key,
            Entry {
                encoded,
                logical_size,
                refs,
            },
        );
        Ok(())
    }

    /// Encoded bytes for a key, as they would be written at rest.
    pub fn get_encoded(&self, key: &BlobKey) -> BlobResult<Vec<u8>> {
        self.entries
            .lock()
            .get(key)
            .map(|e| e.encoded.clone())
            .ok_or(BlobError::NotFound(*key))
    }

    /// Number of live blobs.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns `true` if the store holds no blobs.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl Default for InMemoryBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BlobStore for InMemoryBlobStore {
    fn put(&self, data: &[u8]) -> BlobResult<BlobKey> {
        let key = ContentHasher::BLOB.hash(data);
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get_mut(&key) {
            entry.refs += 1;
            return Ok(key);
        }
        let encoded = codec::encode(data, self.threshold)?;
        entries.insert(
            key,
            Entry {
                encoded,
                logical_size: data.len() as u64,
                refs: 1,
            },
        );
        Ok(key)
    }

    fn get(&self, key: &BlobKey) -> BlobResult<Vec<u8>> {
        let encoded = self.get_encoded(key)?;
        codec::decode(key, &encoded)
    }

    fn release(&self, key: &BlobKey) -> BlobResult<u64> {
        let mut entries = self.entries.lock();
        let entry = entries.get_mut(key).ok_or(BlobError::NotFound(*key))?;
        entry.refs -= 1;
        let remaining = entry.refs;
        if remaining == 0 {
            entries.remove(key);
        }
        Ok(remaining)
    }

    fn ref_count(&self, key: &BlobKey) -> u64 {
        self.entries.lock().get(key).map_or(0, |e| e.refs)
    }

    fn size(&self, key: &BlobKey) -> Option<u64> {
        self.entries.lock().get(key).map(|e| e.logical_size)
    }

    fn keys(&self) -> Vec<BlobKey> {
        let mut keys: Vec<BlobKey> = self.entries.lock().keys().copied().collect();
        keys.sort();
        keys
    }

    fn stats(&self) -> BlobStats {
        let entries = self.entries.lock();
        BlobStats {
            count: entries.len(),
            stored_bytes: entries.values().map(|e| e.encoded.len() as u64).sum(),
            logical_bytes: entries.values().map(|e| e.logical_size).sum(),
        }
    }

    fn reconcile(&self, expected: &HashMap<BlobKey, u64>) -> BlobResult<usize> {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|key, entry| match expected.get(key) {
            Some(&refs) if refs > 0 => {
                entry.refs = refs;
                true
            }
            _ => false,
        });
        Ok(before - entries.len())
    }
}

impl std::fmt::Debug for InMemoryBlobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryBlobStore")
            .field("blob_count", &self.len())
            .field("threshold", &self.threshold)
            .finish()
    }
}
