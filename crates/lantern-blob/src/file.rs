use std::collections::HashMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use lantern_types::BlobKey;
use parking_lot::Mutex;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::codec;
use crate::error::{BlobError, BlobResult};
use crate::hasher::ContentHasher;
use crate::traits::{BlobStats, BlobStore};

#[derive(Clone, Copy, Debug)]
struct Slot {
    refs: u64,
    stored_size: u64,
    logical_size: u64,
}

/// File-backed blob store: one file per blob.
///
/// Layout: `<root>/<first two hex chars>/<full hex key>`. Files are written
/// to a temporary name and renamed into place, so a crash never leaves a
/// partially written blob under its final name.
///
/// Reference counts live in memory. Blobs found on disk when the store is
/// opened start with a count of zero until the owner calls
/// [`BlobStore::reconcile`] with the counts derived from its records.
pub struct FileBlobStore {
    root: PathBuf,
    readonly: bool,
    threshold: usize,
    slots: Mutex<HashMap<BlobKey, Slot>>,
}

impl FileBlobStore {
    /// Open (or create) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>, readonly: bool, threshold: usize) -> BlobResult<Self> {
        let root = root.into();
        if !readonly {
            fs::create_dir_all(&root)?;
        }
        let slots = if root.exists() {
            Self::scan(&root)?
        } else {
            HashMap::new()
        };
        debug!(root = %root.display(), blobs = slots.len(), readonly, "opened blob store");
        Ok(Self {
            root,
            readonly,
            threshold,
            slots: Mutex::new(slots),
        })
    }

    /// Directory holding the blob files.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Encoded bytes for a key, exactly as stored on disk.
    pub fn get_encoded(&self, key: &BlobKey) -> BlobResult<Vec<u8>> {
        if !self.slots.lock().get(key).is_some_and(|s| s.refs > 0) {
            return Err(BlobError::NotFound(*key));
        }
        match fs::read(self.path_for(key)) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(BlobError::NotFound(*key)),
            Err(e) => Err(e.into()),
        }
    }

    fn path_for(&self, key: &BlobKey) -> PathBuf {
        let hex = key.to_hex();
        self.root.join(&hex[..2]).join(hex)
    }

    fn scan(root: &Path) -> BlobResult<HashMap<BlobKey, Slot>> {
        let mut slots = HashMap::new();
        for shard in fs::read_dir(root)? {
            let shard = shard?;
            if !shard.file_type()?.is_dir() {
                continue;
            }
            for file in fs::read_dir(shard.path())? {
                let file = file?;
                let name = file.file_name();
                let Some(key) = name.to_str().and_then(|n| BlobKey::from_hex(n).ok()) else {
                    // Leftover temp files from an interrupted write.
                    continue;
                };
                let stored_size = file.metadata()?.len();
                slots.insert(
                    key,
                    Slot {
                        refs: 0,
                        stored_size,
                        logical_size: 0,
                    },
                );
            }
        }
        Ok(slots)
    }

    /// Write `encoded` to a synced temporary file next to the blob's final
    /// path. Dropping the result removes it.
    fn stage_file(&self, key: &BlobKey, encoded: &[u8]) -> BlobResult<NamedTempFile> {
        let path = self.path_for(key);
        let dir = path.parent().unwrap_or(&self.root);
        fs::create_dir_all(dir)?;
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(encoded)?;
        tmp.as_file().sync_all()?;
        Ok(tmp)
    }

    /// Take another reference on a live blob. `false` when it is absent.
    fn retain_existing(&self, key: &BlobKey) -> bool {
        match self.slots.lock().get_mut(key) {
            Some(slot) if slot.refs > 0 => {
                slot.refs += 1;
                true
            }
            _ => false,
        }
    }

    fn remove_file(&self, key: &BlobKey) -> BlobResult<()> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn logical_size_of(&self, key: &BlobKey) -> BlobResult<u64> {
        let encoded = fs::read(self.path_for(key))?;
        Ok(codec::decode(key, &encoded)?.len() as u64)
    }
}

impl BlobStore for FileBlobStore {
    fn put(&self, data: &[u8]) -> BlobResult<BlobKey> {
        if self.readonly {
            return Err(BlobError::ReadOnly);
        }
        let key = ContentHasher::BLOB.hash(data);
        if self.retain_existing(&key) {
            return Ok(key);
        }

        // Encode and write without the lock; only the rename is serialized
        // with other puts and releases.
        let encoded = codec::encode(data, self.threshold)?;
        let staged = self.stage_file(&key, &encoded)?;

        let mut slots = self.slots.lock();
        if let Some(slot) = slots.get_mut(&key).filter(|s| s.refs > 0) {
            slot.refs += 1;
            return Ok(key);
        }
        staged
            .persist(self.path_for(&key))
            .map_err(|e| BlobError::Io(e.error))?;
        slots.insert(
            key,
            Slot {
                refs: 1,
                stored_size: encoded.len() as u64,
                logical_size: data.len() as u64,
            },
        );
        Ok(key)
    }

    fn get(&self, key: &BlobKey) -> BlobResult<Vec<u8>> {
        let encoded = self.get_encoded(key)?;
        codec::decode(key, &encoded)
    }

    fn release(&self, key: &BlobKey) -> BlobResult<u64> {
        if self.readonly {
            return Err(BlobError::ReadOnly);
        }
        let mut slots = self.slots.lock();
        let slot = match slots.get_mut(key) {
            Some(slot) if slot.refs > 0 => slot,
            _ => return Err(BlobError::NotFound(*key)),
        };
        slot.refs -= 1;
        let remaining = slot.refs;
        if remaining == 0 {
            self.remove_file(key)?;
            slots.remove(key);
        }
        Ok(remaining)
    }

    fn ref_count(&self, key: &BlobKey) -> u64 {
        self.slots.lock().get(key).map_or(0, |s| s.refs)
    }

    fn size(&self, key: &BlobKey) -> Option<u64> {
        self.slots
            .lock()
            .get(key)
            .filter(|s| s.refs > 0)
            .map(|s| s.logical_size)
    }

    fn keys(&self) -> Vec<BlobKey> {
        let mut keys: Vec<BlobKey> = self
            .slots
            .lock()
            .iter()
            .filter(|(_, s)| s.refs > 0)
            .map(|(k, _)| *k)
            .collect();
        keys.sort();
        keys
    }

    fn stats(&self) -> BlobStats {
        let slots = self.slots.lock();
        let live = slots.values().filter(|s| s.refs > 0);
        let mut stats = BlobStats::default();
        for slot in live {
            stats.count += 1;
            stats.stored_bytes += slot.stored_size;
            stats.logical_bytes += slot.logical_size;
        }
        stats
    }

    fn reconcile(&self, expected: &HashMap<BlobKey, u64>) -> BlobResult<usize> {
        let mut slots = self.slots.lock();
        let mut purged = 0;
        let keys: Vec<BlobKey> = slots.keys().copied().collect();
        for key in keys {
            match expected.get(&key) {
                Some(&refs) if refs > 0 => {
                    let logical_size = match slots.get(&key) {
                        Some(slot) if slot.logical_size > 0 || slot.stored_size == 0 => {
                            slot.logical_size
                        }
                        Some(slot) => self.logical_size_of(&key).unwrap_or_else(|e| {
                            warn!(key = %key.short_hex(), error = %e, "unreadable blob");
                            slot.stored_size
                        }),
                        None => 0,
                    };
                    if let Some(slot) = slots.get_mut(&key) {
                        slot.refs = refs;
                        slot.logical_size = logical_size;
                    }
                }
                _ => {
                    if self.readonly {
                        slots.remove(&key);
                        continue;
                    }
                    warn!(key = %key.short_hex(), "purging unreferenced blob");
                    self.remove_file(&key)?;
                    slots.remove(&key);
                    purged += 1;
                }
            }
        }
        for (key, refs) in expected {
            if *refs > 0 && !slots.contains_key(key) {
                warn!(key = %key.short_hex(), "referenced blob is missing from the store");
            }
        }
        Ok(purged)
    }
}

impl std::fmt::Debug for FileBlobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileBlobStore")
            .field("root", &self.root)
            .field("readonly", &self.readonly)
            .field("blob_count", &self.slots.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open(dir: &Path) -> FileBlobStore {
        FileBlobStore::open(dir.join("blobs"), false, 64).unwrap()
    }

    #[test]
    fn put_writes_sharded_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(dir.path());
        let key = store.put(b"response body").unwrap();
        let hex = key.to_hex();
        assert!(dir.path().join("blobs").join(&hex[..2]).join(&hex).exists());
        assert_eq!(store.get(&key).unwrap(), b"response body");
    }

    #[test]
    fn concurrent_puts_of_one_payload_share_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = std::sync::Arc::new(open(dir.path()));
        let payload = vec![3u8; 10_000];
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = std::sync::Arc::clone(&store);
                let payload = payload.clone();
                std::thread::spawn(move || store.put(&payload).unwrap())
            })
            .collect();
        let keys: Vec<BlobKey> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let key = keys[0];
        assert!(keys.iter().all(|k| *k == key));

        assert_eq!(store.ref_count(&key), 8);
        assert_eq!(store.get(&key).unwrap(), payload);
        let shard = store.path_for(&key).parent().unwrap().to_path_buf();
        assert_eq!(fs::read_dir(shard).unwrap().count(), 1);
    }

    #[test]
    fn release_to_zero_deletes_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(dir.path());
        let key = store.put(b"abc").unwrap();
        store.put(b"abc").unwrap();
        assert_eq!(store.release(&key).unwrap(), 1);
        assert_eq!(store.release(&key).unwrap(), 0);
        assert!(!store.path_for(&key).exists());
        assert!(store.get(&key).unwrap_err().is_not_found());
        assert!(store.release(&key).unwrap_err().is_not_found());
    }

    #[test]
    fn reopened_blobs_wait_for_reconcile() {
        let dir = tempfile::tempdir().unwrap();
        let (kept, orphan) = {
            let store = open(dir.path());
            (
                store.put(&vec![7u8; 4096]).unwrap(),
                store.put(b"orphan").unwrap(),
            )
        };

        let store = open(dir.path());
        assert_eq!(store.ref_count(&kept), 0);
        assert!(store.get(&kept).unwrap_err().is_not_found());

        let purged = store.reconcile(&HashMap::from([(kept, 2)])).unwrap();
        assert_eq!(purged, 1);
        assert_eq!(store.ref_count(&kept), 2);
        assert_eq!(store.get(&kept).unwrap(), vec![7u8; 4096]);
        assert!(!store.path_for(&orphan).exists());

        let stats = store.stats();
        assert_eq!(stats.count, 1);
        assert_eq!(stats.logical_bytes, 4096);
        assert!(stats.stored_bytes < 4096);
    }

    #[test]
    fn readonly_rejects_writes() {
        let dir = tempfile::tempdir().unwrap();
        let key = open(dir.path()).put(b"data").unwrap();

        let store = FileBlobStore::open(dir.path().join("blobs"), true, 64).unwrap();
        store.reconcile(&HashMap::from([(key, 1)])).unwrap();
        assert_eq!(store.get(&key).unwrap(), b"data");
        assert!(matches!(store.put(b"more"), Err(BlobError::ReadOnly)));
        assert!(matches!(store.release(&key), Err(BlobError::ReadOnly)));
    }

    #[test]
    fn corrupted_file_is_detected() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(dir.path());
        let key = store.put(b"original").unwrap();
        fs::write(store.path_for(&key), b"\0tampered").unwrap();
        assert!(matches!(
            store.get(&key),
            Err(BlobError::Corrupted { .. })
        ));
    }
}
