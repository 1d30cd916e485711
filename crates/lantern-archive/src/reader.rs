use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use lantern_blob::{codec, InMemoryBlobStore};
use lantern_store::{EntityStore, TablesImage};
use lantern_types::BlobKey;
use memmap2::Mmap;
use parking_lot::Mutex;
use tracing::{debug, error, info};

use crate::error::{ArchiveError, ArchiveResult};
use crate::format::{
    parse_header, DatabaseRecord, DocumentIndex, DocumentInfo, Footer, Section, FOOTER_SIZE,
    HEADER_SIZE, SCHEMA_V1,
};

struct OpenDocument {
    map: Arc<Mmap>,
    schema: u32,
    info: DocumentInfo,
    index: DocumentIndex,
    blobs: BTreeMap<BlobKey, Section>,
    index_offset: usize,
    digest: [u8; 32],
}

/// An open archive document.
///
/// The file is memory-mapped; sections are read and checked on access, so
/// opening a large document costs only its header, footer, index, and info.
pub struct DocumentHandle {
    path: PathBuf,
    inner: Mutex<Option<OpenDocument>>,
}

/// Summary of a successful [`DocumentHandle::verify`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VerifyReport {
    pub sections: usize,
    pub records: usize,
    pub blobs: usize,
}

/// Open the document at `path`.
pub fn open(path: impl AsRef<Path>) -> ArchiveResult<DocumentHandle> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        if !parent.is_dir() {
            return Err(ArchiveError::FileDoesntExist(parent.to_path_buf()));
        }
    }
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(ArchiveError::FileDoesntExist(path.to_path_buf()));
        }
        Err(e) => return Err(e.into()),
    };
    // SAFETY: the mapping is read-only and documents are written once, to a
    // temp file renamed into place, so the mapped bytes are not modified.
    let map = unsafe { Mmap::map(&file)? };
    let document = OpenDocument::parse(Arc::new(map))?;
    info!(
        path = %path.display(),
        schema = document.schema,
        messages = document.info.message_count,
        tasks = document.info.task_count,
        blobs = document.blobs.len(),
        "opened document"
    );
    Ok(DocumentHandle {
        path: path.to_path_buf(),
        inner: Mutex::new(Some(document)),
    })
}

impl OpenDocument {
    fn parse(map: Arc<Mmap>) -> ArchiveResult<Self> {
        let bytes: &[u8] = &map;
        if bytes.len() < HEADER_SIZE + FOOTER_SIZE {
            return Err(ArchiveError::StoreInvalid("file is too short".into()));
        }
        let schema = parse_header(bytes)?;
        let footer = Footer::from_bytes(&bytes[bytes.len() - FOOTER_SIZE..])?;

        let footer_start = bytes.len() - FOOTER_SIZE;
        let index_range = usize::try_from(footer.index_offset)
            .ok()
            .zip(usize::try_from(footer.index_len).ok())
            .and_then(|(start, len)| start.checked_add(len).map(|end| start..end))
            .filter(|r| r.start >= HEADER_SIZE && r.end == footer_start)
            .ok_or_else(|| ArchiveError::StoreInvalid("index location is invalid".into()))?;
        let index_offset = index_range.start;
        let index: DocumentIndex = bincode::deserialize(&bytes[index_range])
            .map_err(|e| ArchiveError::StoreInvalid(format!("index cannot be decoded: {e}")))?;

        let info_bytes = index
            .info
            .range(index_offset)
            .map_err(|e| ArchiveError::StoreInvalid(e.to_string()))?;
        let info_bytes = &bytes[info_bytes];
        index
            .info
            .check(info_bytes)
            .map_err(|e| ArchiveError::StoreInvalid(e.to_string()))?;
        let info: DocumentInfo = serde_json::from_slice(info_bytes)
            .map_err(|e| ArchiveError::StoreInvalid(format!("info cannot be decoded: {e}")))?;

        if info.schema_version != schema {
            return Err(ArchiveError::Corrupted(format!(
                "header schema {schema} disagrees with info schema {}",
                info.schema_version
            )));
        }
        if schema == SCHEMA_V1 && !index.blobs.is_empty() {
            return Err(ArchiveError::Corrupted(
                "schema 1 document lists blob sections".into(),
            ));
        }
        let blobs = index.blobs.iter().copied().collect();

        Ok(Self {
            map,
            schema,
            info,
            index,
            blobs,
            index_offset,
            digest: footer.digest,
        })
    }

    fn section(&self, section: &Section) -> ArchiveResult<&[u8]> {
        let range = section.range(self.index_offset)?;
        let bytes = &self.map[range];
        section.check(bytes)?;
        Ok(bytes)
    }

    fn records(&self) -> ArchiveResult<RecordIter> {
        let range = self.index.database.range(self.index_offset)?;
        self.index.database.check(&self.map[range.clone()])?;
        let slice = MapSlice {
            map: Arc::clone(&self.map),
            pos: range.start,
            end: range.end,
        };
        RecordIter::new(slice, self.index.database.raw_len)
    }

    fn blob(&self, key: &BlobKey) -> ArchiveResult<Vec<u8>> {
        let section = self.blobs.get(key).ok_or(ArchiveError::NotFound(*key))?;
        let encoded = self.section(section)?;
        Ok(codec::decode(key, encoded)?)
    }
}

impl DocumentHandle {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().is_none()
    }

    fn with<R>(&self, f: impl FnOnce(&OpenDocument) -> ArchiveResult<R>) -> ArchiveResult<R> {
        let guard = self.inner.lock();
        match guard.as_ref() {
            Some(document) => f(document),
            None => {
                error!(path = %self.path.display(), "document accessed after close");
                Err(ArchiveError::Unknown(format!(
                    "document {} is closed",
                    self.path.display()
                )))
            }
        }
    }

    pub fn schema_version(&self) -> ArchiveResult<u32> {
        self.with(|d| Ok(d.schema))
    }

    pub fn info(&self) -> ArchiveResult<DocumentInfo> {
        self.with(|d| Ok(d.info.clone()))
    }

    /// The decompressed database section.
    pub fn database(&self) -> ArchiveResult<Vec<u8>> {
        self.with(|d| {
            let compressed = d.section(&d.index.database)?;
            let raw = zstd::decode_all(compressed)
                .map_err(|e| ArchiveError::Corrupted(format!("database decompression failed: {e}")))?;
            if raw.len() as u64 != d.index.database.raw_len {
                return Err(ArchiveError::Corrupted(format!(
                    "database is {} bytes, expected {}",
                    raw.len(),
                    d.index.database.raw_len
                )));
            }
            Ok(raw)
        })
    }

    /// Decode database records one at a time.
    ///
    /// The iterator keeps the mapping alive on its own; closing the handle
    /// does not invalidate it.
    pub fn records(&self) -> ArchiveResult<RecordIter> {
        self.with(OpenDocument::records)
    }

    pub fn blob(&self, key: &BlobKey) -> ArchiveResult<Vec<u8>> {
        self.with(|d| d.blob(key))
    }

    /// Keys of embedded blobs, sorted.
    pub fn blob_keys(&self) -> ArchiveResult<Vec<BlobKey>> {
        self.with(|d| Ok(d.blobs.keys().copied().collect()))
    }

    /// Check the document digest, every section checksum, every record, and
    /// every blob's content hash.
    pub fn verify(&self) -> ArchiveResult<VerifyReport> {
        self.with(|d| {
            let footer_start = d.map.len() - FOOTER_SIZE;
            let actual = blake3::hash(&d.map[..footer_start]);
            if actual.as_bytes() != &d.digest {
                return Err(ArchiveError::Corrupted("document digest mismatch".into()));
            }

            let mut records = 0;
            for record in d.records()? {
                record?;
                records += 1;
            }
            for key in d.blobs.keys() {
                d.blob(key)?;
            }
            debug!(records, blobs = d.blobs.len(), "verified document");
            Ok(VerifyReport {
                sections: 2 + d.blobs.len(),
                records,
                blobs: d.blobs.len(),
            })
        })
    }

    /// Materialize the document as a read-only in-memory store.
    pub fn load_store(&self) -> ArchiveResult<EntityStore> {
        self.with(|d| {
            let mut image = TablesImage::default();
            for record in d.records()? {
                match record? {
                    DatabaseRecord::Session(s) => image.sessions.push(s),
                    DatabaseRecord::Message(m) => image.messages.push(m),
                    DatabaseRecord::Task(t) => image.tasks.push(t),
                    DatabaseRecord::Transaction(t) => image.transactions.push(t),
                    DatabaseRecord::Pin(id) => image.pins.push(id),
                }
            }

            let mut refs: HashMap<BlobKey, u64> = HashMap::new();
            for key in image.tasks.iter().flat_map(|t| t.blob_keys()) {
                *refs.entry(key).or_default() += 1;
            }
            let blobs = InMemoryBlobStore::new();
            for (key, section) in &d.blobs {
                let count = refs.get(key).copied().unwrap_or(0);
                blobs.insert_encoded(*key, d.section(section)?.to_vec(), count)?;
            }
            Ok(EntityStore::from_image(image, Arc::new(blobs), true))
        })
    }

    /// Release the mapping. Idempotent.
    pub fn close(&self) {
        if self.inner.lock().take().is_some() {
            debug!(path = %self.path.display(), "closed document");
        }
    }
}

impl std::fmt::Debug for DocumentHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentHandle")
            .field("path", &self.path)
            .field("closed", &self.is_closed())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Record iterator
// ---------------------------------------------------------------------------

/// `Read` over a range of a shared mapping.
pub struct MapSlice {
    map: Arc<Mmap>,
    pos: usize,
    end: usize,
}

impl Read for MapSlice {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = buf.len().min(self.end - self.pos);
        buf[..n].copy_from_slice(&self.map[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

/// Lazily decoded records of a database section.
pub struct RecordIter {
    decoder: zstd::Decoder<'static, io::BufReader<MapSlice>>,
    /// Decompressed bytes the index says are left.
    remaining: u64,
    done: bool,
}

impl RecordIter {
    fn new(slice: MapSlice, raw_len: u64) -> ArchiveResult<Self> {
        Ok(Self {
            decoder: zstd::Decoder::new(slice)?,
            remaining: raw_len,
            done: false,
        })
    }

    fn next_record(&mut self) -> ArchiveResult<Option<DatabaseRecord>> {
        let mut prefix = [0u8; 4];
        let mut filled = 0;
        while filled < prefix.len() {
            let n = self.decoder.read(&mut prefix[filled..])?;
            if n == 0 {
                if filled == 0 {
                    return Ok(None);
                }
                return Err(ArchiveError::Corrupted("truncated record length".into()));
            }
            filled += n;
        }
        let len = u32::from_be_bytes(prefix) as usize;
        let framed = 4 + len as u64;
        if framed > self.remaining {
            return Err(ArchiveError::Corrupted(format!(
                "record of {len} bytes overruns the database section ({} bytes left)",
                self.remaining
            )));
        }
        self.remaining -= framed;
        let mut payload = vec![0u8; len];
        self.decoder.read_exact(&mut payload).map_err(|e| {
            ArchiveError::Corrupted(format!("truncated record of {len} bytes: {e}"))
        })?;
        let record = bincode::deserialize(&payload)
            .map_err(|e| ArchiveError::Corrupted(format!("record cannot be decoded: {e}")))?;
        Ok(Some(record))
    }
}

impl Iterator for RecordIter {
    type Item = ArchiveResult<DatabaseRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_record() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn mapped(bytes: &[u8]) -> (tempfile::TempDir, Arc<Mmap>) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("section");
        File::create(&path).unwrap().write_all(bytes).unwrap();
        let file = File::open(&path).unwrap();
        let map = unsafe { Mmap::map(&file).unwrap() };
        (dir, Arc::new(map))
    }

    #[test]
    fn oversized_record_length_is_corruption() {
        let mut raw = u32::MAX.to_be_bytes().to_vec();
        raw.extend_from_slice(b"tiny");
        let compressed = zstd::encode_all(&raw[..], 0).unwrap();
        let (_dir, map) = mapped(&compressed);
        let slice = MapSlice {
            end: map.len(),
            map,
            pos: 0,
        };

        let mut records = RecordIter::new(slice, raw.len() as u64).unwrap();
        assert!(matches!(records.next(), Some(Err(ArchiveError::Corrupted(_)))));
        assert!(records.next().is_none());
    }
}
