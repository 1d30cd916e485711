use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use lantern_blob::{codec, BlobStore};
use lantern_criteria::{compile, Criteria};
use lantern_store::{EntityStore, EntityTables, STORE_VERSION};
use lantern_types::{BlobKey, CancelFlag, Entity, EntityId, Session};
use tracing::{debug, info, warn};

use crate::error::{ArchiveError, ArchiveResult};
use crate::format::{
    DatabaseRecord, DocumentIndex, DocumentInfo, Footer, Section, CURRENT_SCHEMA, HEADER_MAGIC,
    SCHEMA_V1,
};

/// How a document is written.
#[derive(Clone, Debug)]
pub struct ExportOptions {
    /// Free-form application info copied into the document.
    pub app_info: BTreeMap<String, String>,
    /// Embed the payloads referenced by exported tasks.
    pub include_blobs: bool,
    /// zstd level of the database section.
    pub compression_level: i32,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            app_info: BTreeMap::new(),
            include_blobs: true,
            compression_level: 3,
        }
    }
}

/// Result of a finished export.
#[derive(Clone, Debug)]
pub struct ExportReport {
    pub path: PathBuf,
    pub info: DocumentInfo,
    /// Size of the document file.
    pub bytes: u64,
}

/// Export the store's current read snapshot into a document at `path`.
///
/// With `criteria`, only matching messages and tasks are written, along with
/// their sessions, the transactions of written tasks, and their pins. The
/// document is built in a temp file next to `path` and renamed into place;
/// on error or cancellation nothing is left at the destination.
pub fn export(
    store: &EntityStore,
    criteria: Option<&Criteria>,
    path: &Path,
    options: &ExportOptions,
    cancel: &CancelFlag,
) -> ArchiveResult<ExportReport> {
    let dir = destination_dir(path)?;
    let tables = store.snapshot();
    let selection = Selection::collect(&tables, criteria)?;
    let blobs: &dyn BlobStore = store.blobs().as_ref();
    let blob_keys = if options.include_blobs {
        selection.available_blobs(blobs)
    } else {
        Vec::new()
    };

    let info = DocumentInfo {
        schema_version: CURRENT_SCHEMA,
        store_version: STORE_VERSION,
        created_at: chrono::Utc::now(),
        session_count: selection.sessions.len(),
        message_count: selection.message_count,
        task_count: selection.task_count,
        transaction_count: selection.transaction_count,
        blob_count: blob_keys.len(),
        total_blob_bytes: blob_keys.iter().filter_map(|k| blobs.size(k)).sum(),
        app_info: options.app_info.clone(),
        filter: criteria.map(Criteria::summary),
    };

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    let bytes = {
        let mut out = BufWriter::new(tmp.as_file_mut());
        let bytes = write_document(
            &mut out,
            &info,
            &selection,
            &tables,
            blobs,
            &blob_keys,
            store.settings().compression_threshold,
            options.compression_level,
            cancel,
        )?;
        out.flush()?;
        bytes
    };
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| ArchiveError::Io(e.error))?;

    info!(
        path = %path.display(),
        messages = info.message_count,
        tasks = info.task_count,
        blobs = info.blob_count,
        bytes,
        "exported document"
    );
    Ok(ExportReport {
        path: path.to_path_buf(),
        info,
        bytes,
    })
}

fn destination_dir(path: &Path) -> ArchiveResult<&Path> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    if !dir.is_dir() {
        return Err(ArchiveError::FileDoesntExist(dir.to_path_buf()));
    }
    Ok(dir)
}

// ---------------------------------------------------------------------------
// Selection
// ---------------------------------------------------------------------------

/// What an export writes, oldest first.
pub(crate) struct Selection {
    sessions: Vec<Arc<Session>>,
    entities: Vec<Entity>,
    pins: Vec<EntityId>,
    message_count: usize,
    task_count: usize,
    transaction_count: usize,
}

impl Selection {
    pub(crate) fn collect(tables: &EntityTables, criteria: Option<&Criteria>) -> ArchiveResult<Self> {
        let ids: Vec<EntityId> = match criteria {
            Some(criteria) => {
                let plan = compile(criteria)?;
                let matched: HashSet<EntityId> = tables.query(&plan).into_iter().collect();
                tables.timeline().filter(|id| matched.contains(id)).collect()
            }
            None => tables.timeline().collect(),
        };
        let entities: Vec<Entity> = ids.iter().filter_map(|id| tables.entity(id)).collect();

        let sessions = match criteria {
            Some(_) => {
                let used: BTreeSet<_> = entities.iter().map(Entity::session_id).collect();
                tables.sessions().filter(|s| used.contains(&s.id)).cloned().collect()
            }
            None => tables.sessions().cloned().collect(),
        };
        let mut pins: Vec<EntityId> = ids.iter().filter(|id| tables.is_pinned(id)).copied().collect();
        pins.sort();

        let mut message_count = 0;
        let mut task_count = 0;
        let mut transaction_count = 0;
        for entity in &entities {
            match entity {
                Entity::Message(_) => message_count += 1,
                Entity::Task(task) => {
                    task_count += 1;
                    transaction_count += tables.transactions(&task.id).len();
                }
            }
        }

        Ok(Self {
            sessions,
            entities,
            pins,
            message_count,
            task_count,
            transaction_count,
        })
    }

    /// Keys referenced by selected tasks that the blob store still holds,
    /// sorted.
    fn available_blobs(&self, blobs: &dyn BlobStore) -> Vec<BlobKey> {
        let referenced: BTreeSet<BlobKey> = self
            .entities
            .iter()
            .filter_map(|e| match e {
                Entity::Task(task) => Some(task.blob_keys()),
                Entity::Message(_) => None,
            })
            .flatten()
            .collect();
        referenced
            .into_iter()
            .filter(|key| {
                let present = blobs.contains(key);
                if !present {
                    warn!(key = %key.short_hex(), "referenced blob is missing; not exported");
                }
                present
            })
            .collect()
    }

    fn record_count(&self) -> usize {
        self.sessions.len() + self.entities.len() + self.transaction_count + self.pins.len()
    }
}

// ---------------------------------------------------------------------------
// Document writer
// ---------------------------------------------------------------------------

/// Tracks the file position, the document digest, and the running CRC of
/// the current section.
struct DocumentWriter<W: Write> {
    inner: W,
    position: u64,
    digest: blake3::Hasher,
    crc: crc32fast::Hasher,
}

impl<W: Write> DocumentWriter<W> {
    fn new(inner: W) -> Self {
        Self {
            inner,
            position: 0,
            digest: blake3::Hasher::new(),
            crc: crc32fast::Hasher::new(),
        }
    }

    fn begin_section(&mut self) -> u64 {
        self.crc = crc32fast::Hasher::new();
        self.position
    }

    fn end_section(&mut self, offset: u64, raw_len: u64) -> Section {
        let crc = std::mem::replace(&mut self.crc, crc32fast::Hasher::new());
        Section {
            offset,
            len: self.position - offset,
            crc32: crc.finalize(),
            raw_len,
        }
    }

    fn write_section(&mut self, bytes: &[u8], raw_len: u64) -> io::Result<Section> {
        let offset = self.begin_section();
        self.write_all(bytes)?;
        Ok(self.end_section(offset, raw_len))
    }
}

impl<W: Write> Write for DocumentWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.position += n as u64;
        self.digest.update(&buf[..n]);
        self.crc.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Write a full document. Returns the number of bytes written.
#[allow(clippy::too_many_arguments)]
pub(crate) fn write_document<W: Write>(
    out: W,
    info: &DocumentInfo,
    selection: &Selection,
    tables: &EntityTables,
    blobs: &dyn BlobStore,
    blob_keys: &[BlobKey],
    compression_threshold: usize,
    compression_level: i32,
    cancel: &CancelFlag,
) -> ArchiveResult<u64> {
    if info.schema_version == SCHEMA_V1 && !blob_keys.is_empty() {
        return Err(ArchiveError::Unknown(
            "schema 1 documents cannot embed blobs".into(),
        ));
    }
    let mut out = DocumentWriter::new(out);
    out.write_all(HEADER_MAGIC)?;
    out.write_all(&info.schema_version.to_be_bytes())?;

    let info_json =
        serde_json::to_vec(info).map_err(|e| ArchiveError::Serialization(e.to_string()))?;
    let info_section = out.write_section(&info_json, info_json.len() as u64)?;

    let database = write_database(&mut out, selection, tables, compression_level, cancel)?;

    let mut blob_sections = Vec::with_capacity(blob_keys.len());
    for key in blob_keys {
        if cancel.is_cancelled() {
            return Err(ArchiveError::Cancelled);
        }
        let data = blobs.get(key)?;
        let encoded = codec::encode(&data, compression_threshold)?;
        let section = out.write_section(&encoded, data.len() as u64)?;
        debug!(key = %key.short_hex(), stored = section.len, "wrote blob section");
        blob_sections.push((*key, section));
    }

    let index = DocumentIndex {
        info: info_section,
        database,
        blobs: blob_sections,
    };
    let index_bytes =
        bincode::serialize(&index).map_err(|e| ArchiveError::Serialization(e.to_string()))?;
    let index_offset = out.position;
    out.write_all(&index_bytes)?;

    let footer = Footer {
        index_offset,
        index_len: index_bytes.len() as u64,
        digest: *out.digest.finalize().as_bytes(),
    };
    out.write_all(&footer.to_bytes())?;
    out.flush()?;
    Ok(out.position)
}

fn write_database<W: Write>(
    out: &mut DocumentWriter<W>,
    selection: &Selection,
    tables: &EntityTables,
    level: i32,
    cancel: &CancelFlag,
) -> ArchiveResult<Section> {
    let offset = out.begin_section();
    let mut raw_len = 0u64;
    let mut encoder = zstd::Encoder::new(&mut *out, level)?;

    let mut put = |record: DatabaseRecord| -> ArchiveResult<()> {
        if cancel.is_cancelled() {
            return Err(ArchiveError::Cancelled);
        }
        let payload =
            bincode::serialize(&record).map_err(|e| ArchiveError::Serialization(e.to_string()))?;
        let len = u32::try_from(payload.len())
            .map_err(|_| ArchiveError::Serialization("record exceeds 4 GiB".into()))?;
        encoder.write_all(&len.to_be_bytes())?;
        encoder.write_all(&payload)?;
        raw_len += 4 + payload.len() as u64;
        Ok(())
    };

    for session in &selection.sessions {
        put(DatabaseRecord::Session((**session).clone()))?;
    }
    for entity in &selection.entities {
        match entity {
            Entity::Message(message) => put(DatabaseRecord::Message((**message).clone()))?,
            Entity::Task(task) => {
                put(DatabaseRecord::Task((**task).clone()))?;
                for transaction in tables.transactions(&task.id) {
                    put(DatabaseRecord::Transaction((**transaction).clone()))?;
                }
            }
        }
    }
    for pin in &selection.pins {
        put(DatabaseRecord::Pin(*pin))?;
    }

    encoder.finish()?;
    debug!(records = selection.record_count(), raw_len, "wrote database section");
    Ok(out.end_section(offset, raw_len))
}
