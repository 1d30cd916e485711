use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use lantern_blob::{BlobStore, FileBlobStore, InMemoryBlobStore};
use lantern_criteria::{compile, Criteria};
use lantern_types::entity::host_of;
use lantern_types::{
    BlobKey, CancelFlag, Entity, EntityId, Message, Metadata, MonotonicClock, NetworkTask,
    Session, SessionId, TaskId, TaskState, Timestamp, Transaction,
};
use parking_lot::{Mutex, MutexGuard, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{OpenOptions, StoreSettings};
use crate::error::{StoreError, StoreResult};
use crate::record::{Change, PruneReport, StoreCounts, TaskOutcome, TaskUpdate, WalRecord};
use crate::snapshot;
use crate::tables::{EntityTables, TablesImage};
use crate::traits::{CommitListener, StoreReader, StoreWriter};
use crate::wal::WriteAheadLog;

/// On-disk format version of a store directory.
pub const STORE_VERSION: u32 = 1;

const MANIFEST_FORMAT: &str = "lantern-store";
const MANIFEST_FILE: &str = "manifest.json";
const WAL_FILE: &str = "entities.wal";
const SNAPSHOT_FILE: &str = "snapshot";
const BLOB_DIR: &str = "blobs";

#[derive(Debug, Serialize, Deserialize)]
struct Manifest {
    format: String,
    version: u32,
    created_at: Timestamp,
}

struct Writer {
    wal: Option<WriteAheadLog>,
    tables: Arc<EntityTables>,
    listeners: Vec<Arc<dyn CommitListener>>,
}

struct ReadView {
    tables: Arc<EntityTables>,
    refreshed_at: Instant,
}

/// The entity store: sessions, messages, network tasks, and transactions.
///
/// # Layout
///
/// ```text
/// <dir>/manifest.json   format marker and store version
/// <dir>/snapshot        last checkpoint of the tables
/// <dir>/entities.wal    mutations since that checkpoint
/// <dir>/blobs/ab/<hex>  payloads, see `FileBlobStore`
/// ```
///
/// All mutations go through one writer mutex: WAL append, table apply,
/// publish, listener notification. Readers work on an `Arc` snapshot of the
/// tables, refreshed lazily from the last published commit without taking
/// the writer mutex.
pub struct EntityStore {
    dir: Option<PathBuf>,
    readonly: bool,
    settings: StoreSettings,
    blobs: Arc<dyn BlobStore>,
    clock: MonotonicClock,
    writer: Mutex<Writer>,
    /// Tables as of the last commit.
    published: RwLock<Arc<EntityTables>>,
    view: RwLock<ReadView>,
    dirty: AtomicBool,
}

impl EntityStore {
    /// Open the store in `dir`.
    pub fn open(
        dir: impl AsRef<Path>,
        options: OpenOptions,
        settings: StoreSettings,
    ) -> StoreResult<Self> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            if !options.create || options.readonly {
                return Err(StoreError::FileDoesntExist(dir.to_path_buf()));
            }
            fs::create_dir_all(dir)?;
        }

        let manifest_path = dir.join(MANIFEST_FILE);
        if !manifest_path.exists() && options.create && !options.readonly {
            write_manifest(&manifest_path)?;
            info!(dir = %dir.display(), "created store");
        }
        let manifest = read_manifest(&manifest_path)?;

        let mut tables = match snapshot::read(&dir.join(SNAPSHOT_FILE))? {
            Some(image) => EntityTables::from_image(image),
            None => EntityTables::new(),
        };
        let wal_path = dir.join(WAL_FILE);
        let replay = WriteAheadLog::replay(&wal_path)?;
        for record in &replay.records {
            tables.apply(record);
        }

        let blobs = FileBlobStore::open(
            dir.join(BLOB_DIR),
            options.readonly,
            settings.compression_threshold,
        )?;
        let purged = blobs.reconcile(&tables.blob_references())?;

        let wal = if options.readonly {
            None
        } else {
            Some(WriteAheadLog::open_at(
                &wal_path,
                settings.sync,
                replay.valid_len,
            )?)
        };

        let counts = tables.counts();
        info!(
            dir = %dir.display(),
            version = manifest.version,
            replayed = replay.records.len(),
            messages = counts.messages,
            tasks = counts.tasks,
            purged_blobs = purged,
            readonly = options.readonly,
            "opened store"
        );

        Ok(Self::assemble(
            Some(dir.to_path_buf()),
            options.readonly,
            settings,
            Arc::new(blobs),
            wal,
            tables,
        ))
    }

    /// A store without files, backed by an in-memory blob store.
    pub fn in_memory() -> Self {
        Self::assemble(
            None,
            false,
            StoreSettings::default(),
            Arc::new(InMemoryBlobStore::new()),
            None,
            EntityTables::new(),
        )
    }

    /// A store without files built from an image, e.g. a decoded archive.
    pub fn from_image(image: TablesImage, blobs: Arc<dyn BlobStore>, readonly: bool) -> Self {
        Self::assemble(
            None,
            readonly,
            StoreSettings::default(),
            blobs,
            None,
            EntityTables::from_image(image),
        )
    }

    fn assemble(
        dir: Option<PathBuf>,
        readonly: bool,
        settings: StoreSettings,
        blobs: Arc<dyn BlobStore>,
        wal: Option<WriteAheadLog>,
        tables: EntityTables,
    ) -> Self {
        let clock = MonotonicClock::new();
        if let Some(last) = tables.last_timestamp() {
            clock.observe(last);
        }
        let tables = Arc::new(tables);
        Self {
            dir,
            readonly,
            settings,
            blobs,
            clock,
            writer: Mutex::new(Writer {
                wal,
                tables: Arc::clone(&tables),
                listeners: Vec::new(),
            }),
            published: RwLock::new(Arc::clone(&tables)),
            view: RwLock::new(ReadView {
                tables,
                refreshed_at: Instant::now(),
            }),
            dirty: AtomicBool::new(false),
        }
    }

    /// Store directory; `None` for in-memory stores.
    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    pub fn is_readonly(&self) -> bool {
        self.readonly
    }

    pub fn settings(&self) -> &StoreSettings {
        &self.settings
    }

    /// The blob store holding this store's payloads.
    pub fn blobs(&self) -> &Arc<dyn BlobStore> {
        &self.blobs
    }

    /// Next writer timestamp.
    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    /// A recent read snapshot of the tables.
    pub fn snapshot(&self) -> Arc<EntityTables> {
        if self.dirty.load(Ordering::SeqCst) {
            let mut view = self.view.write();
            let due = self
                .settings
                .refresh_interval
                .map_or(true, |interval| view.refreshed_at.elapsed() >= interval);
            if due {
                // Cleared before reading, so a commit publishing after this
                // point marks the view dirty again.
                self.dirty.store(false, Ordering::SeqCst);
                view.tables = Arc::clone(&self.published.read());
                view.refreshed_at = Instant::now();
            }
            return Arc::clone(&view.tables);
        }
        Arc::clone(&self.view.read().tables)
    }

    /// Run `f` against the latest committed tables while holding the writer
    /// lock, so no commit can interleave with it.
    pub fn observe<R>(&self, f: impl FnOnce(&EntityTables) -> R) -> R {
        let writer = self.writer.lock();
        f(&writer.tables)
    }

    /// Register a listener notified after every commit.
    pub fn add_listener(&self, listener: Arc<dyn CommitListener>) {
        self.writer.lock().listeners.push(listener);
    }

    // -----------------------------------------------------------------------
    // Writer internals
    // -----------------------------------------------------------------------

    fn lock_writer(&self) -> StoreResult<MutexGuard<'_, Writer>> {
        if self.readonly {
            return Err(StoreError::ReadOnlyViolation);
        }
        Ok(self.writer.lock())
    }

    /// WAL append, table apply, listener notification.
    fn commit(&self, writer: &mut Writer, record: WalRecord) -> StoreResult<Vec<Change>> {
        if let Some(wal) = writer.wal.as_mut() {
            wal.append(&record)?;
        }
        let changes = Arc::make_mut(&mut writer.tables).apply(&record);
        *self.published.write() = Arc::clone(&writer.tables);
        self.dirty.store(true, Ordering::SeqCst);
        for listener in &writer.listeners {
            listener.on_commit(&writer.tables, &changes);
        }
        Ok(changes)
    }

    fn maybe_checkpoint(&self, writer: &mut Writer) {
        let due = writer
            .wal
            .as_ref()
            .is_some_and(|wal| wal.offset() >= self.settings.checkpoint_wal_bytes);
        if due {
            if let Err(e) = self.checkpoint_locked(writer) {
                warn!(error = %e, "automatic checkpoint failed");
            }
        }
    }

    fn checkpoint_locked(&self, writer: &mut Writer) -> StoreResult<()> {
        let (Some(dir), Some(wal)) = (self.dir.as_ref(), writer.wal.as_mut()) else {
            return Ok(());
        };
        snapshot::write(&dir.join(SNAPSHOT_FILE), &writer.tables.to_image())?;
        wal.truncate()?;
        Ok(())
    }

    fn check_session(tables: &EntityTables, id: &SessionId) -> StoreResult<()> {
        let session = tables.session(id).ok_or(StoreError::SessionNotFound(*id))?;
        if session.is_closed() {
            return Err(StoreError::SessionClosed(*id));
        }
        Ok(())
    }

    fn pending_task(tables: &EntityTables, id: &TaskId) -> StoreResult<Arc<NetworkTask>> {
        let task = tables
            .task(id)
            .cloned()
            .ok_or(StoreError::NotFound(EntityId::Task(*id)))?;
        if task.is_terminal() {
            return Err(StoreError::TaskTerminal(*id));
        }
        Ok(task)
    }

    /// Drop one reference per key. Unknown keys are logged, not fatal: the
    /// record referencing them is already gone.
    fn release_blobs(&self, keys: impl IntoIterator<Item = BlobKey>) -> StoreResult<usize> {
        let mut released = 0;
        for key in keys {
            match self.blobs.release(&key) {
                Ok(remaining) => {
                    released += 1;
                    debug!(key = %key.short_hex(), remaining, "released blob");
                }
                Err(e) if e.is_not_found() => {
                    warn!(key = %key.short_hex(), "released blob was already gone");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(released)
    }
}

fn write_manifest(path: &Path) -> StoreResult<()> {
    let manifest = Manifest {
        format: MANIFEST_FORMAT.into(),
        version: STORE_VERSION,
        created_at: chrono::Utc::now(),
    };
    let json = serde_json::to_vec_pretty(&manifest)
        .map_err(|e| StoreError::Serialization(e.to_string()))?;
    fs::write(path, json)?;
    Ok(())
}

fn read_manifest(path: &Path) -> StoreResult<Manifest> {
    let bytes = fs::read(path)
        .map_err(|e| StoreError::StoreInvalid(format!("cannot read {}: {e}", path.display())))?;
    let manifest: Manifest = serde_json::from_slice(&bytes)
        .map_err(|e| StoreError::StoreInvalid(format!("manifest is unreadable: {e}")))?;
    if manifest.format != MANIFEST_FORMAT {
        return Err(StoreError::StoreInvalid(format!(
            "unexpected format '{}'",
            manifest.format
        )));
    }
    if manifest.version > STORE_VERSION {
        return Err(StoreError::StoreInvalid(format!(
            "store version {} is newer than supported version {STORE_VERSION}",
            manifest.version
        )));
    }
    Ok(manifest)
}

impl StoreWriter for EntityStore {
    fn create_session(&self, metadata: Metadata) -> StoreResult<Arc<Session>> {
        let mut w = self.lock_writer()?;
        let session = Session::new(self.clock.now(), metadata);
        let id = session.id;
        self.commit(&mut w, WalRecord::CreateSession(session))?;
        info!(session = %id, "started session");
        w.tables
            .session(&id)
            .cloned()
            .ok_or(StoreError::SessionNotFound(id))
    }

    fn close_session(&self, id: &SessionId) -> StoreResult<Arc<Session>> {
        let mut w = self.lock_writer()?;
        Self::check_session(&w.tables, id)?;
        let closed_at = self.clock.now();
        self.commit(&mut w, WalRecord::CloseSession { id: *id, closed_at })?;
        w.tables
            .session(id)
            .cloned()
            .ok_or(StoreError::SessionNotFound(*id))
    }

    fn insert_message(&self, mut message: Message) -> StoreResult<Arc<Message>> {
        let mut w = self.lock_writer()?;
        Self::check_session(&w.tables, &message.session_id)?;
        message.created_at = self.clock.observe(message.created_at);
        let id = message.id;
        self.commit(&mut w, WalRecord::InsertMessage(message))?;
        self.maybe_checkpoint(&mut w);
        w.tables
            .message(&id)
            .cloned()
            .ok_or(StoreError::NotFound(EntityId::Message(id)))
    }

    fn insert_task(&self, mut task: NetworkTask) -> StoreResult<Arc<NetworkTask>> {
        let mut w = self.lock_writer()?;
        Self::check_session(&w.tables, &task.session_id)?;
        task.created_at = self.clock.observe(task.created_at);
        task.state = TaskState::Pending;
        task.duration = None;
        task.completed_at = None;
        task.error = None;
        if task.host.is_none() {
            task.host = host_of(&task.url);
        }
        let id = task.id;
        self.commit(&mut w, WalRecord::InsertTask(task))?;
        self.maybe_checkpoint(&mut w);
        w.tables
            .task(&id)
            .cloned()
            .ok_or(StoreError::NotFound(EntityId::Task(id)))
    }

    fn append_transaction(
        &self,
        task_id: &TaskId,
        mut transaction: Transaction,
    ) -> StoreResult<Arc<NetworkTask>> {
        let mut w = self.lock_writer()?;
        Self::pending_task(&w.tables, task_id)?;
        transaction.task_id = *task_id;
        self.commit(&mut w, WalRecord::AppendTransaction(transaction))?;
        self.maybe_checkpoint(&mut w);
        w.tables
            .task(task_id)
            .cloned()
            .ok_or(StoreError::NotFound(EntityId::Task(*task_id)))
    }

    fn update_task(&self, task_id: &TaskId, update: TaskUpdate) -> StoreResult<Arc<NetworkTask>> {
        let mut w = self.lock_writer()?;
        let current = Self::pending_task(&w.tables, task_id)?;
        let mut task = (*current).clone();

        if let Some(code) = update.status_code {
            task.status_code = Some(code);
        }
        if let Some(headers) = update.response_headers {
            task.response_headers = headers;
        }
        // The caller hands over one reference with the new key. Either the
        // old body or, when the key is unchanged, that extra reference is
        // surplus once the update commits.
        let mut surplus_body = None;
        if let Some(key) = update.response_body_key {
            surplus_body = if task.response_body_key == Some(key) {
                Some(key)
            } else {
                task.response_body_key.replace(key)
            };
        }
        if let Some(size) = update.response_body_size {
            task.response_body_size = size;
        }
        if let Some(completion) = update.completion {
            let transactions: Vec<Transaction> = w
                .tables
                .transactions(task_id)
                .iter()
                .map(|t| (**t).clone())
                .collect();
            task.duration = Some(task.span(&transactions, completion.completed_at));
            task.completed_at = Some(completion.completed_at);
            match completion.outcome {
                TaskOutcome::Success => task.state = TaskState::Success,
                TaskOutcome::Failure(error) => {
                    task.state = TaskState::Failure;
                    task.error = Some(error);
                }
            }
        }

        self.commit(&mut w, WalRecord::UpdateTask(task))?;
        if let Some(surplus) = surplus_body {
            if let Err(e) = self.release_blobs([surplus]) {
                warn!(task = %task_id, error = %e, "failed to release surplus body reference");
            }
        }
        self.maybe_checkpoint(&mut w);
        w.tables
            .task(task_id)
            .cloned()
            .ok_or(StoreError::NotFound(EntityId::Task(*task_id)))
    }

    fn set_pinned(&self, id: &EntityId, pinned: bool) -> StoreResult<()> {
        let mut w = self.lock_writer()?;
        if w.tables.entity(id).is_none() {
            return Err(StoreError::NotFound(*id));
        }
        if w.tables.is_pinned(id) != pinned {
            self.commit(&mut w, WalRecord::SetPinned { id: *id, pinned })?;
        }
        Ok(())
    }

    fn clear_pins(&self) -> StoreResult<()> {
        let mut w = self.lock_writer()?;
        if !w.tables.pins().is_empty() {
            self.commit(&mut w, WalRecord::ClearPins)?;
        }
        Ok(())
    }

    fn prune(&self, before: Timestamp, cancel: &CancelFlag) -> StoreResult<PruneReport> {
        let candidates: Vec<EntityId> = {
            let w = self.lock_writer()?;
            w.tables.created_before(before).collect()
        };
        let mut report = PruneReport::default();

        for id in candidates {
            if cancel.is_cancelled() {
                info!(removed = report.total(), "prune cancelled");
                return Err(StoreError::Cancelled);
            }
            let mut w = self.writer.lock();
            let Some(entity) = w.tables.entity(&id) else {
                continue;
            };
            self.commit(&mut w, WalRecord::Remove(id))?;
            match &entity {
                Entity::Message(_) => report.messages += 1,
                Entity::Task(task) => {
                    report.tasks += 1;
                    report.blobs_released += self.release_blobs(task.blob_keys())?;
                }
            }
        }

        let mut w = self.writer.lock();
        let active = w.tables.active_session();
        let empty: Vec<SessionId> = w
            .tables
            .sessions()
            .filter(|s| Some(s.id) != active && s.started_at < before)
            .filter(|s| w.tables.session_children(&s.id) == 0)
            .map(|s| s.id)
            .collect();
        for id in empty {
            self.commit(&mut w, WalRecord::RemoveSession(id))?;
            report.sessions += 1;
        }
        self.maybe_checkpoint(&mut w);

        info!(
            messages = report.messages,
            tasks = report.tasks,
            sessions = report.sessions,
            blobs_released = report.blobs_released,
            "pruned store"
        );
        Ok(report)
    }

    fn remove_all(&self) -> StoreResult<PruneReport> {
        let mut w = self.lock_writer()?;
        let before = w.tables.counts();
        let references = w.tables.blob_references();
        self.commit(&mut w, WalRecord::RemoveAll)?;
        let after = w.tables.counts();

        let keys = references
            .into_iter()
            .flat_map(|(key, n)| std::iter::repeat(key).take(n as usize));
        let report = PruneReport {
            messages: before.messages,
            tasks: before.tasks,
            sessions: before.sessions - after.sessions,
            blobs_released: self.release_blobs(keys)?,
        };
        self.maybe_checkpoint(&mut w);
        info!(removed = report.total(), "removed all records");
        Ok(report)
    }

    fn checkpoint(&self) -> StoreResult<()> {
        let mut w = self.lock_writer()?;
        self.checkpoint_locked(&mut w)
    }
}

impl StoreReader for EntityStore {
    fn query(&self, criteria: &Criteria) -> StoreResult<Vec<EntityId>> {
        let plan = compile(criteria)?;
        Ok(self.snapshot().query(&plan))
    }

    fn fetch(&self, id: &EntityId) -> StoreResult<Entity> {
        self.snapshot().entity(id).ok_or(StoreError::NotFound(*id))
    }

    fn session(&self, id: &SessionId) -> StoreResult<Arc<Session>> {
        self.snapshot()
            .session(id)
            .cloned()
            .ok_or(StoreError::SessionNotFound(*id))
    }

    fn sessions(&self) -> Vec<Arc<Session>> {
        self.snapshot().sessions().cloned().collect()
    }

    fn current_session(&self) -> Option<SessionId> {
        self.snapshot().active_session()
    }

    fn transactions(&self, task_id: &TaskId) -> StoreResult<Vec<Arc<Transaction>>> {
        let tables = self.snapshot();
        if tables.task(task_id).is_none() {
            return Err(StoreError::NotFound(EntityId::Task(*task_id)));
        }
        Ok(tables.transactions(task_id).to_vec())
    }

    fn labels(&self) -> Vec<(String, usize)> {
        self.snapshot()
            .labels()
            .map(|(l, n)| (l.to_string(), n))
            .collect()
    }

    fn hosts(&self) -> Vec<(String, usize)> {
        self.snapshot()
            .hosts()
            .map(|(h, n)| (h.to_string(), n))
            .collect()
    }

    fn counts(&self) -> StoreCounts {
        self.snapshot().counts()
    }

    fn pins(&self) -> Vec<EntityId> {
        let mut pins: Vec<EntityId> = self.snapshot().pins().iter().copied().collect();
        pins.sort();
        pins
    }
}

impl std::fmt::Debug for EntityStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityStore")
            .field("dir", &self.dir)
            .field("readonly", &self.readonly)
            .finish_non_exhaustive()
    }
}
