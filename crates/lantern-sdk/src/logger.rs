use std::collections::HashMap;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use lantern_archive::{ArchiveError, DocumentHandle, ExportOptions};
use lantern_criteria::Criteria;
use lantern_live::{LiveRegistry, Subscription};
use lantern_store::{
    EntityStore, OpenOptions, PruneReport, StoreCounts, StoreError, StoreReader, StoreWriter,
    TaskOutcome, TaskUpdate,
};
use lantern_types::{
    BlobKey, CancelFlag, Entity, EntityId, LogLevel, Message, Metadata, NetworkTask, Session,
    SessionId, SourceLocation, TaskError, TaskId, Timestamp, Transaction,
};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{retention_cutoff, StoreConfig};
use crate::error::{SdkError, SdkResult};
use crate::producer::{NetworkRequest, NetworkResponse, TaskMetrics};
use crate::share::{write_text, ShareOptions, ShareOutput};

/// Label of the message recorded for every completed task.
pub const NETWORK_LABEL: &str = "network";

static SHARED: OnceCell<Arc<LoggerStore>> = OnceCell::new();

/// Store statistics for display.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StoreInfo {
    pub dir: Option<PathBuf>,
    pub readonly: bool,
    pub counts: StoreCounts,
    pub current_session: Option<SessionId>,
    pub blob_count: usize,
    /// Blob bytes on disk, after compression.
    pub blob_stored_bytes: u64,
    pub blob_logical_bytes: u64,
}

/// Result of [`LoggerStore::export`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShareReport {
    pub path: PathBuf,
    pub output: ShareOutput,
    /// Messages and tasks written.
    pub records: usize,
    pub bytes: u64,
}

/// The logger store: records messages and network tasks into an entity
/// store, and reads, subscribes to, and exports them.
///
/// Writable stores own a session created on open; every record produced
/// through this handle belongs to it.
pub struct LoggerStore {
    store: Arc<EntityStore>,
    live: Arc<LiveRegistry>,
    session: Option<SessionId>,
    config: StoreConfig,
    /// Response bodies received so far, by pending task.
    bodies: Mutex<HashMap<TaskId, Vec<u8>>>,
}

impl LoggerStore {
    /// Open (or create) the store in `dir`.
    ///
    /// A writable store closes sessions left open by a previous run, starts a
    /// new session carrying `config.app_info`, and sweeps records older than
    /// `config.max_age_days`.
    pub fn open(dir: impl AsRef<Path>, options: OpenOptions, config: StoreConfig) -> SdkResult<Self> {
        if let Some(days) = config.max_age_days {
            retention_cutoff(days, Utc::now())?;
        }
        let store = EntityStore::open(dir, options, config.settings())?;
        let logger = Self::start(store, config)?;
        if !logger.store.is_readonly() {
            logger.sweep(&CancelFlag::new())?;
        }
        Ok(logger)
    }

    /// A store without files.
    pub fn in_memory(config: StoreConfig) -> SdkResult<Self> {
        Self::start(EntityStore::in_memory(), config)
    }

    /// A read-only view of an archive document.
    pub fn from_archive(path: impl AsRef<Path>) -> SdkResult<Self> {
        let document = lantern_archive::open(path)?;
        let store = document.load_store()?;
        document.close();
        Self::start(store, StoreConfig::default())
    }

    fn start(store: EntityStore, config: StoreConfig) -> SdkResult<Self> {
        let live = LiveRegistry::attach(&store);
        let session = if store.is_readonly() {
            None
        } else {
            for stale in store.sessions().iter().filter(|s| !s.is_closed()) {
                store.close_session(&stale.id)?;
                debug!(session = %stale.id, "closed stale session");
            }
            let session = store.create_session(config.app_info.clone())?;
            info!(session = %session.id, "started session");
            Some(session.id)
        };
        Ok(Self {
            store: Arc::new(store),
            live,
            session,
            config,
            bodies: Mutex::new(HashMap::new()),
        })
    }

    /// The session this handle records into; `None` when read-only.
    pub fn session_id(&self) -> Option<SessionId> {
        self.session
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// The underlying entity store.
    pub fn store(&self) -> &Arc<EntityStore> {
        &self.store
    }

    fn active_session(&self) -> SdkResult<SessionId> {
        self.session
            .ok_or(SdkError::Store(StoreError::ReadOnlyViolation))
    }

    // ---- Producer ----

    pub fn record_message(
        &self,
        label: &str,
        level: LogLevel,
        text: &str,
        metadata: Metadata,
        source: Option<SourceLocation>,
    ) -> SdkResult<Arc<Message>> {
        let session = self.active_session()?;
        let mut message = Message::new(session, Utc::now(), label, level, text).with_metadata(metadata);
        message.source = source;
        Ok(self.store.insert_message(message)?)
    }

    /// Record a task when its request is sent. The request body, if any, is
    /// stored as a blob before the task is inserted.
    pub fn record_task_created(&self, request: NetworkRequest) -> SdkResult<Arc<NetworkTask>> {
        let session = self.active_session()?;
        let mut task = NetworkTask::new(session, Utc::now(), request.method, request.url);
        task.task_type = request.task_type;
        task.request_headers = request.headers;
        let body_key = match request.body.as_deref().filter(|b| !b.is_empty()) {
            Some(body) => {
                task.request_body_size = body.len() as u64;
                Some(self.store.blobs().put(body)?)
            }
            None => None,
        };
        task.request_body_key = body_key;

        match self.store.insert_task(task) {
            Ok(task) => {
                debug!(task = %task.id, url = %task.url, "task created");
                Ok(task)
            }
            Err(e) => {
                self.release_unowned(body_key);
                Err(e.into())
            }
        }
    }

    /// Record a response head and/or a chunk of the response body.
    ///
    /// Chunks are buffered until the task completes.
    pub fn record_task_data_received(
        &self,
        task_id: &TaskId,
        response: Option<&NetworkResponse>,
        chunk: &[u8],
    ) -> SdkResult<()> {
        self.pending_task(task_id)?;
        if let Some(response) = response {
            let update = TaskUpdate {
                status_code: Some(response.status_code),
                response_headers: Some(response.headers.clone()),
                ..TaskUpdate::default()
            };
            self.store
                .update_task(task_id, update)
                .map_err(|e| lifecycle_error(*task_id, e))?;
        }
        if !chunk.is_empty() {
            self.bodies
                .lock()
                .entry(*task_id)
                .or_default()
                .extend_from_slice(chunk);
        }
        Ok(())
    }

    /// Complete a task: store its response body, append its transactions,
    /// settle its state, and record a linked `network` message.
    ///
    /// `error` marks the task failed.
    pub fn record_task_completed(
        &self,
        task_id: &TaskId,
        metrics: TaskMetrics,
        error: Option<TaskError>,
    ) -> SdkResult<Arc<NetworkTask>> {
        self.pending_task(task_id)?;
        let body = self.bodies.lock().remove(task_id).unwrap_or_default();
        let body_key = if body.is_empty() {
            None
        } else {
            Some(self.store.blobs().put(&body)?)
        };

        let transactions: Vec<Transaction> = metrics
            .transactions
            .into_iter()
            .map(|m| m.into_transaction(*task_id))
            .collect();
        let last_response = transactions.iter().rev().find_map(|t| t.response.clone());
        for transaction in transactions {
            if let Err(e) = self.store.append_transaction(task_id, transaction) {
                self.release_unowned(body_key);
                return Err(lifecycle_error(*task_id, e));
            }
        }

        let failed = error.is_some();
        let outcome = match error {
            Some(error) => TaskOutcome::Failure(error),
            None => TaskOutcome::Success,
        };
        let mut update = TaskUpdate::complete(outcome, Utc::now());
        if let Some(response) = last_response {
            update.status_code = Some(response.status_code);
            update.response_headers = Some(response.headers);
        }
        if body_key.is_some() {
            update.response_body_key = body_key;
            update.response_body_size = Some(body.len() as u64);
        }
        let task = match self.store.update_task(task_id, update) {
            Ok(task) => task,
            Err(e) => {
                self.release_unowned(body_key);
                return Err(lifecycle_error(*task_id, e));
            }
        };

        let level = if failed { LogLevel::Error } else { LogLevel::Debug };
        let message = Message::new(task.session_id, Utc::now(), NETWORK_LABEL, level, summary(&task))
            .linked_to(task.id);
        self.store.insert_message(message)?;
        debug!(task = %task.id, state = ?task.state, "task completed");
        Ok(task)
    }

    fn pending_task(&self, task_id: &TaskId) -> SdkResult<Arc<NetworkTask>> {
        let task = match self.store.fetch(&EntityId::Task(*task_id)) {
            Ok(Entity::Task(task)) => task,
            Ok(Entity::Message(_)) => return Err(SdkError::TaskNotFound(*task_id)),
            Err(e) => return Err(lifecycle_error(*task_id, e)),
        };
        if task.is_terminal() {
            return Err(SdkError::TaskAlreadyCompleted(*task_id));
        }
        Ok(task)
    }

    /// Drop the reference taken for a record that was never committed.
    fn release_unowned(&self, key: Option<BlobKey>) {
        if let Some(key) = key {
            if let Err(e) = self.store.blobs().release(&key) {
                warn!(key = %key.short_hex(), error = %e, "failed to release uncommitted blob");
            }
        }
    }

    // ---- Reading ----

    pub fn query(&self, criteria: &Criteria) -> SdkResult<Vec<EntityId>> {
        Ok(self.store.query(criteria)?)
    }

    pub fn fetch(&self, id: &EntityId) -> SdkResult<Entity> {
        Ok(self.store.fetch(id)?)
    }

    /// Live query: a snapshot of matching records, then deltas.
    pub fn subscribe(&self, criteria: &Criteria) -> SdkResult<Subscription> {
        Ok(self.live.subscribe(&self.store, criteria)?)
    }

    pub fn transactions(&self, task_id: &TaskId) -> SdkResult<Vec<Arc<Transaction>>> {
        Ok(self.store.transactions(task_id)?)
    }

    pub fn blob(&self, key: &BlobKey) -> SdkResult<Vec<u8>> {
        Ok(self.store.blobs().get(key)?)
    }

    pub fn sessions(&self) -> Vec<Arc<Session>> {
        self.store.sessions()
    }

    pub fn labels(&self) -> Vec<(String, usize)> {
        self.store.labels()
    }

    pub fn hosts(&self) -> Vec<(String, usize)> {
        self.store.hosts()
    }

    pub fn pins(&self) -> Vec<EntityId> {
        self.store.pins()
    }

    pub fn set_pinned(&self, id: &EntityId, pinned: bool) -> SdkResult<()> {
        Ok(self.store.set_pinned(id, pinned)?)
    }

    pub fn clear_pins(&self) -> SdkResult<()> {
        Ok(self.store.clear_pins()?)
    }

    pub fn info(&self) -> StoreInfo {
        let blobs = self.store.blobs().stats();
        StoreInfo {
            dir: self.store.dir().map(Path::to_path_buf),
            readonly: self.store.is_readonly(),
            counts: self.store.counts(),
            current_session: self.store.current_session(),
            blob_count: blobs.count,
            blob_stored_bytes: blobs.stored_bytes,
            blob_logical_bytes: blobs.logical_bytes,
        }
    }

    // ---- Archive ----

    pub fn open_archive(path: impl AsRef<Path>) -> SdkResult<DocumentHandle> {
        Ok(lantern_archive::open(path)?)
    }

    /// Share the records selected by `options` into `path`.
    ///
    /// Both outputs are written to a temp file and renamed into place;
    /// nothing is left at `path` on error or cancellation.
    pub fn export(
        &self,
        path: impl AsRef<Path>,
        options: &ShareOptions,
        cancel: &CancelFlag,
    ) -> SdkResult<ShareReport> {
        let path = path.as_ref();
        let criteria = options.criteria(self.store.now());
        let report = match options.output {
            ShareOutput::Document => {
                let export = ExportOptions {
                    app_info: self.config.app_info.clone(),
                    include_blobs: options.include_blobs,
                    ..ExportOptions::default()
                };
                let report =
                    lantern_archive::export(&self.store, Some(&criteria), path, &export, cancel)?;
                ShareReport {
                    path: report.path,
                    output: ShareOutput::Document,
                    records: report.info.message_count + report.info.task_count,
                    bytes: report.bytes,
                }
            }
            ShareOutput::Text => self.export_text(path, &criteria, cancel)?,
        };
        info!(
            path = %report.path.display(),
            records = report.records,
            bytes = report.bytes,
            "shared store"
        );
        Ok(report)
    }

    fn export_text(
        &self,
        path: &Path,
        criteria: &Criteria,
        cancel: &CancelFlag,
    ) -> SdkResult<ShareReport> {
        let dir = match path.parent().filter(|p| !p.as_os_str().is_empty()) {
            Some(parent) if !parent.is_dir() => {
                return Err(ArchiveError::FileDoesntExist(parent.to_path_buf()).into());
            }
            Some(parent) => parent.to_path_buf(),
            None => PathBuf::from("."),
        };
        let tmp = tempfile::NamedTempFile::new_in(&dir)?;
        let records = {
            let mut out = BufWriter::new(tmp.as_file());
            write_text(&self.store, criteria, &mut out, cancel)?
        };
        tmp.as_file().sync_all()?;
        let file = tmp.persist(path).map_err(|e| e.error)?;
        Ok(ShareReport {
            path: path.to_path_buf(),
            output: ShareOutput::Text,
            records,
            bytes: file.metadata()?.len(),
        })
    }

    // ---- Maintenance ----

    pub fn prune(&self, before: Timestamp, cancel: &CancelFlag) -> SdkResult<PruneReport> {
        Ok(self.store.prune(before, cancel)?)
    }

    /// Remove records older than `max_age_days`. `None` when retention is
    /// unlimited.
    pub fn sweep(&self, cancel: &CancelFlag) -> SdkResult<Option<PruneReport>> {
        let Some(days) = self.config.max_age_days else {
            return Ok(None);
        };
        let before = retention_cutoff(days, Utc::now())?;
        let report = self.store.prune(before, cancel)?;
        if report.total() > 0 {
            info!(days, removed = report.total(), "swept expired records");
        }
        Ok(Some(report))
    }

    pub fn remove_all(&self) -> SdkResult<PruneReport> {
        self.bodies.lock().clear();
        Ok(self.store.remove_all()?)
    }

    pub fn checkpoint(&self) -> SdkResult<()> {
        Ok(self.store.checkpoint()?)
    }

    /// Close this handle's session and checkpoint. Idempotent; records
    /// produced afterwards are rejected.
    pub fn close(&self) -> SdkResult<()> {
        let Some(session) = self.session else {
            return Ok(());
        };
        if self.store.session(&session)?.is_closed() {
            return Ok(());
        }
        self.store.close_session(&session)?;
        self.store.checkpoint()?;
        let dropped = std::mem::take(&mut *self.bodies.lock());
        if !dropped.is_empty() {
            warn!(tasks = dropped.len(), "closed with unfinished task bodies");
        }
        info!(session = %session, "closed session");
        Ok(())
    }

    // ---- Process-wide default ----

    /// Install `self` as the process-wide store. Fails if one is already
    /// installed.
    pub fn install_shared(self) -> SdkResult<Arc<Self>> {
        let store = Arc::new(self);
        SHARED
            .set(Arc::clone(&store))
            .map_err(|_| SdkError::SharedAlreadySet)?;
        Ok(store)
    }

    /// The process-wide store, if one was installed.
    pub fn shared() -> Option<Arc<Self>> {
        SHARED.get().cloned()
    }
}

impl std::fmt::Debug for LoggerStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoggerStore")
            .field("dir", &self.store.dir())
            .field("session", &self.session)
            .field("readonly", &self.store.is_readonly())
            .finish()
    }
}

fn lifecycle_error(task_id: TaskId, e: StoreError) -> SdkError {
    match e {
        StoreError::TaskTerminal(_) => SdkError::TaskAlreadyCompleted(task_id),
        StoreError::NotFound(EntityId::Task(_)) => SdkError::TaskNotFound(task_id),
        e => e.into(),
    }
}

/// Text of the message recorded for a completed task.
fn summary(task: &NetworkTask) -> String {
    let mut text = format!("{} {}", task.method, task.url);
    if let Some(code) = task.status_code {
        text.push_str(&format!(" {code}"));
    }
    if let Some(error) = &task.error {
        text.push_str(&format!(" failed: {}", error.description));
    }
    text
}
