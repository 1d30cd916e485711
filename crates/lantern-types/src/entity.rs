use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::clock::Timestamp;
use crate::ids::{BlobKey, EntityId, MessageId, SessionId, TaskId, TransactionId};
use crate::level::LogLevel;
use crate::{Headers, Metadata};

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// One continuous run of the producing process.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub started_at: Timestamp,
    pub metadata: Metadata,
    /// Set once the session is closed; closed sessions accept no new children.
    pub closed_at: Option<Timestamp>,
}

impl Session {
    pub fn new(started_at: Timestamp, metadata: Metadata) -> Self {
        Self {
            id: SessionId::new(),
            started_at,
            metadata,
            closed_at: None,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed_at.is_some()
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// Where in the producer's source a message was logged.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    pub file: String,
    pub function: String,
    pub line: u32,
}

/// A structured log message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub session_id: SessionId,
    pub created_at: Timestamp,
    pub label: String,
    pub level: LogLevel,
    pub text: String,
    pub metadata: Metadata,
    pub source: Option<SourceLocation>,
    /// Network task this message reports on, if any.
    pub linked_task_id: Option<TaskId>,
}

impl Message {
    pub fn new(
        session_id: SessionId,
        created_at: Timestamp,
        label: impl Into<String>,
        level: LogLevel,
        text: impl Into<String>,
    ) -> Self {
        Self {
            id: MessageId::new(),
            session_id,
            created_at,
            label: label.into(),
            level,
            text: text.into(),
            metadata: Metadata::new(),
            source: None,
            linked_task_id: None,
        }
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_source(mut self, source: SourceLocation) -> Self {
        self.source = Some(source);
        self
    }

    pub fn linked_to(mut self, task_id: TaskId) -> Self {
        self.linked_task_id = Some(task_id);
        self
    }
}

// ---------------------------------------------------------------------------
// NetworkTask
// ---------------------------------------------------------------------------

/// Lifecycle state of a network task.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Pending,
    Success,
    Failure,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// The kind of URL session task that produced a network task.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    #[default]
    Data,
    Download,
    Upload,
    Stream,
    WebSocket,
}

/// Error recorded when a task fails.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskError {
    pub code: i64,
    pub domain: String,
    pub description: String,
}

/// A network request/response traced by the producer.
///
/// Created pending; response fields and the terminal state are filled in as
/// the task progresses. Bodies are not stored inline: the task holds the
/// content key of a blob.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkTask {
    pub id: TaskId,
    pub session_id: SessionId,
    pub created_at: Timestamp,
    pub url: String,
    /// Host component of `url`, derived on creation.
    pub host: Option<String>,
    pub method: String,
    pub task_type: TaskType,
    pub state: TaskState,
    pub status_code: Option<u16>,
    /// Defined only once the task is terminal.
    pub duration: Option<Duration>,
    pub completed_at: Option<Timestamp>,
    pub request_headers: Headers,
    pub response_headers: Headers,
    pub request_body_key: Option<BlobKey>,
    pub response_body_key: Option<BlobKey>,
    pub request_body_size: u64,
    pub response_body_size: u64,
    pub error: Option<TaskError>,
    /// Number of redirect responses among the task's transactions.
    pub redirect_count: u32,
    /// Whether the latest transaction was served from a local cache.
    pub from_cache: bool,
}

impl NetworkTask {
    pub fn new(
        session_id: SessionId,
        created_at: Timestamp,
        method: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        let url = url.into();
        Self {
            id: TaskId::new(),
            session_id,
            created_at,
            host: host_of(&url),
            url,
            method: method.into(),
            task_type: TaskType::default(),
            state: TaskState::Pending,
            status_code: None,
            duration: None,
            completed_at: None,
            request_headers: Headers::new(),
            response_headers: Headers::new(),
            request_body_key: None,
            response_body_key: None,
            request_body_size: 0,
            response_body_size: 0,
            error: None,
            redirect_count: 0,
            from_cache: false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Fold an appended transaction into the task's derived fields.
    pub fn observe_transaction(&mut self, transaction: &Transaction) {
        if transaction.response.as_ref().is_some_and(ResponseInfo::is_redirect) {
            self.redirect_count += 1;
        }
        self.from_cache = transaction.fetch_type == FetchType::LocalCache;
    }

    /// Case-insensitive response header lookup.
    pub fn response_header(&self, name: &str) -> Option<&str> {
        header(&self.response_headers, name)
    }

    /// Case-insensitive request header lookup.
    pub fn request_header(&self, name: &str) -> Option<&str> {
        header(&self.request_headers, name)
    }

    /// MIME type of the response, without parameters, lowercased.
    pub fn content_type(&self) -> Option<String> {
        self.response_header("content-type").map(|v| {
            v.split(';')
                .next()
                .unwrap_or_default()
                .trim()
                .to_ascii_lowercase()
        })
    }

    /// Blob keys referenced by this task.
    pub fn blob_keys(&self) -> impl Iterator<Item = BlobKey> + '_ {
        self.request_body_key
            .iter()
            .chain(self.response_body_key.iter())
            .copied()
    }

    /// Task duration given its transactions and completion instant.
    ///
    /// Spans from the first transaction's start to the last transaction's
    /// end; falls back to `created_at..completed_at` without transactions.
    pub fn span(&self, transactions: &[Transaction], completed_at: Timestamp) -> Duration {
        let start = transactions
            .iter()
            .map(|t| t.timing.start)
            .min()
            .unwrap_or(self.created_at);
        let end = transactions
            .iter()
            .filter_map(|t| t.timing.end)
            .max()
            .unwrap_or(completed_at);
        (end - start).to_std().unwrap_or_default()
    }
}

fn header<'a>(headers: &'a Headers, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Host component of a URL, if it parses.
pub fn host_of(url: &str) -> Option<String> {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
}

// ---------------------------------------------------------------------------
// Transaction
// ---------------------------------------------------------------------------

/// Where a transaction's response came from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchType {
    #[default]
    NetworkLoad,
    LocalCache,
    ServerPush,
    Unknown,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionTiming {
    pub start: Timestamp,
    pub end: Option<Timestamp>,
}

impl TransactionTiming {
    pub fn duration(&self) -> Option<Duration> {
        self.end.and_then(|end| (end - self.start).to_std().ok())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferSize {
    pub request_headers: u64,
    pub request_body: u64,
    pub response_headers: u64,
    pub response_body: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseInfo {
    pub status_code: u16,
    pub headers: Headers,
}

impl ResponseInfo {
    pub fn is_success(&self) -> bool {
        (200..400).contains(&self.status_code)
    }

    pub fn is_redirect(&self) -> bool {
        (300..400).contains(&self.status_code)
    }
}

/// One fetch attempt within a task (initial load, redirect hop, cache hit).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub task_id: TaskId,
    pub fetch_type: FetchType,
    pub timing: TransactionTiming,
    pub transfer_size: TransferSize,
    pub response: Option<ResponseInfo>,
}

impl Transaction {
    pub fn new(task_id: TaskId, fetch_type: FetchType, start: Timestamp) -> Self {
        Self {
            id: TransactionId::new(),
            task_id,
            fetch_type,
            timing: TransactionTiming { start, end: None },
            transfer_size: TransferSize::default(),
            response: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Entity
// ---------------------------------------------------------------------------

/// A fetched message or task. Records are shared, not copied.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Entity {
    Message(Arc<Message>),
    Task(Arc<NetworkTask>),
}

impl Entity {
    pub fn id(&self) -> EntityId {
        match self {
            Self::Message(m) => EntityId::Message(m.id),
            Self::Task(t) => EntityId::Task(t.id),
        }
    }

    pub fn created_at(&self) -> Timestamp {
        match self {
            Self::Message(m) => m.created_at,
            Self::Task(t) => t.created_at,
        }
    }

    pub fn session_id(&self) -> SessionId {
        match self {
            Self::Message(m) => m.session_id,
            Self::Task(t) => t.session_id,
        }
    }

    pub fn as_message(&self) -> Option<&Message> {
        match self {
            Self::Message(m) => Some(m),
            Self::Task(_) => None,
        }
    }

    pub fn as_task(&self) -> Option<&NetworkTask> {
        match self {
            Self::Task(t) => Some(t),
            Self::Message(_) => None,
        }
    }
}
