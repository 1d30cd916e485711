use lantern_types::{
    BlobKey, Entity, EntityId, Headers, Message, NetworkTask, Session, SessionId, TaskError,
    Timestamp, Transaction,
};
use serde::{Deserialize, Serialize};

/// One durable mutation, as written to the WAL.
///
/// Records carry resulting state rather than requests, so replay never
/// depends on the clock or on validation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WalRecord {
    CreateSession(Session),
    CloseSession {
        id: SessionId,
        closed_at: Timestamp,
    },
    InsertMessage(Message),
    InsertTask(NetworkTask),
    AppendTransaction(Transaction),
    /// Full task state after an update.
    UpdateTask(NetworkTask),
    SetPinned {
        id: EntityId,
        pinned: bool,
    },
    ClearPins,
    /// Prune one message or task with its transactions and pin.
    Remove(EntityId),
    RemoveSession(SessionId),
    /// Drop every record except the active session.
    RemoveAll,
}

/// How a task ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TaskOutcome {
    Success,
    Failure(TaskError),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TaskCompletion {
    pub outcome: TaskOutcome,
    pub completed_at: Timestamp,
}

/// Changes to a pending task. Unset fields are left as they are.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TaskUpdate {
    pub status_code: Option<u16>,
    pub response_headers: Option<Headers>,
    /// Replaces the response body; a previous body blob is released.
    pub response_body_key: Option<BlobKey>,
    pub response_body_size: Option<u64>,
    /// Moves the task to its terminal state.
    pub completion: Option<TaskCompletion>,
}

impl TaskUpdate {
    pub fn complete(outcome: TaskOutcome, completed_at: Timestamp) -> Self {
        Self {
            completion: Some(TaskCompletion {
                outcome,
                completed_at,
            }),
            ..Self::default()
        }
    }
}

/// One entity-level effect of a commit, as seen by listeners.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Change {
    Inserted(Entity),
    Updated(Entity),
    Removed(EntityId),
}

impl Change {
    pub fn id(&self) -> EntityId {
        match self {
            Self::Inserted(e) | Self::Updated(e) => e.id(),
            Self::Removed(id) => *id,
        }
    }
}

/// What a prune or remove-all dropped.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PruneReport {
    pub messages: usize,
    pub tasks: usize,
    pub sessions: usize,
    /// Blob references released; blobs reaching zero were purged.
    pub blobs_released: usize,
}

impl PruneReport {
    pub fn total(&self) -> usize {
        self.messages + self.tasks + self.sessions
    }
}

/// Record counts of a store snapshot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreCounts {
    pub sessions: usize,
    pub messages: usize,
    pub tasks: usize,
    pub transactions: usize,
}
