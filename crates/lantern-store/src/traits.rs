use std::sync::Arc;

use lantern_criteria::Criteria;
use lantern_types::{
    CancelFlag, Entity, EntityId, Message, Metadata, NetworkTask, Session, SessionId, TaskId,
    Timestamp, Transaction,
};

use crate::error::StoreResult;
use crate::record::{Change, PruneReport, StoreCounts, TaskUpdate};
use crate::tables::EntityTables;

/// Write boundary for entity store mutations.
///
/// Every call is serialized by the store's single writer lock, logged to the
/// WAL, applied, and only then acknowledged.
pub trait StoreWriter: Send + Sync {
    /// Start a new session; it becomes the active session.
    fn create_session(&self, metadata: Metadata) -> StoreResult<Arc<Session>>;

    fn close_session(&self, id: &SessionId) -> StoreResult<Arc<Session>>;

    /// `created_at` is clamped so records never go back in time.
    fn insert_message(&self, message: Message) -> StoreResult<Arc<Message>>;

    /// The task is stored pending, whatever state it carries.
    fn insert_task(&self, task: NetworkTask) -> StoreResult<Arc<NetworkTask>>;

    /// Rejected with `TaskTerminal` once the task is complete.
    fn append_transaction(
        &self,
        task_id: &TaskId,
        transaction: Transaction,
    ) -> StoreResult<Arc<NetworkTask>>;

    /// Rejected with `TaskTerminal` once the task is complete.
    fn update_task(&self, task_id: &TaskId, update: TaskUpdate) -> StoreResult<Arc<NetworkTask>>;

    fn set_pinned(&self, id: &EntityId, pinned: bool) -> StoreResult<()>;

    fn clear_pins(&self) -> StoreResult<()>;

    /// Remove messages and tasks created before `before`, one record at a
    /// time, checking `cancel` between records.
    fn prune(&self, before: Timestamp, cancel: &CancelFlag) -> StoreResult<PruneReport>;

    /// Remove every message and task and every session but the active one.
    fn remove_all(&self) -> StoreResult<PruneReport>;

    /// Write a snapshot and truncate the WAL.
    fn checkpoint(&self) -> StoreResult<()>;
}

/// Read boundary for entity store queries.
///
/// Reads run against a recent snapshot of the tables and never wait on a
/// long write.
pub trait StoreReader: Send + Sync {
    /// Ids matching `criteria`, newest first unless it asks otherwise.
    fn query(&self, criteria: &Criteria) -> StoreResult<Vec<EntityId>>;

    fn fetch(&self, id: &EntityId) -> StoreResult<Entity>;

    fn session(&self, id: &SessionId) -> StoreResult<Arc<Session>>;

    fn sessions(&self) -> Vec<Arc<Session>>;

    fn current_session(&self) -> Option<SessionId>;

    /// Transactions of a task, ordered by start.
    fn transactions(&self, task_id: &TaskId) -> StoreResult<Vec<Arc<Transaction>>>;

    /// Distinct message labels with counts.
    fn labels(&self) -> Vec<(String, usize)>;

    /// Distinct task hosts with counts.
    fn hosts(&self) -> Vec<(String, usize)>;

    fn counts(&self) -> StoreCounts;

    fn pins(&self) -> Vec<EntityId>;
}

/// Hook run inside the writer's critical section after every commit.
///
/// `tables` is the committed state. Implementations must not call back into
/// the store's writer.
pub trait CommitListener: Send + Sync {
    fn on_commit(&self, tables: &EntityTables, changes: &[Change]);
}
