use std::io;
use std::path::PathBuf;

use lantern_blob::BlobError;
use lantern_criteria::CriteriaError;
use lantern_types::{EntityId, SessionId, TaskId};

/// Errors produced by the entity store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No session with this id.
    #[error("session not found: {0}")]
    SessionNotFound(SessionId),

    /// No message or task with this id.
    #[error("entity not found: {0}")]
    NotFound(EntityId),

    /// The store directory does not exist and `create` was not requested.
    #[error("store does not exist: {}", .0.display())]
    FileDoesntExist(PathBuf),

    /// The directory is not a store (missing or unreadable manifest).
    #[error("not a valid store: {0}")]
    StoreInvalid(String),

    /// Persisted state failed integrity checks.
    #[error("store is corrupted: {0}")]
    StoreCorrupted(String),

    /// A mutating call on a store opened read-only.
    #[error("store is read-only")]
    ReadOnlyViolation,

    /// The task already reached a terminal state.
    #[error("task {0} is already complete")]
    TaskTerminal(TaskId),

    /// The session is closed and accepts no new records.
    #[error("session {0} is closed")]
    SessionClosed(SessionId),

    /// A long-running operation observed its cancellation flag.
    #[error("operation cancelled")]
    Cancelled,

    #[error("blob store error: {0}")]
    Blob(#[from] BlobError),

    #[error("invalid criteria: {0}")]
    Criteria(#[from] CriteriaError),

    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    /// `true` for unknown ids, as opposed to integrity or policy failures.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::SessionNotFound(_) | Self::NotFound(_) => true,
            Self::Blob(e) => e.is_not_found(),
            _ => false,
        }
    }
}

/// Result alias for entity store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;
