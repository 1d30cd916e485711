//! Foundation types for Lantern.
//!
//! This crate provides the identifiers, timestamps, and record types shared by
//! every other Lantern crate: the blob store, the entity store, the criteria
//! engine, the archive codec, and the live query layer.
//!
//! # Key Types
//!
//! - [`BlobKey`]: Content-addressed key of a stored payload (BLAKE3 hash)
//! - [`SessionId`], [`MessageId`], [`TaskId`], [`TransactionId`]: UUID v7 ids
//! - [`EntityId`]: Reference to a message or a network task
//! - [`LogLevel`]: Severity of a log message
//! - [`Session`], [`Message`], [`NetworkTask`], [`Transaction`]: stored records
//! - [`MonotonicClock`]: Strictly increasing timestamps for the writer
//! - [`CancelFlag`]: Cooperative cancellation for long-running operations

pub mod cancel;
pub mod clock;
pub mod entity;
pub mod error;
pub mod ids;
pub mod level;

pub use cancel::CancelFlag;
pub use clock::{MonotonicClock, Timestamp};
pub use entity::{
    Entity, FetchType, Message, NetworkTask, ResponseInfo, Session, SourceLocation, TaskError,
    TaskState, TaskType, Transaction, TransactionTiming, TransferSize,
};
pub use error::TypeError;
pub use ids::{BlobKey, EntityId, EntityKind, MessageId, SessionId, TaskId, TransactionId};
pub use level::LogLevel;

/// Free-form string metadata attached to sessions and messages.
pub type Metadata = std::collections::BTreeMap<String, String>;

/// HTTP header map. Keys keep the casing the producer supplied.
pub type Headers = std::collections::BTreeMap<String, String>;
