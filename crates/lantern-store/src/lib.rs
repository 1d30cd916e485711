//! Entity store for Lantern.
//!
//! Holds sessions, log messages, network tasks, and their transactions.
//! Every mutation is appended to a CRC-framed write-ahead log before it is
//! applied to the in-memory [`EntityTables`]; checkpoints compact the log
//! into a snapshot. Readers query a recent `Arc` snapshot of the tables and
//! are never blocked by a long write.
//!
//! # Design Rules
//!
//! 1. One writer lock serializes every mutation, WAL append included.
//! 2. WAL records carry resulting state, so replay is deterministic and
//!    applying a record twice changes nothing.
//! 3. `created_at` is strictly increasing across the store.
//! 4. A task accepts no transactions or updates once it is complete.
//! 5. Blob references are released only after the record dropping them is
//!    committed.

pub mod config;
pub mod error;
pub mod record;
pub mod snapshot;
pub mod store;
pub mod tables;
pub mod traits;
pub mod wal;

pub use config::{OpenOptions, StoreSettings, SyncMode};
pub use error::{StoreError, StoreResult};
pub use record::{
    Change, PruneReport, StoreCounts, TaskCompletion, TaskOutcome, TaskUpdate, WalRecord,
};
pub use store::{EntityStore, STORE_VERSION};
pub use tables::{EntityTables, TablesImage};
pub use traits::{CommitListener, StoreReader, StoreWriter};
pub use wal::{Replay, WriteAheadLog};
