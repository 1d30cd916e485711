use std::time::Duration;

use lantern_blob::DEFAULT_COMPRESSION_THRESHOLD;
use serde::{Deserialize, Serialize};

/// Flush/sync strategy for the write-ahead log.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// `fsync` after every record (safest, highest latency).
    EveryWrite,
    /// Rely on OS page-cache buffering.
    #[default]
    OsDefault,
}

/// How a store directory is opened.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenOptions {
    /// Allocate a new empty store if the directory is absent.
    pub create: bool,
    /// Reject every mutating call with `ReadOnlyViolation`.
    pub readonly: bool,
}

impl OpenOptions {
    pub fn create() -> Self {
        Self {
            create: true,
            readonly: false,
        }
    }

    pub fn readonly() -> Self {
        Self {
            create: false,
            readonly: true,
        }
    }
}

/// Tuning for an open store.
#[derive(Clone, Debug)]
pub struct StoreSettings {
    /// Blobs larger than this are zstd-compressed at rest.
    pub compression_threshold: usize,
    /// Minimum age of a reader snapshot before it is refreshed.
    /// `None` refreshes on every read that follows a commit.
    pub refresh_interval: Option<Duration>,
    /// WAL size that triggers an automatic checkpoint.
    pub checkpoint_wal_bytes: u64,
    pub sync: SyncMode,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            compression_threshold: DEFAULT_COMPRESSION_THRESHOLD,
            refresh_interval: None,
            checkpoint_wal_bytes: 8 * 1024 * 1024, // 8 MiB
            sync: SyncMode::default(),
        }
    }
}
