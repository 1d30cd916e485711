use lantern_types::BlobKey;

/// Errors from blob store operations.
#[derive(Debug, thiserror::Error)]
pub enum BlobError {
    /// The key is unknown or its blob has been purged.
    #[error("blob not found: {0}")]
    NotFound(BlobKey),

    /// The stored bytes could not be decoded or fail hash verification.
    #[error("corrupted blob {key}: {reason}")]
    Corrupted { key: BlobKey, reason: String },

    /// I/O error from the underlying storage backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Compression failure while encoding a payload.
    #[error("compression failed: {0}")]
    Compression(String),

    /// The store was opened read-only.
    #[error("blob store is read-only")]
    ReadOnly,
}

impl BlobError {
    /// `true` for unknown keys, as opposed to integrity or I/O failures.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Result alias for blob store operations.
pub type BlobResult<T> = Result<T, BlobError>;
