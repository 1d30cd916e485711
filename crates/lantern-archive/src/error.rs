use std::path::PathBuf;

use lantern_blob::BlobError;
use lantern_criteria::CriteriaError;
use lantern_store::StoreError;
use lantern_types::BlobKey;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("file does not exist: {}", .0.display())]
    FileDoesntExist(PathBuf),

    /// Not a document, or its index or info section cannot be decoded.
    #[error("not a valid document: {0}")]
    StoreInvalid(String),

    #[error("unsupported document schema: {0}")]
    UnsupportedSchema(u32),

    /// Misuse of a handle, e.g. access after close.
    #[error("unknown error: {0}")]
    Unknown(String),

    #[error("blob not found in document: {0}")]
    NotFound(BlobKey),

    #[error("document is corrupted: {0}")]
    Corrupted(String),

    #[error("export cancelled")]
    Cancelled,

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("blob error: {0}")]
    Blob(#[from] BlobError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<CriteriaError> for ArchiveError {
    fn from(e: CriteriaError) -> Self {
        Self::Store(StoreError::Criteria(e))
    }
}

pub type ArchiveResult<T> = Result<T, ArchiveError>;
