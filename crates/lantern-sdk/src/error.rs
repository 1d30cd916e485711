use thiserror::Error;

use lantern_types::TaskId;

#[derive(Debug, Error)]
pub enum SdkError {
    #[error("task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("task {0} is already complete")]
    TaskAlreadyCompleted(TaskId),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("a shared store is already installed")]
    SharedAlreadySet,

    #[error("store error: {0}")]
    Store(#[from] lantern_store::StoreError),

    #[error("archive error: {0}")]
    Archive(#[from] lantern_archive::ArchiveError),

    #[error("blob error: {0}")]
    Blob(#[from] lantern_blob::BlobError),

    #[error("live query error: {0}")]
    Live(#[from] lantern_live::LiveError),

    #[error("criteria error: {0}")]
    Criteria(#[from] lantern_criteria::CriteriaError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type SdkResult<T> = Result<T, SdkError>;
