use lantern_criteria::CriteriaError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LiveError {
    #[error("invalid criteria: {0}")]
    Criteria(#[from] CriteriaError),
}

pub type LiveResult<T> = Result<T, LiveError>;
