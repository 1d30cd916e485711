use thiserror::Error;

/// Errors parsing keys, ids, and levels from text.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("blob key is not hex: {0}")]
    InvalidHex(String),

    #[error("blob key has {actual} bytes, expected {expected}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("unknown log level: {0}")]
    UnknownLevel(String),

    #[error("invalid identifier: {0}")]
    InvalidId(String),
}
