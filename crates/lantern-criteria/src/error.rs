use crate::custom::{CustomField, Operator};

/// Errors raised while compiling criteria.
#[derive(Debug, thiserror::Error)]
pub enum CriteriaError {
    /// A custom rule's regex does not compile.
    #[error("invalid regex '{pattern}': {reason}")]
    InvalidRegex { pattern: String, reason: String },

    /// A value cannot be interpreted for the field it is compared against.
    #[error("invalid value '{value}' for {field}")]
    InvalidValue { field: String, value: String },

    /// The operator makes no sense for the field (e.g. ordering on text).
    #[error("operator {operator} is not supported for field {field}")]
    UnsupportedOperator { field: CustomField, operator: Operator },
}

/// Result alias for criteria operations.
pub type CriteriaResult<T> = Result<T, CriteriaError>;
