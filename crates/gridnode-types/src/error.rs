//! Error types for the gridnode data model.

use thiserror::Error;

/// Result type alias for data model operations.
pub type TypesResult<T> = Result<T, TypesError>;

/// Errors raised while validating, decoding, or signing workloads and deployments.
#[derive(Debug, Error)]
pub enum TypesError {
    #[error("invalid name '{0}': must be 1-50 characters of [a-zA-Z0-9_]")]
    InvalidName(String),

    #[error("invalid workload type '{0}'")]
    UnknownType(String),

    #[error("workload type '{0}' already registered")]
    DuplicateType(String),

    #[error("failed to load data of workload type '{typ}': {source}")]
    Decode {
        typ: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("{0}")]
    Invalid(String),

    #[error("workload not found: {0}")]
    WorkloadNotFound(String),

    #[error("invalid workload id: {0}")]
    InvalidId(String),

    #[error("signature error: {0}")]
    Signature(String),

    #[error("io error while writing challenge: {0}")]
    Io(#[from] std::io::Error),
}

impl TypesError {
    /// Shorthand for a validation failure with a formatted message.
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }
}
