//! Provisioning engine error types.

use gridnode_state::StateError;
use gridnode_types::{ResultState, TypesError, Unit, WorkloadResult, now};
use thiserror::Error;

/// Errors raised by the engine itself, as opposed to handler outcomes.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("unknown workload type '{0}'")]
    UnknownType(String),

    #[error(
        "failed to satisfy required capacity: cannot fulfil required memory size {required} bytes out of usable {usable} bytes"
    )]
    AdmissionDenied { required: Unit, usable: Unit },

    #[error("failed to calculate workload needed capacity: {0}")]
    Capacity(#[source] TypesError),

    #[error("workload error: {0}")]
    Workload(#[from] TypesError),

    #[error("state store error: {0}")]
    State(#[from] StateError),

    #[error("failed to read host memory: {0}")]
    HostMetrics(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("cannot {op} workload in state '{state}'")]
    InvalidState { op: &'static str, state: ResultState },

    #[error("no deployment attached to context")]
    NoDeployment,

    #[error("failed to deprovision workload: {0}")]
    Deprovision(String),

    #[error("config error: {0}")]
    Config(String),
}

pub type ProvisionResult<T> = Result<T, ProvisionError>;

impl ProvisionError {
    /// Error-state result recording this failure.
    pub fn to_result(&self) -> WorkloadResult {
        WorkloadResult {
            created: now(),
            state: ResultState::Error,
            error: self.to_string(),
            data: serde_json::Value::Null,
        }
    }
}
