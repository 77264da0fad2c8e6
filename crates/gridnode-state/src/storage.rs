//! Read-side contract consumed by admission control.

use gridnode_types::{Capacity, Deployment, Timestamp, WorkloadId, WorkloadType, WorkloadWithId};

use crate::error::StateResult;

/// Usage derived from persisted deployments.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StorageCapacity {
    /// Summed capacity of every live workload.
    pub cap: Capacity,
    /// Deployments with at least one live workload.
    pub deployments: Vec<Deployment>,
    /// Number of live workloads.
    pub workloads: usize,
    /// Newest result timestamp among live workloads.
    pub last_deployment_timestamp: Timestamp,
}

/// Persisted workload state as seen by the provisioning engine.
pub trait Storage: Send + Sync {
    /// Sum of live workloads' capacity, skipping the ids in `exclude`.
    ///
    /// Live means the last result is ok-equivalent (ok or paused).
    fn capacity(&self, exclude: &[WorkloadId]) -> StateResult<StorageCapacity>;

    fn get_workload(&self, id: &WorkloadId) -> StateResult<WorkloadWithId>;

    /// Workloads of the given types across all deployments of `twin`.
    fn by_type(&self, twin: u32, types: &[WorkloadType]) -> StateResult<Vec<WorkloadWithId>>;
}
