//! gridnode-provision: the provisioning engine of a node.
//!
//! Per-type [`Manager`]s are routed by [`MapProvisioner`], which folds
//! their outcomes into a [`Verdict`] and keeps the lock-free [`Counters`]
//! current. [`Statistics`] sits in front of the dispatcher and refuses to
//! provision workloads whose memory does not fit.
//!
//! Operations on one workload id must be serialized by the caller.

pub mod config;
pub mod context;
pub mod counters;
pub mod error;
pub mod manager;
pub mod provisioner;
pub mod redact;
pub mod statistics;

pub use config::NodeConfig;
pub use context::Context;
pub use counters::{AtomicValue, Counters};
pub use error::{ProvisionError, ProvisionResult};
pub use manager::{Failure, Manager, ManagerResult, Outcome};
pub use provisioner::{MapProvisioner, Provisioner, Verdict};
pub use redact::redact;
pub use statistics::{
    HostMemory, HostMemoryStats, ProcMeminfo, Statistics, UsageCounters, UserCounters,
};
