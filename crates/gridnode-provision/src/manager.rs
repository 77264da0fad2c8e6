//! The per-type handler contract and its outcome vocabulary.

use async_trait::async_trait;
use gridnode_types::WorkloadWithId;
use serde_json::Value;
use thiserror::Error;

use crate::context::Context;
use crate::error::ProvisionError;

/// Successful manager outcomes.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Side effects applied; the payload becomes the new result data.
    Ok(Value),
    /// The desired state already exists.
    NoActionNeeded(Value),
    /// External effects suspended.
    Paused,
}

/// Failed manager outcomes.
#[derive(Debug, Error)]
pub enum Failure {
    /// The change was refused but the existing state is still valid.
    #[error("{0:#}")]
    Unchanged(anyhow::Error),
    /// Anything else. The workload moves to the error state.
    #[error("{0:#}")]
    Failed(anyhow::Error),
}

impl Failure {
    pub fn unchanged(err: impl Into<anyhow::Error>) -> Self {
        Failure::Unchanged(err.into())
    }

    pub fn failed(err: impl Into<anyhow::Error>) -> Self {
        Failure::Failed(err.into())
    }

    pub fn is_unchanged(&self) -> bool {
        matches!(self, Failure::Unchanged(_))
    }
}

impl From<anyhow::Error> for Failure {
    fn from(err: anyhow::Error) -> Self {
        Failure::Failed(err)
    }
}

impl From<ProvisionError> for Failure {
    fn from(err: ProvisionError) -> Self {
        Failure::Failed(err.into())
    }
}

pub type ManagerResult = Result<Outcome, Failure>;

/// Lifecycle handler for one workload type.
///
/// Calls for a single workload id are serialized by the caller; managers
/// do not guard against concurrent calls on the same id. Every external
/// call should go through [`Context::run`] so cancellation is honored.
#[async_trait]
pub trait Manager: Send + Sync {
    /// Make the declared state exist. Must be safe to call again for the
    /// same workload id.
    async fn provision(&self, ctx: &Context, wl: &WorkloadWithId) -> ManagerResult;

    /// Reverse the side effects, tolerating partially created resources.
    async fn deprovision(&self, ctx: &Context, wl: &WorkloadWithId) -> anyhow::Result<()>;

    fn supports_update(&self) -> bool {
        false
    }

    /// Apply a new payload version to a provisioned workload.
    async fn update(&self, _ctx: &Context, _wl: &WorkloadWithId) -> ManagerResult {
        Err(Failure::unchanged(anyhow::anyhow!(
            "workload type does not support updates"
        )))
    }

    async fn pause(&self, _ctx: &Context, _wl: &WorkloadWithId) -> ManagerResult {
        Ok(Outcome::Paused)
    }

    async fn resume(&self, _ctx: &Context, wl: &WorkloadWithId) -> ManagerResult {
        Ok(Outcome::Ok(wl.result.data.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridnode_types::{Workload, WorkloadId, WorkloadResult};
    use serde_json::json;

    struct Noop;

    #[async_trait]
    impl Manager for Noop {
        async fn provision(&self, _ctx: &Context, _wl: &WorkloadWithId) -> ManagerResult {
            Ok(Outcome::Ok(Value::Null))
        }

        async fn deprovision(&self, _ctx: &Context, _wl: &WorkloadWithId) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn wl() -> WorkloadWithId {
        let mut workload = Workload::new("w", "volume", json!({ "size": 1 }));
        workload.result = WorkloadResult {
            created: 1,
            data: json!({ "id": "x" }),
            ..Default::default()
        };
        WorkloadWithId::new(WorkloadId::new(1, 1, "w").unwrap(), workload)
    }

    #[tokio::test]
    async fn defaults() {
        let ctx = Context::background();
        assert!(!Noop.supports_update());

        let err = Noop.update(&ctx, &wl()).await.unwrap_err();
        assert!(err.is_unchanged());
        assert_eq!(err.to_string(), "workload type does not support updates");

        assert_eq!(Noop.pause(&ctx, &wl()).await.unwrap(), Outcome::Paused);
        assert_eq!(
            Noop.resume(&ctx, &wl()).await.unwrap(),
            Outcome::Ok(json!({ "id": "x" }))
        );
    }

    #[test]
    fn failure_displays_error_chain() {
        let err = anyhow::anyhow!("disk busy").context("failed to remove volume");
        let failure = Failure::from(err);
        assert!(!failure.is_unchanged());
        assert_eq!(failure.to_string(), "failed to remove volume: disk busy");
    }
}
