//! Per-call context threaded through every provisioning operation.
//!
//! Carries the caller's cancellation signal and deadline, plus values
//! attached on the way down: the capacity snapshot taken at admission and
//! the currently persisted deployment.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use gridnode_types::{Capacity, Deployment, WorkloadGetter, WorkloadWithId};
use tokio::sync::watch;
use tokio::time::Instant;

use crate::error::{ProvisionError, ProvisionResult};

#[derive(Debug, Clone, Default)]
pub struct Context {
    cancel: Option<watch::Receiver<bool>>,
    deadline: Option<Instant>,
    capacity: Option<Capacity>,
    deployment: Option<Arc<Deployment>>,
}

impl Context {
    /// A context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        Self::default()
    }

    /// Cancel when `signal` flips to `true`.
    pub fn with_cancel(mut self, signal: watch::Receiver<bool>) -> Self {
        self.cancel = Some(signal);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Set a deadline; an earlier existing deadline wins.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(current) if current < deadline => current,
            _ => deadline,
        });
        self
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn with_capacity(mut self, capacity: Capacity) -> Self {
        self.capacity = Some(capacity);
        self
    }

    /// Node usage snapshot attached by admission control.
    pub fn capacity(&self) -> Option<Capacity> {
        self.capacity
    }

    pub fn with_deployment(mut self, deployment: Arc<Deployment>) -> Self {
        self.deployment = Some(deployment);
        self
    }

    pub fn deployment(&self) -> Option<&Deployment> {
        self.deployment.as_deref()
    }

    /// Look up a workload of the attached deployment by name.
    pub fn get_workload(&self, name: &str) -> ProvisionResult<WorkloadWithId> {
        let deployment = self.deployment.as_ref().ok_or(ProvisionError::NoDeployment)?;
        Ok(deployment.get(name)?)
    }

    pub fn is_cancelled(&self) -> bool {
        self.check().is_err()
    }

    /// Fail fast if the context is already done.
    pub fn check(&self) -> ProvisionResult<()> {
        if let Some(cancel) = &self.cancel {
            if *cancel.borrow() {
                return Err(ProvisionError::Cancelled);
            }
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(ProvisionError::DeadlineExceeded);
            }
        }
        Ok(())
    }

    /// Resolves once the context is cancelled or its deadline passes.
    ///
    /// Never resolves for a background context. A dropped cancel sender
    /// means the signal can no longer fire.
    pub async fn done(&self) -> ProvisionError {
        let cancelled = async {
            if let Some(mut cancel) = self.cancel.clone() {
                if cancel.wait_for(|c| *c).await.is_ok() {
                    return;
                }
            }
            std::future::pending::<()>().await
        };
        let expired = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            _ = cancelled => ProvisionError::Cancelled,
            _ = expired => ProvisionError::DeadlineExceeded,
        }
    }

    /// Run `fut` unless the context finishes first.
    pub async fn run<F, T>(&self, fut: F) -> ProvisionResult<T>
    where
        F: Future<Output = T>,
    {
        self.check()?;
        tokio::select! {
            biased;
            err = self.done() => Err(err),
            out = fut => Ok(out),
        }
    }
}
