//! Capacity admission in front of the dispatcher.
//!
//! [`Statistics`] wraps any [`Provisioner`]. Provision and update are
//! admitted only if the workload's memory fits in the headroom left under
//! the larger of two estimates: the persisted sum of live workloads, or
//! what the host reports as used plus the system reservation. Other
//! capacity dimensions are reported but not gated.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use gridnode_state::Storage;
use gridnode_types::{
    Capacity, KILOBYTE, Timestamp, TypeRegistry, Unit, WorkloadId, WorkloadType, WorkloadWithId,
};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::context::Context;
use crate::error::{ProvisionError, ProvisionResult};
use crate::provisioner::{Provisioner, Verdict};

// ── Host memory ────────────────────────────────────────────────

/// Physical memory as reported by the host, in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HostMemoryStats {
    pub total: Unit,
    pub available: Unit,
}

impl HostMemoryStats {
    pub fn used(&self) -> Unit {
        self.total.saturating_sub(self.available)
    }
}

pub trait HostMemory: Send + Sync {
    fn memory(&self) -> ProvisionResult<HostMemoryStats>;
}

/// Reads `MemTotal` and `MemAvailable` from a meminfo file.
#[derive(Debug, Clone)]
pub struct ProcMeminfo {
    path: PathBuf,
}

impl Default for ProcMeminfo {
    fn default() -> Self {
        Self::new("/proc/meminfo")
    }
}

impl ProcMeminfo {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn parse(content: &str) -> ProvisionResult<HostMemoryStats> {
        let mut total = None;
        let mut available = None;
        for line in content.lines() {
            let Some((key, rest)) = line.split_once(':') else {
                continue;
            };
            let slot = match key.trim() {
                "MemTotal" => &mut total,
                "MemAvailable" => &mut available,
                _ => continue,
            };
            let kb: Unit = rest
                .split_whitespace()
                .next()
                .and_then(|v| v.parse().ok())
                .ok_or_else(|| ProvisionError::HostMetrics(format!("malformed line '{line}'")))?;
            let bytes = kb.checked_mul(KILOBYTE).ok_or_else(|| {
                ProvisionError::HostMetrics(format!("value out of range in line '{line}'"))
            })?;
            *slot = Some(bytes);
        }

        match (total, available) {
            (Some(total), Some(available)) => Ok(HostMemoryStats { total, available }),
            _ => Err(ProvisionError::HostMetrics(
                "MemTotal or MemAvailable missing".into(),
            )),
        }
    }
}

impl HostMemory for ProcMeminfo {
    fn memory(&self) -> ProvisionResult<HostMemoryStats> {
        let content = std::fs::read_to_string(&self.path)
            .map_err(|e| ProvisionError::HostMetrics(format!("{}: {e}", self.path.display())))?;
        Self::parse(&content)
    }
}

// ── Usage report ───────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserCounters {
    pub deployments: usize,
    pub workloads: usize,
    pub last_deployment_timestamp: Timestamp,
}

/// Node usage as reported to the outside.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageCounters {
    pub total: Capacity,
    /// Persisted usage plus the system reservation.
    pub used: Capacity,
    pub system: Capacity,
    pub users: UserCounters,
}

// ── Statistics ─────────────────────────────────────────────────

pub struct Statistics<P> {
    inner: P,
    total: Capacity,
    reserved: Capacity,
    storage: Arc<dyn Storage>,
    host: Arc<dyn HostMemory>,
    registry: Arc<TypeRegistry>,
}

impl<P: Provisioner> Statistics<P> {
    pub fn new(
        inner: P,
        total: Capacity,
        reserved: Capacity,
        storage: Arc<dyn Storage>,
        host: Arc<dyn HostMemory>,
        registry: Arc<TypeRegistry>,
    ) -> Self {
        Self {
            inner,
            total,
            reserved,
            storage,
            host,
            registry,
        }
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }

    pub fn total(&self) -> Capacity {
        self.total
    }

    pub fn reserved(&self) -> Capacity {
        self.reserved
    }

    /// Persisted usage plus the system reservation.
    pub fn current(&self) -> ProvisionResult<Capacity> {
        let mut cap = self.storage.capacity(&[])?.cap;
        cap += self.reserved;
        Ok(cap)
    }

    /// Number of live workloads.
    pub fn workloads(&self) -> ProvisionResult<usize> {
        Ok(self.storage.capacity(&[])?.workloads)
    }

    pub fn counters(&self) -> ProvisionResult<UsageCounters> {
        let active = self.storage.capacity(&[])?;
        let mut used = active.cap;
        used += self.reserved;
        Ok(UsageCounters {
            total: self.total,
            used,
            system: self.reserved,
            users: UserCounters {
                deployments: active.deployments.len(),
                workloads: active.workloads,
                last_deployment_timestamp: active.last_deployment_timestamp,
            },
        })
    }

    /// Admit `required` against current usage, ignoring `exclude` in the
    /// persisted sum. Returns the usage snapshot to attach to the context.
    pub fn admit(&self, required: &Capacity, exclude: &WorkloadId) -> ProvisionResult<Capacity> {
        let persisted = self.storage.capacity(std::slice::from_ref(exclude))?.cap;
        let host = self.host.memory()?;

        let used = persisted
            .mru
            .max(host.used().saturating_add(self.reserved.mru));
        let usable = host.total.saturating_sub(used);

        if required.mru > usable {
            warn!(
                workload_id = %exclude,
                required = required.mru,
                usable,
                "admission denied"
            );
            return Err(ProvisionError::AdmissionDenied {
                required: required.mru,
                usable,
            });
        }

        debug!(workload_id = %exclude, required = required.mru, usable, "workload admitted");
        let mut snapshot = persisted;
        snapshot += self.reserved;
        Ok(snapshot)
    }

    fn admitted_context(&self, ctx: &Context, wl: &WorkloadWithId) -> ProvisionResult<Context> {
        let required = wl
            .capacity(&self.registry)
            .map_err(ProvisionError::Capacity)?;
        let snapshot = self.admit(&required, &wl.id)?;
        Ok(ctx.clone().with_capacity(snapshot))
    }
}

impl<P: Provisioner + 'static> Statistics<P> {
    /// Publish [`current`](Self::current) now and then every `interval`
    /// until `shutdown` fires or the receiver is dropped.
    pub fn spawn_usage_stream(
        self: &Arc<Self>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> mpsc::Receiver<Capacity> {
        let (tx, rx) = mpsc::channel(1);
        let stats = Arc::clone(self);
        tokio::spawn(async move {
            info!(interval_secs = interval.as_secs(), "usage stream started");
            loop {
                match stats.current() {
                    Ok(cap) => {
                        tokio::select! {
                            sent = tx.send(cap) => if sent.is_err() { break },
                            _ = shutdown.changed() => break,
                        }
                    }
                    Err(e) => warn!(error = %e, "failed to compute node usage"),
                }
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = shutdown.changed() => break,
                }
            }
            info!("usage stream stopped");
        });
        rx
    }
}

#[async_trait]
impl<P: Provisioner> Provisioner for Statistics<P> {
    async fn provision(&self, ctx: &Context, wl: &WorkloadWithId) -> ProvisionResult<Verdict> {
        let ctx = self.admitted_context(ctx, wl)?;
        self.inner.provision(&ctx, wl).await
    }

    async fn deprovision(&self, ctx: &Context, wl: &WorkloadWithId) -> ProvisionResult<()> {
        self.inner.deprovision(ctx, wl).await
    }

    /// A resize can grow the requirement, so updates are admitted too.
    async fn update(&self, ctx: &Context, wl: &WorkloadWithId) -> ProvisionResult<Verdict> {
        let ctx = self.admitted_context(ctx, wl)?;
        self.inner.update(&ctx, wl).await
    }

    async fn pause(&self, ctx: &Context, wl: &WorkloadWithId) -> ProvisionResult<Verdict> {
        self.inner.pause(ctx, wl).await
    }

    async fn resume(&self, ctx: &Context, wl: &WorkloadWithId) -> ProvisionResult<Verdict> {
        self.inner.resume(ctx, wl).await
    }

    fn can_update(&self, typ: &WorkloadType) -> bool {
        self.inner.can_update(typ)
    }
}
