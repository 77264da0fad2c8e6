//! `zmount` manager: raw virtual disks attached to virtual machines.

use std::sync::Arc;

use anyhow::{Context as _, anyhow};
use async_trait::async_trait;
use gridnode_provision::{Context, Failure, Manager, ManagerResult, Outcome};
use gridnode_types::zos::{ZMACHINE_TYPE, ZMachine, ZMount};
use gridnode_types::{Unit, WorkloadGetter, WorkloadWithId};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::payload;

#[async_trait]
pub trait DiskBackend: Send + Sync {
    async fn exists(&self, name: &str) -> anyhow::Result<bool>;
    /// Create a sparse disk, returning its path.
    async fn create(&self, name: &str, size: Unit) -> anyhow::Result<String>;
    async fn resize(&self, name: &str, size: Unit) -> anyhow::Result<()>;
    async fn delete(&self, name: &str) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZMountResult {
    pub id: String,
}

pub struct ZMountManager {
    disks: Arc<dyn DiskBackend>,
}

impl ZMountManager {
    pub fn new(disks: Arc<dyn DiskBackend>) -> Self {
        Self { disks }
    }
}

#[async_trait]
impl Manager for ZMountManager {
    async fn provision(&self, ctx: &Context, wl: &WorkloadWithId) -> ManagerResult {
        let disk: ZMount = wl.decode().context("failed to decode reservation schema")?;
        let id = wl.id.to_string();
        let result = payload(&ZMountResult { id: id.clone() })?;

        if ctx.run(self.disks.exists(&id)).await?? {
            return Ok(Outcome::NoActionNeeded(result));
        }
        let path = ctx
            .run(self.disks.create(&id, disk.size))
            .await?
            .with_context(|| format!("failed to create disk '{id}'"))?;
        info!(disk = %id, path = %path, size = disk.size, "disk created");
        Ok(Outcome::Ok(result))
    }

    async fn deprovision(&self, ctx: &Context, wl: &WorkloadWithId) -> anyhow::Result<()> {
        let id = wl.id.to_string();
        ctx.run(self.disks.delete(&id))
            .await?
            .with_context(|| format!("failed to delete disk '{id}'"))
    }

    fn supports_update(&self) -> bool {
        true
    }

    /// Disks can only grow, and only while no running VM mounts them.
    async fn update(&self, ctx: &Context, wl: &WorkloadWithId) -> ManagerResult {
        let current = ctx
            .get_workload(&wl.name)
            .with_context(|| format!("no zmount workload with name '{}' is deployed", wl.name))?;
        let old: ZMount = current.decode().context("failed to decode reservation schema")?;
        let new: ZMount = wl.decode().context("failed to decode reservation schema")?;
        let id = wl.id.to_string();
        let result = payload(&ZMountResult { id: id.clone() })?;

        if new.size == old.size {
            return Ok(Outcome::NoActionNeeded(result));
        }
        if new.size < old.size {
            return Err(Failure::unchanged(anyhow!("not safe to shrink a disk")));
        }

        let deployment = ctx
            .deployment()
            .ok_or_else(|| Failure::unchanged(anyhow!("failed to get deployment")))?;
        let vms = deployment.by_type(&[ZMACHINE_TYPE.into()]);
        debug!(count = vms.len(), "found zmachines in deployment");
        for vm in vms {
            if !vm.result.state.is_okay() {
                continue;
            }
            let machine: ZMachine = vm
                .decode()
                .map_err(|e| Failure::unchanged(anyhow!(e).context("failed to load vm information")))?;
            if machine.mounts.iter().any(|mnt| mnt.name == wl.name) {
                return Err(Failure::unchanged(anyhow!(
                    "disk is mounted, please delete the VM first"
                )));
            }
        }

        // A failed resize leaves the disk intact.
        ctx.run(self.disks.resize(&id, new.size))
            .await?
            .map_err(Failure::unchanged)?;
        info!(disk = %id, from = old.size, to = new.size, "disk resized");
        Ok(Outcome::Ok(result))
    }
}
