//! `zmachine` manager: virtual machines.

use std::net::IpAddr;
use std::sync::Arc;

use anyhow::Context as _;
use async_trait::async_trait;
use gridnode_provision::{Context, Manager, ManagerResult, Outcome};
use gridnode_types::zos::ZMachine;
use gridnode_types::{Unit, WorkloadWithId};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::payload;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VmInfo {
    pub ip: Option<IpAddr>,
    pub planetary_ip: Option<IpAddr>,
}

/// What the hypervisor is asked to boot.
#[derive(Debug, Clone, PartialEq)]
pub struct VmSpec<'a> {
    pub config: &'a ZMachine,
    /// Root disk size after applying the minimum.
    pub root_size: Unit,
}

#[async_trait]
pub trait VmRuntime: Send + Sync {
    async fn inspect(&self, id: &str) -> anyhow::Result<Option<VmInfo>>;
    async fn run(&self, id: &str, spec: &VmSpec<'_>) -> anyhow::Result<VmInfo>;
    async fn delete(&self, id: &str) -> anyhow::Result<()>;
    async fn pause(&self, id: &str) -> anyhow::Result<()>;
    async fn resume(&self, id: &str) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZMachineResult {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<IpAddr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub planetary_ip: Option<IpAddr>,
}

impl ZMachineResult {
    fn new(id: String, info: VmInfo) -> Self {
        Self {
            id,
            ip: info.ip,
            planetary_ip: info.planetary_ip,
        }
    }
}

pub struct VmManager {
    runtime: Arc<dyn VmRuntime>,
}

impl VmManager {
    pub fn new(runtime: Arc<dyn VmRuntime>) -> Self {
        Self { runtime }
    }
}

#[async_trait]
impl Manager for VmManager {
    async fn provision(&self, ctx: &Context, wl: &WorkloadWithId) -> ManagerResult {
        let config: ZMachine = wl.decode().context("failed to decode zmachine schema")?;
        let id = wl.id.to_string();

        if let Some(info) = ctx.run(self.runtime.inspect(&id)).await?? {
            debug!(vm = %id, "vm already exists");
            return Ok(Outcome::NoActionNeeded(payload(&ZMachineResult::new(id, info))?));
        }

        let spec = VmSpec {
            config: &config,
            root_size: config.root_size(),
        };
        let info = ctx
            .run(self.runtime.run(&id, &spec))
            .await?
            .with_context(|| format!("failed to start vm '{id}'"))?;
        info!(
            vm = %id,
            cpu = config.compute_capacity.cpu,
            memory = config.compute_capacity.memory,
            root_size = spec.root_size,
            "vm started"
        );
        Ok(Outcome::Ok(payload(&ZMachineResult::new(id, info))?))
    }

    async fn deprovision(&self, ctx: &Context, wl: &WorkloadWithId) -> anyhow::Result<()> {
        let id = wl.id.to_string();
        if ctx.run(self.runtime.inspect(&id)).await??.is_none() {
            return Ok(());
        }
        ctx.run(self.runtime.delete(&id))
            .await?
            .with_context(|| format!("failed to delete vm '{id}'"))?;
        info!(vm = %id, "vm deleted");
        Ok(())
    }

    async fn pause(&self, ctx: &Context, wl: &WorkloadWithId) -> ManagerResult {
        let id = wl.id.to_string();
        ctx.run(self.runtime.pause(&id)).await?.context("failed to pause vm")?;
        Ok(Outcome::Paused)
    }

    async fn resume(&self, ctx: &Context, wl: &WorkloadWithId) -> ManagerResult {
        let id = wl.id.to_string();
        ctx.run(self.runtime.resume(&id)).await?.context("failed to resume vm")?;
        Ok(Outcome::Ok(wl.result.data.clone()))
    }
}
