//! `container` manager.

use std::net::IpAddr;
use std::sync::Arc;

use anyhow::Context as _;
use async_trait::async_trait;
use gridnode_provision::{Context, Manager, ManagerResult, Outcome};
use gridnode_types::zos::Container;
use gridnode_types::WorkloadWithId;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::payload;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerInfo {
    pub running: bool,
    pub ip: Option<IpAddr>,
}

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn inspect(&self, id: &str) -> anyhow::Result<Option<ContainerInfo>>;
    /// Mount the flist, attach networks and volumes, and start the container.
    async fn run(&self, id: &str, config: &Container) -> anyhow::Result<ContainerInfo>;
    async fn delete(&self, id: &str) -> anyhow::Result<()>;
    async fn freeze(&self, id: &str) -> anyhow::Result<()>;
    async fn thaw(&self, id: &str) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerResult {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<IpAddr>,
}

pub struct ContainerManager {
    runtime: Arc<dyn ContainerRuntime>,
}

impl ContainerManager {
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self { runtime }
    }
}

#[async_trait]
impl Manager for ContainerManager {
    async fn provision(&self, ctx: &Context, wl: &WorkloadWithId) -> ManagerResult {
        let config: Container = wl.decode().context("failed to decode container schema")?;
        let id = wl.id.to_string();

        match ctx.run(self.runtime.inspect(&id)).await?? {
            Some(info) if info.running => {
                debug!(container = %id, "container already running");
                return Ok(Outcome::NoActionNeeded(payload(&ContainerResult { id, ip: info.ip })?));
            }
            Some(_) => {
                warn!(container = %id, "removing stopped container before restart");
                ctx.run(self.runtime.delete(&id))
                    .await?
                    .context("failed to remove stopped container")?;
            }
            None => {}
        }

        let info = ctx
            .run(self.runtime.run(&id, &config))
            .await?
            .with_context(|| format!("failed to start container '{id}'"))?;
        info!(container = %id, flist = %config.flist, "container started");
        Ok(Outcome::Ok(payload(&ContainerResult { id, ip: info.ip })?))
    }

    async fn deprovision(&self, ctx: &Context, wl: &WorkloadWithId) -> anyhow::Result<()> {
        let id = wl.id.to_string();
        if ctx.run(self.runtime.inspect(&id)).await??.is_none() {
            return Ok(());
        }
        ctx.run(self.runtime.delete(&id))
            .await?
            .with_context(|| format!("failed to delete container '{id}'"))?;
        info!(container = %id, "container deleted");
        Ok(())
    }

    async fn pause(&self, ctx: &Context, wl: &WorkloadWithId) -> ManagerResult {
        let id = wl.id.to_string();
        ctx.run(self.runtime.freeze(&id))
            .await?
            .context("failed to freeze container")?;
        Ok(Outcome::Paused)
    }

    async fn resume(&self, ctx: &Context, wl: &WorkloadWithId) -> ManagerResult {
        let id = wl.id.to_string();
        ctx.run(self.runtime.thaw(&id))
            .await?
            .context("failed to thaw container")?;
        Ok(Outcome::Ok(wl.result.data.clone()))
    }
}
