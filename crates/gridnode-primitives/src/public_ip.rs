//! `ip` manager: public addresses routed to a workload.

use std::sync::Arc;

use anyhow::Context as _;
use async_trait::async_trait;
use gridnode_provision::{Context, Manager, ManagerResult, Outcome};
use gridnode_types::zos::PublicIp;
use gridnode_types::WorkloadWithId;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::payload;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicIpResult {
    /// CIDR notation.
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub ipv6: String,
    #[serde(default)]
    pub gateway: String,
}

#[async_trait]
pub trait PublicIpBackend: Send + Sync {
    async fn filter_exists(&self, name: &str) -> anyhow::Result<bool>;
    /// Reserve the requested address families and install the filter.
    async fn setup(&self, name: &str, config: &PublicIp) -> anyhow::Result<PublicIpResult>;
    async fn remove_filter(&self, name: &str) -> anyhow::Result<()>;
    async fn disconnect(&self, name: &str) -> anyhow::Result<()>;
}

pub struct PublicIpManager {
    backend: Arc<dyn PublicIpBackend>,
}

impl PublicIpManager {
    pub fn new(backend: Arc<dyn PublicIpBackend>) -> Self {
        Self { backend }
    }

    fn filter_name(wl: &WorkloadWithId) -> String {
        format!("r-{}", wl.id)
    }
}

#[async_trait]
impl Manager for PublicIpManager {
    async fn provision(&self, ctx: &Context, wl: &WorkloadWithId) -> ManagerResult {
        let config: PublicIp = wl.decode().context("failed to decode public ip schema")?;
        let name = Self::filter_name(wl);

        if ctx.run(self.backend.filter_exists(&name)).await?? {
            return Ok(Outcome::NoActionNeeded(wl.result.data.clone()));
        }

        let result = ctx
            .run(self.backend.setup(&name, &config))
            .await?
            .context("failed to setup public ip")?;
        info!(workload_id = %wl.id, ip = %result.ip, ipv6 = %result.ipv6, "public ip assigned");
        Ok(Outcome::Ok(payload(&result)?))
    }

    async fn deprovision(&self, ctx: &Context, wl: &WorkloadWithId) -> anyhow::Result<()> {
        let name = Self::filter_name(wl);
        if let Err(e) = ctx.run(self.backend.remove_filter(&name)).await? {
            warn!(filter = %name, error = %e, "could not remove filter rules");
        }
        ctx.run(self.backend.disconnect(&name))
            .await?
            .context("failed to disconnect public interface")
    }
}
