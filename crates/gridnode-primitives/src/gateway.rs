//! Gateway proxy managers: `gateway-name-proxy` and `gateway-fqdn-proxy`.

use std::sync::Arc;

use anyhow::Context as _;
use async_trait::async_trait;
use gridnode_provision::{Context, Manager, ManagerResult, Outcome};
use gridnode_types::zos::{GatewayFqdnProxy, GatewayNameProxy};
use gridnode_types::{ResultState, WorkloadWithId};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::payload;

/// A proxy route as currently configured on the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayRoute {
    Name { config: GatewayNameProxy, fqdn: String },
    Fqdn(GatewayFqdnProxy),
}

/// Reverse proxy configuration on a gateway node.
#[async_trait]
pub trait GatewayBackend: Send + Sync {
    async fn get(&self, id: &str) -> anyhow::Result<Option<GatewayRoute>>;
    /// Route `name` under the gateway's domain. Returns the full fqdn.
    async fn set_name_proxy(&self, id: &str, config: &GatewayNameProxy) -> anyhow::Result<String>;
    async fn set_fqdn_proxy(&self, id: &str, config: &GatewayFqdnProxy) -> anyhow::Result<()>;
    async fn delete(&self, id: &str) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayProxyResult {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub fqdn: String,
}

/// The configured route of a workload that was already provisioned.
async fn current_route(
    backend: &dyn GatewayBackend,
    ctx: &Context,
    wl: &WorkloadWithId,
) -> anyhow::Result<Option<GatewayRoute>> {
    if wl.result.state != ResultState::Ok {
        return Ok(None);
    }
    let id = wl.id.to_string();
    ctx.run(backend.get(&id))
        .await?
        .with_context(|| format!("failed to look up proxy '{id}'"))
}

pub struct NameProxyManager {
    backend: Arc<dyn GatewayBackend>,
}

impl NameProxyManager {
    pub fn new(backend: Arc<dyn GatewayBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Manager for NameProxyManager {
    async fn provision(&self, ctx: &Context, wl: &WorkloadWithId) -> ManagerResult {
        let config: GatewayNameProxy = wl.decode().context("failed to decode gateway schema")?;
        let id = wl.id.to_string();
        match current_route(self.backend.as_ref(), ctx, wl).await? {
            Some(GatewayRoute::Name { config: existing, fqdn }) if existing == config => {
                debug!(workload_id = %id, "name proxy already configured");
                return Ok(Outcome::NoActionNeeded(payload(&GatewayProxyResult { fqdn })?));
            }
            _ => {}
        }
        let fqdn = ctx
            .run(self.backend.set_name_proxy(&id, &config))
            .await?
            .context("failed to setup name proxy")?;
        info!(workload_id = %id, fqdn = %fqdn, "name proxy configured");
        Ok(Outcome::Ok(payload(&GatewayProxyResult { fqdn })?))
    }

    async fn deprovision(&self, ctx: &Context, wl: &WorkloadWithId) -> anyhow::Result<()> {
        let id = wl.id.to_string();
        ctx.run(self.backend.delete(&id))
            .await?
            .context("failed to delete name proxy")
    }

    fn supports_update(&self) -> bool {
        true
    }

    async fn update(&self, ctx: &Context, wl: &WorkloadWithId) -> ManagerResult {
        self.provision(ctx, wl).await
    }
}

pub struct FqdnProxyManager {
    backend: Arc<dyn GatewayBackend>,
}

impl FqdnProxyManager {
    pub fn new(backend: Arc<dyn GatewayBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Manager for FqdnProxyManager {
    async fn provision(&self, ctx: &Context, wl: &WorkloadWithId) -> ManagerResult {
        let config: GatewayFqdnProxy = wl.decode().context("failed to decode gateway schema")?;
        let id = wl.id.to_string();
        match current_route(self.backend.as_ref(), ctx, wl).await? {
            Some(GatewayRoute::Fqdn(existing)) if existing == config => {
                debug!(workload_id = %id, "fqdn proxy already configured");
                return Ok(Outcome::NoActionNeeded(payload(&GatewayProxyResult::default())?));
            }
            _ => {}
        }
        ctx.run(self.backend.set_fqdn_proxy(&id, &config))
            .await?
            .context("failed to setup fqdn proxy")?;
        info!(workload_id = %id, fqdn = %config.fqdn, "fqdn proxy configured");
        Ok(Outcome::Ok(payload(&GatewayProxyResult::default())?))
    }

    async fn deprovision(&self, ctx: &Context, wl: &WorkloadWithId) -> anyhow::Result<()> {
        let id = wl.id.to_string();
        ctx.run(self.backend.delete(&id))
            .await?
            .context("failed to delete fqdn proxy")
    }

    fn supports_update(&self) -> bool {
        true
    }

    async fn update(&self, ctx: &Context, wl: &WorkloadWithId) -> ManagerResult {
        self.provision(ctx, wl).await
    }
}
