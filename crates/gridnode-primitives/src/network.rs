//! `network` manager: private overlay networks.

use std::sync::Arc;

use anyhow::Context as _;
use async_trait::async_trait;
use gridnode_provision::{Context, Manager, ManagerResult, Outcome};
use gridnode_types::zos::Network;
use gridnode_types::{ResultState, WorkloadId, WorkloadWithId};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::payload;

/// A network as currently applied on the node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkInfo {
    pub namespace: String,
    pub config: Network,
}

#[async_trait]
pub trait Networker: Send + Sync {
    async fn lookup(&self, id: &str) -> anyhow::Result<Option<NetworkInfo>>;
    /// Create the network or reconcile an existing one to `config`.
    /// Returns the name of the network namespace.
    async fn create_or_update(&self, id: &str, config: &Network) -> anyhow::Result<String>;
    async fn delete(&self, id: &str) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkResult {
    pub namespace: String,
}

pub struct NetworkManager {
    networker: Arc<dyn Networker>,
}

impl NetworkManager {
    pub fn new(networker: Arc<dyn Networker>) -> Self {
        Self { networker }
    }

    /// Networks are addressed by owner twin and name, so sibling
    /// deployments of one twin resolve to the same resource.
    pub fn network_id(id: &WorkloadId) -> anyhow::Result<String> {
        let (twin, _, name) = id.parts()?;
        Ok(format!("{twin}-{name}"))
    }

    async fn apply(&self, ctx: &Context, wl: &WorkloadWithId) -> ManagerResult {
        let config: Network = wl.decode().context("failed to decode network schema")?;
        let id = Self::network_id(&wl.id)?;

        // Only a workload that already owns the network may skip setup; a
        // sibling deployment's fresh workload still counts as a new user.
        if wl.result.state == ResultState::Ok {
            let existing = ctx
                .run(self.networker.lookup(&id))
                .await?
                .with_context(|| format!("failed to look up network '{id}'"))?;
            if let Some(existing) = existing.filter(|n| n.config == config) {
                debug!(network = %id, "network already up to date");
                return Ok(Outcome::NoActionNeeded(payload(&NetworkResult {
                    namespace: existing.namespace,
                })?));
            }
        }

        let namespace = ctx
            .run(self.networker.create_or_update(&id, &config))
            .await?
            .with_context(|| format!("failed to setup network '{id}'"))?;
        info!(network = %id, namespace = %namespace, "network ready");
        Ok(Outcome::Ok(payload(&NetworkResult { namespace })?))
    }
}

#[async_trait]
impl Manager for NetworkManager {
    async fn provision(&self, ctx: &Context, wl: &WorkloadWithId) -> ManagerResult {
        self.apply(ctx, wl).await
    }

    async fn deprovision(&self, ctx: &Context, wl: &WorkloadWithId) -> anyhow::Result<()> {
        let id = Self::network_id(&wl.id)?;
        ctx.run(self.networker.delete(&id))
            .await?
            .with_context(|| format!("failed to delete network '{id}'"))
    }

    fn supports_update(&self) -> bool {
        true
    }

    async fn update(&self, ctx: &Context, wl: &WorkloadWithId) -> ManagerResult {
        self.apply(ctx, wl).await
    }
}
