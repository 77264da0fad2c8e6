//! `volume` manager: filesystem volumes on the node's storage pools.

use std::sync::Arc;

use anyhow::{Context as _, anyhow};
use async_trait::async_trait;
use gridnode_provision::{Context, Failure, Manager, ManagerResult, Outcome};
use gridnode_types::zos::Volume;
use gridnode_types::{Unit, WorkloadWithId};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::payload;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeInfo {
    pub name: String,
    pub path: String,
    pub size: Unit,
    /// Bytes actually written.
    pub used: Unit,
}

/// Storage pool operations used by [`VolumeManager`].
#[async_trait]
pub trait VolumeBackend: Send + Sync {
    async fn lookup(&self, name: &str) -> anyhow::Result<Option<VolumeInfo>>;
    async fn create(&self, name: &str, size: Unit) -> anyhow::Result<VolumeInfo>;
    async fn resize(&self, name: &str, size: Unit) -> anyhow::Result<()>;
    async fn delete(&self, name: &str) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeResult {
    pub id: String,
}

pub struct VolumeManager {
    backend: Arc<dyn VolumeBackend>,
}

impl VolumeManager {
    pub fn new(backend: Arc<dyn VolumeBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Manager for VolumeManager {
    async fn provision(&self, ctx: &Context, wl: &WorkloadWithId) -> ManagerResult {
        let volume: Volume = wl.decode().context("failed to parse workload data as volume")?;
        let name = wl.id.to_string();

        let existing = ctx
            .run(self.backend.lookup(&name))
            .await?
            .with_context(|| format!("failed to lookup volume with name '{name}'"))?;
        if existing.is_some() {
            debug!(volume = %name, "volume already exists");
            return Ok(Outcome::NoActionNeeded(payload(&VolumeResult { id: name })?));
        }

        let created = ctx
            .run(self.backend.create(&name, volume.size))
            .await?
            .with_context(|| format!("failed to create new volume with name '{name}'"))?;
        info!(volume = %created.name, size = volume.size, "volume created");
        Ok(Outcome::Ok(payload(&VolumeResult { id: created.name })?))
    }

    async fn deprovision(&self, ctx: &Context, wl: &WorkloadWithId) -> anyhow::Result<()> {
        let name = wl.id.to_string();
        if ctx
            .run(self.backend.lookup(&name))
            .await??
            .is_none()
        {
            debug!(volume = %name, "volume already gone");
            return Ok(());
        }
        ctx.run(self.backend.delete(&name))
            .await?
            .with_context(|| format!("failed to delete volume '{name}'"))?;
        info!(volume = %name, "volume deleted");
        Ok(())
    }

    fn supports_update(&self) -> bool {
        true
    }

    async fn update(&self, ctx: &Context, wl: &WorkloadWithId) -> ManagerResult {
        let volume: Volume = wl.decode().context("failed to parse workload data as volume")?;
        let name = wl.id.to_string();

        let info = ctx
            .run(self.backend.lookup(&name))
            .await?
            .with_context(|| format!("failed to lookup volume '{name}'"))?
            .ok_or_else(|| anyhow!("no volume with name '{name}' found"))?;

        if volume.size < info.used {
            return Err(Failure::unchanged(anyhow!(
                "cannot shrink volume to be less than provisioned space. old: {}, requested: {}",
                info.used,
                volume.size
            )));
        }
        if volume.size == info.size {
            return Ok(Outcome::NoActionNeeded(payload(&VolumeResult { id: name })?));
        }

        ctx.run(self.backend.resize(&name, volume.size))
            .await?
            .with_context(|| format!("failed to update volume '{name}'"))?;
        info!(volume = %name, from = info.size, to = volume.size, "volume resized");
        Ok(Outcome::Ok(payload(&VolumeResult { id: name })?))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    use super::*;
    use gridnode_types::zos::VOLUME_TYPE;
    use gridnode_types::{Workload, WorkloadId};
    use serde_json::json;

    #[derive(Default)]
    struct FakePool {
        volumes: Mutex<BTreeMap<String, VolumeInfo>>,
    }

    #[async_trait]
    impl VolumeBackend for FakePool {
        async fn lookup(&self, name: &str) -> anyhow::Result<Option<VolumeInfo>> {
            Ok(self.volumes.lock().unwrap().get(name).cloned())
        }

        async fn create(&self, name: &str, size: Unit) -> anyhow::Result<VolumeInfo> {
            let info = VolumeInfo {
                name: name.to_string(),
                path: format!("/mnt/{name}"),
                size,
                used: 0,
            };
            self.volumes.lock().unwrap().insert(name.to_string(), info.clone());
            Ok(info)
        }

        async fn resize(&self, name: &str, size: Unit) -> anyhow::Result<()> {
            let mut volumes = self.volumes.lock().unwrap();
            let info = volumes.get_mut(name).ok_or_else(|| anyhow!("not found"))?;
            info.size = size;
            Ok(())
        }

        async fn delete(&self, name: &str) -> anyhow::Result<()> {
            self.volumes.lock().unwrap().remove(name);
            Ok(())
        }
    }

    fn volume(size: Unit) -> WorkloadWithId {
        WorkloadWithId::new(
            WorkloadId::new(1, 2, "data").unwrap(),
            Workload::new("data", VOLUME_TYPE, json!({ "size": size })),
        )
    }

    #[tokio::test]
    async fn provision_is_idempotent() {
        let pool = Arc::new(FakePool::default());
        let manager = VolumeManager::new(pool.clone());
        let ctx = Context::background();

        let first = manager.provision(&ctx, &volume(100)).await.unwrap();
        assert_eq!(first, Outcome::Ok(json!({ "id": "1-2-data" })));
        let second = manager.provision(&ctx, &volume(100)).await.unwrap();
        assert_eq!(second, Outcome::NoActionNeeded(json!({ "id": "1-2-data" })));
        assert_eq!(pool.volumes.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn shrink_below_used_is_unchanged() {
        let pool = Arc::new(FakePool::default());
        let manager = VolumeManager::new(pool.clone());
        let ctx = Context::background();
        manager.provision(&ctx, &volume(100)).await.unwrap();
        pool.volumes.lock().unwrap().get_mut("1-2-data").unwrap().used = 80;

        let err = manager.update(&ctx, &volume(50)).await.unwrap_err();
        assert!(err.is_unchanged());

        // Shrinking to a size that still holds the data is allowed.
        assert!(matches!(
            manager.update(&ctx, &volume(90)).await.unwrap(),
            Outcome::Ok(_)
        ));
        assert_eq!(pool.volumes.lock().unwrap()["1-2-data"].size, 90);
        assert!(matches!(
            manager.update(&ctx, &volume(90)).await.unwrap(),
            Outcome::NoActionNeeded(_)
        ));
    }

    #[tokio::test]
    async fn update_of_missing_volume_fails() {
        let manager = VolumeManager::new(Arc::new(FakePool::default()));
        let err = manager
            .update(&Context::background(), &volume(10))
            .await
            .unwrap_err();
        assert!(!err.is_unchanged());
        assert_eq!(err.to_string(), "no volume with name '1-2-data' found");
    }

    #[tokio::test]
    async fn deprovision_tolerates_missing_volume() {
        let pool = Arc::new(FakePool::default());
        let manager = VolumeManager::new(pool.clone());
        let ctx = Context::background();
        manager.deprovision(&ctx, &volume(10)).await.unwrap();
        manager.provision(&ctx, &volume(10)).await.unwrap();
        manager.deprovision(&ctx, &volume(10)).await.unwrap();
        assert!(pool.volumes.lock().unwrap().is_empty());
    }
}
