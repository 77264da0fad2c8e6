//! `zdb` manager: namespaces on the node's 0-db instances.
//!
//! Namespaces are never shrunk or switched between modes in place. Those
//! requests come back unchanged so the running namespace stays usable.

use std::sync::Arc;

use anyhow::{Context as _, anyhow};
use async_trait::async_trait;
use gridnode_provision::{Context, Failure, Manager, ManagerResult, Outcome};
use gridnode_types::zos::{Zdb, ZdbResult};
use gridnode_types::{Unit, WorkloadWithId};
use tracing::{debug, info};

use crate::payload;

/// Where a namespace can be reached.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ZdbEndpoint {
    pub ips: Vec<String>,
    pub port: u16,
}

/// Space accounting of the instance hosting a namespace.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ZdbSpace {
    pub free: Unit,
    pub reserved: Unit,
}

#[async_trait]
pub trait ZdbBackend: Send + Sync {
    /// Endpoint of the instance hosting `namespace`, if any.
    async fn find(&self, namespace: &str) -> anyhow::Result<Option<ZdbEndpoint>>;
    /// Place the namespace on an instance with room, starting one if needed.
    async fn create(&self, namespace: &str, config: &Zdb) -> anyhow::Result<ZdbEndpoint>;
    async fn delete(&self, namespace: &str) -> anyhow::Result<()>;
    async fn space(&self, namespace: &str) -> anyhow::Result<ZdbSpace>;
    async fn set_size(&self, namespace: &str, size: Unit) -> anyhow::Result<()>;
    async fn set_password(&self, namespace: &str, password: &str) -> anyhow::Result<()>;
    async fn set_public(&self, namespace: &str, public: bool) -> anyhow::Result<()>;
    async fn set_lock(&self, namespace: &str, locked: bool) -> anyhow::Result<()>;
}

pub struct ZdbManager {
    backend: Arc<dyn ZdbBackend>,
}

impl ZdbManager {
    pub fn new(backend: Arc<dyn ZdbBackend>) -> Self {
        Self { backend }
    }

    fn result(namespace: String, endpoint: ZdbEndpoint) -> anyhow::Result<serde_json::Value> {
        payload(&ZdbResult {
            namespace,
            ips: endpoint.ips,
            port: endpoint.port,
        })
    }

    async fn set_lock(&self, ctx: &Context, wl: &WorkloadWithId, locked: bool) -> Result<bool, Failure> {
        let namespace = wl.id.to_string();
        let found = ctx
            .run(self.backend.find(&namespace))
            .await?
            .map_err(Failure::unchanged)?;
        if found.is_none() {
            return Ok(false);
        }
        ctx.run(self.backend.set_lock(&namespace, locked))
            .await?
            .map_err(|e| Failure::unchanged(e.context("failed to set namespace locking")))?;
        Ok(true)
    }
}

#[async_trait]
impl Manager for ZdbManager {
    async fn provision(&self, ctx: &Context, wl: &WorkloadWithId) -> ManagerResult {
        let config: Zdb = wl.decode().context("failed to decode reservation schema")?;
        let namespace = wl.id.to_string();

        if let Some(endpoint) = ctx.run(self.backend.find(&namespace)).await?? {
            debug!(namespace = %namespace, "namespace already exists");
            return Ok(Outcome::NoActionNeeded(Self::result(namespace, endpoint)?));
        }

        let endpoint = ctx
            .run(self.backend.create(&namespace, &config))
            .await?
            .context("failed to create zdb namespace")?;
        info!(namespace = %namespace, size = config.size, mode = %config.mode, "namespace created");
        Ok(Outcome::Ok(Self::result(namespace, endpoint)?))
    }

    async fn deprovision(&self, ctx: &Context, wl: &WorkloadWithId) -> anyhow::Result<()> {
        let namespace = wl.id.to_string();
        if ctx.run(self.backend.find(&namespace)).await??.is_none() {
            return Ok(());
        }
        ctx.run(self.backend.delete(&namespace))
            .await?
            .context("failed to delete namespace")?;
        info!(namespace = %namespace, "namespace deleted");
        Ok(())
    }

    fn supports_update(&self) -> bool {
        true
    }

    async fn update(&self, ctx: &Context, wl: &WorkloadWithId) -> ManagerResult {
        let current = ctx
            .get_workload(&wl.name)
            .with_context(|| format!("no zdb workload with name '{}' is deployed", wl.name))?;
        let old: Zdb = current.decode().context("failed to decode reservation schema")?;
        let new: Zdb = wl.decode().context("failed to decode reservation schema")?;

        if new.mode != old.mode {
            return Err(Failure::unchanged(anyhow!("cannot change namespace mode")));
        }
        // A namespace set below its used size stops accepting writes
        // without reporting a smaller footprint.
        if new.size < old.size {
            return Err(Failure::unchanged(anyhow!("cannot shrink zdb namespace")));
        }

        if new.size == old.size && new.password == old.password && new.public == old.public {
            return Ok(Outcome::NoActionNeeded(current.result.data.clone()));
        }

        let namespace = wl.id.to_string();
        let endpoint = ctx
            .run(self.backend.find(&namespace))
            .await?
            .map_err(|e| Failure::unchanged(e.context("failed to list running zdbs")))?
            .ok_or_else(|| anyhow!("namespace not found"))?;

        if new.size != old.size {
            let space = ctx
                .run(self.backend.space(&namespace))
                .await?
                .map_err(|e| {
                    Failure::unchanged(e.context("failed to calculate free/reserved space from zdb"))
                })?;
            if space.reserved.saturating_add(new.size - old.size) > space.free {
                return Err(Failure::unchanged(anyhow!(
                    "no enough free space to support new size"
                )));
            }
            ctx.run(self.backend.set_size(&namespace, new.size))
                .await?
                .map_err(|e| Failure::unchanged(e.context("failed to set new zdb namespace size")))?;
        }
        if new.password != old.password {
            ctx.run(self.backend.set_password(&namespace, &new.password))
                .await?
                .map_err(|e| Failure::unchanged(e.context("failed to set new password")))?;
        }
        if new.public != old.public {
            ctx.run(self.backend.set_public(&namespace, new.public))
                .await?
                .map_err(|e| Failure::unchanged(e.context("failed to set public flag")))?;
        }

        info!(namespace = %namespace, size = new.size, "namespace updated");
        Ok(Outcome::Ok(Self::result(namespace, endpoint)?))
    }

    async fn pause(&self, ctx: &Context, wl: &WorkloadWithId) -> ManagerResult {
        if !self.set_lock(ctx, wl, true).await? {
            debug!(workload_id = %wl.id, "no namespace to lock");
        }
        Ok(Outcome::Paused)
    }

    async fn resume(&self, ctx: &Context, wl: &WorkloadWithId) -> ManagerResult {
        if !self.set_lock(ctx, wl, false).await? {
            debug!(workload_id = %wl.id, "no namespace to unlock");
        }
        Ok(Outcome::Ok(wl.result.data.clone()))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    use super::*;
    use gridnode_types::zos::{ZDB_TYPE, ZdbMode};
    use gridnode_types::{Deployment, GIGABYTE, ResultState, Workload, WorkloadGetter, WorkloadResult};
    use serde_json::json;

    #[derive(Default)]
    struct FakeZdb {
        namespaces: Mutex<BTreeMap<String, (Zdb, bool)>>,
        free: Unit,
    }

    impl FakeZdb {
        fn with_free(free: Unit) -> Self {
            Self {
                free,
                ..Default::default()
            }
        }

        fn get(&self, ns: &str) -> Option<(Zdb, bool)> {
            self.namespaces.lock().unwrap().get(ns).cloned()
        }

        fn modify(&self, ns: &str, f: impl FnOnce(&mut (Zdb, bool))) -> anyhow::Result<()> {
            let mut namespaces = self.namespaces.lock().unwrap();
            let entry = namespaces.get_mut(ns).ok_or_else(|| anyhow!("no such namespace"))?;
            f(entry);
            Ok(())
        }
    }

    fn endpoint() -> ZdbEndpoint {
        ZdbEndpoint {
            ips: vec!["10.0.0.5".into()],
            port: 9900,
        }
    }

    #[async_trait]
    impl ZdbBackend for FakeZdb {
        async fn find(&self, namespace: &str) -> anyhow::Result<Option<ZdbEndpoint>> {
            Ok(self.get(namespace).map(|_| endpoint()))
        }

        async fn create(&self, namespace: &str, config: &Zdb) -> anyhow::Result<ZdbEndpoint> {
            self.namespaces
                .lock()
                .unwrap()
                .insert(namespace.to_string(), (config.clone(), false));
            Ok(endpoint())
        }

        async fn delete(&self, namespace: &str) -> anyhow::Result<()> {
            self.namespaces.lock().unwrap().remove(namespace);
            Ok(())
        }

        async fn space(&self, _namespace: &str) -> anyhow::Result<ZdbSpace> {
            let reserved: Unit = self.namespaces.lock().unwrap().values().map(|(z, _)| z.size).sum();
            Ok(ZdbSpace {
                free: self.free,
                reserved,
            })
        }

        async fn set_size(&self, namespace: &str, size: Unit) -> anyhow::Result<()> {
            self.modify(namespace, |(z, _)| z.size = size)
        }

        async fn set_password(&self, namespace: &str, password: &str) -> anyhow::Result<()> {
            self.modify(namespace, |(z, _)| z.password = password.to_string())
        }

        async fn set_public(&self, namespace: &str, public: bool) -> anyhow::Result<()> {
            self.modify(namespace, |(z, _)| z.public = public)
        }

        async fn set_lock(&self, namespace: &str, locked: bool) -> anyhow::Result<()> {
            self.modify(namespace, |(_, l)| *l = locked)
        }
    }

    fn deployment(size: Unit, mode: &str, password: &str) -> Deployment {
        let mut wl = Workload::new(
            "db",
            ZDB_TYPE,
            json!({ "size": size, "mode": mode, "password": password }),
        );
        wl.result = WorkloadResult {
            created: 10,
            state: ResultState::Ok,
            ..Default::default()
        };
        Deployment {
            twin_id: 3,
            contract_id: 30,
            workloads: vec![wl],
            ..Default::default()
        }
    }

    /// Provision `current`, then return a context holding it plus the
    /// next version of the workload.
    async fn provisioned(
        manager: &ZdbManager,
        current: Deployment,
        next: Deployment,
    ) -> (Context, WorkloadWithId) {
        let ctx = Context::background();
        let wl = current.get("db").unwrap();
        manager.provision(&ctx, &wl).await.unwrap();
        let ctx = ctx.with_deployment(Arc::new(current));
        (ctx, next.get("db").unwrap())
    }

    #[tokio::test]
    async fn provision_twice_is_no_action() {
        let backend = Arc::new(FakeZdb::default());
        let manager = ZdbManager::new(backend.clone());
        let wl = deployment(GIGABYTE, "user", "").get("db").unwrap();
        let ctx = Context::background();

        let data = match manager.provision(&ctx, &wl).await.unwrap() {
            Outcome::Ok(data) => data,
            other => panic!("expected ok, got {other:?}"),
        };
        assert_eq!(data["namespace"], "3-30-db");
        assert_eq!(data["port"], 9900);

        let second = manager.provision(&ctx, &wl).await.unwrap();
        assert_eq!(second, Outcome::NoActionNeeded(data));
    }

    #[tokio::test]
    async fn shrink_is_unchanged() {
        let backend = Arc::new(FakeZdb::with_free(10 * GIGABYTE));
        let manager = ZdbManager::new(backend.clone());
        let (ctx, next) = provisioned(
            &manager,
            deployment(2 * GIGABYTE, "user", ""),
            deployment(GIGABYTE, "user", ""),
        )
        .await;

        let err = manager.update(&ctx, &next).await.unwrap_err();
        assert!(err.is_unchanged());
        assert_eq!(err.to_string(), "cannot shrink zdb namespace");
        assert_eq!(backend.get("3-30-db").unwrap().0.size, 2 * GIGABYTE);
    }

    #[tokio::test]
    async fn mode_change_is_unchanged() {
        let manager = ZdbManager::new(Arc::new(FakeZdb::with_free(10 * GIGABYTE)));
        let (ctx, next) = provisioned(
            &manager,
            deployment(GIGABYTE, "user", ""),
            deployment(GIGABYTE, "seq", ""),
        )
        .await;

        let err = manager.update(&ctx, &next).await.unwrap_err();
        assert!(err.is_unchanged());
        assert_eq!(err.to_string(), "cannot change namespace mode");
    }

    #[tokio::test]
    async fn identical_update_is_no_action() {
        let manager = ZdbManager::new(Arc::new(FakeZdb::with_free(10 * GIGABYTE)));
        let (ctx, next) = provisioned(
            &manager,
            deployment(GIGABYTE, "user", "pw"),
            deployment(GIGABYTE, "user", "pw"),
        )
        .await;
        assert!(matches!(
            manager.update(&ctx, &next).await.unwrap(),
            Outcome::NoActionNeeded(_)
        ));
    }

    #[tokio::test]
    async fn grow_needs_free_space() {
        // 1 GiB reserved of 2 GiB free: growing by 2 GiB does not fit.
        let backend = Arc::new(FakeZdb::with_free(2 * GIGABYTE));
        let manager = ZdbManager::new(backend.clone());
        let (ctx, next) = provisioned(
            &manager,
            deployment(GIGABYTE, "user", ""),
            deployment(3 * GIGABYTE, "user", ""),
        )
        .await;
        let err = manager.update(&ctx, &next).await.unwrap_err();
        assert!(err.is_unchanged());
        assert_eq!(err.to_string(), "no enough free space to support new size");

        // Growing by 1 GiB fits exactly.
        let next = deployment(2 * GIGABYTE, "user", "").get("db").unwrap();
        assert!(matches!(manager.update(&ctx, &next).await.unwrap(), Outcome::Ok(_)));
        assert_eq!(backend.get("3-30-db").unwrap().0.size, 2 * GIGABYTE);
    }

    #[tokio::test]
    async fn password_and_public_flag_update() {
        let backend = Arc::new(FakeZdb::default());
        let manager = ZdbManager::new(backend.clone());
        let mut next = deployment(GIGABYTE, "user", "new");
        next.workloads[0].data["public"] = json!(true);
        let (ctx, next) = provisioned(&manager, deployment(GIGABYTE, "user", "old"), next).await;

        assert!(matches!(manager.update(&ctx, &next).await.unwrap(), Outcome::Ok(_)));
        let (ns, _) = backend.get("3-30-db").unwrap();
        assert_eq!(ns.password, "new");
        assert!(ns.public);
        assert_eq!(ns.mode, ZdbMode::User);
    }

    #[tokio::test]
    async fn update_of_missing_namespace_fails() {
        let manager = ZdbManager::new(Arc::new(FakeZdb::default()));
        let current = deployment(GIGABYTE, "user", "");
        let ctx = Context::background().with_deployment(Arc::new(current));
        let next = deployment(2 * GIGABYTE, "user", "").get("db").unwrap();

        let err = manager.update(&ctx, &next).await.unwrap_err();
        assert!(!err.is_unchanged());
        assert_eq!(err.to_string(), "namespace not found");
    }

    #[tokio::test]
    async fn identical_update_of_missing_namespace_is_no_action() {
        let manager = ZdbManager::new(Arc::new(FakeZdb::default()));
        let current = deployment(GIGABYTE, "user", "pw");
        let ctx = Context::background().with_deployment(Arc::new(current));
        let next = deployment(GIGABYTE, "user", "pw").get("db").unwrap();

        assert!(matches!(
            manager.update(&ctx, &next).await.unwrap(),
            Outcome::NoActionNeeded(_)
        ));
    }

    #[tokio::test]
    async fn pause_locks_and_resume_unlocks() {
        let backend = Arc::new(FakeZdb::default());
        let manager = ZdbManager::new(backend.clone());
        let ctx = Context::background();
        let wl = deployment(GIGABYTE, "user", "").get("db").unwrap();
        manager.provision(&ctx, &wl).await.unwrap();

        assert_eq!(manager.pause(&ctx, &wl).await.unwrap(), Outcome::Paused);
        assert!(backend.get("3-30-db").unwrap().1);
        assert!(matches!(manager.resume(&ctx, &wl).await.unwrap(), Outcome::Ok(_)));
        assert!(!backend.get("3-30-db").unwrap().1);
    }

    #[tokio::test]
    async fn deprovision_tolerates_missing_namespace() {
        let backend = Arc::new(FakeZdb::default());
        let manager = ZdbManager::new(backend.clone());
        let ctx = Context::background();
        let wl = deployment(GIGABYTE, "user", "").get("db").unwrap();

        manager.deprovision(&ctx, &wl).await.unwrap();
        manager.provision(&ctx, &wl).await.unwrap();
        manager.deprovision(&ctx, &wl).await.unwrap();
        assert!(backend.get("3-30-db").is_none());
    }
}
