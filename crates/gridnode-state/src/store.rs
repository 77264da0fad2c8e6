//! StateStore: redb-backed deployment persistence.
//!
//! Every value is a JSON-serialized [`Deployment`]. The store supports both
//! on-disk and in-memory backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use gridnode_types::{
    Deployment, TypeRegistry, WorkloadGetter, WorkloadId, WorkloadResult, WorkloadType,
    WorkloadWithId,
};
use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::{debug, warn};

use crate::error::{StateError, StateResult};
use crate::scope::TwinScope;
use crate::storage::{Storage, StorageCapacity};
use crate::tables::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe deployment store backed by redb.
///
/// Holds the type registry so stored payloads can be priced.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
    registry: Arc<TypeRegistry>,
}

impl StateStore {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path, registry: Arc<TypeRegistry>) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self {
            db: Arc::new(db),
            registry,
        };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory store (for testing).
    pub fn open_in_memory(registry: Arc<TypeRegistry>) -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self {
            db: Arc::new(db),
            registry,
        };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    /// Name resolution scoped to `deployment` plus its twin's sharable workloads.
    pub fn scope<'a>(&'a self, deployment: &'a Deployment) -> TwinScope<'a> {
        TwinScope::new(self, deployment)
    }

    // ── Deployments ────────────────────────────────────────────────

    /// Store a new deployment. Fails if one exists under the same key.
    pub fn create(&self, deployment: &Deployment) -> StateResult<()> {
        let key = deployment.key();
        let value = serde_json::to_vec(deployment).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
            if table.get(key.as_str()).map_err(map_err!(Read))?.is_some() {
                return Err(StateError::Exists(key));
            }
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, "deployment created");
        Ok(())
    }

    /// Insert or replace a deployment.
    pub fn put_deployment(&self, deployment: &Deployment) -> StateResult<()> {
        let key = deployment.key();
        let value = serde_json::to_vec(deployment).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, "deployment stored");
        Ok(())
    }

    pub fn get_deployment(&self, twin: u32, contract: u64) -> StateResult<Option<Deployment>> {
        let key = deployment_key(twin, contract);
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
        match table.get(key.as_str()).map_err(map_err!(Read))? {
            Some(guard) => {
                let deployment: Deployment =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(deployment))
            }
            None => Ok(None),
        }
    }

    /// List all deployments, ordered by key.
    pub fn list_deployments(&self) -> StateResult<Vec<Deployment>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let deployment: Deployment =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(deployment);
        }
        Ok(results)
    }

    /// All deployments owned by `twin`.
    pub fn by_twin(&self, twin: u32) -> StateResult<Vec<Deployment>> {
        let prefix = twin_prefix(twin);
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(&prefix) {
                let deployment: Deployment =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                results.push(deployment);
            }
        }
        Ok(results)
    }

    /// Distinct twins with at least one stored deployment.
    pub fn twins(&self) -> StateResult<Vec<u32>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
        let mut twins = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, _) = entry.map_err(map_err!(Read))?;
            let Some(twin) = key
                .value()
                .split_once('/')
                .and_then(|(t, _)| t.parse::<u32>().ok())
            else {
                warn!(key = key.value(), "malformed deployment key");
                continue;
            };
            twins.push(twin);
        }
        twins.sort_unstable();
        twins.dedup();
        Ok(twins)
    }

    /// Delete a deployment. Returns true if it existed.
    pub fn delete_deployment(&self, twin: u32, contract: u64) -> StateResult<bool> {
        let key = deployment_key(twin, contract);
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
            existed = table.remove(key.as_str()).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, existed, "deployment deleted");
        Ok(existed)
    }

    // ── Workloads ──────────────────────────────────────────────────

    /// Record the result of a reconciliation attempt on one workload.
    ///
    /// Read-modify-write happens inside a single write transaction.
    pub fn set_workload_result(&self, id: &WorkloadId, result: WorkloadResult) -> StateResult<()> {
        let (twin, contract, name) = id.parts()?;
        let key = deployment_key(twin, contract);
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
            let mut deployment: Deployment = match table.get(key.as_str()).map_err(map_err!(Read))? {
                Some(guard) => serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?,
                None => return Err(StateError::NotFound(key)),
            };
            let wl = deployment
                .get_mut(&name)
                .ok_or_else(|| StateError::NotFound(id.to_string()))?;
            wl.result = result;
            let value = serde_json::to_vec(&deployment).map_err(map_err!(Serialize))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%id, "workload result stored");
        Ok(())
    }
}

impl Storage for StateStore {
    fn capacity(&self, exclude: &[WorkloadId]) -> StateResult<StorageCapacity> {
        let mut storage_cap = StorageCapacity::default();
        for deployment in self.list_deployments()? {
            let mut is_active = false;
            for wl in &deployment.workloads {
                if !wl.result.state.is_okay() {
                    continue;
                }
                let id = WorkloadId::new(deployment.twin_id, deployment.contract_id, &wl.name)?;
                if exclude.contains(&id) {
                    continue;
                }
                let cap = wl.capacity(&self.registry)?;
                is_active = true;
                storage_cap.workloads += 1;
                storage_cap.cap.add(&cap);
                storage_cap.last_deployment_timestamp =
                    storage_cap.last_deployment_timestamp.max(wl.result.created);
            }
            if is_active {
                storage_cap.deployments.push(deployment);
            }
        }
        Ok(storage_cap)
    }

    fn get_workload(&self, id: &WorkloadId) -> StateResult<WorkloadWithId> {
        let (twin, contract, name) = id.parts()?;
        let deployment = self
            .get_deployment(twin, contract)?
            .ok_or_else(|| StateError::NotFound(deployment_key(twin, contract)))?;
        Ok(deployment.get(&name)?)
    }

    fn by_type(&self, twin: u32, types: &[WorkloadType]) -> StateResult<Vec<WorkloadWithId>> {
        Ok(self
            .by_twin(twin)?
            .iter()
            .flat_map(|d| d.by_type(types))
            .collect())
    }
}
