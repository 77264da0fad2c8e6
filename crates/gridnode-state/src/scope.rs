//! Name resolution across a twin's deployments.

use gridnode_types::{Deployment, TypesError, TypesResult, WorkloadGetter, WorkloadType, WorkloadWithId};
use tracing::warn;

use crate::store::StateStore;

/// [`WorkloadGetter`] that sees every workload of one deployment plus the
/// sharable workloads of the same twin's other stored deployments.
///
/// Workloads of the deployment itself shadow same-named sharable ones.
pub struct TwinScope<'a> {
    store: &'a StateStore,
    deployment: &'a Deployment,
}

impl<'a> TwinScope<'a> {
    pub fn new(store: &'a StateStore, deployment: &'a Deployment) -> Self {
        Self { store, deployment }
    }

    fn shared(&self) -> TypesResult<Vec<WorkloadWithId>> {
        let others = self
            .store
            .by_twin(self.deployment.twin_id)
            .map_err(|e| TypesError::invalid(format!("failed to list twin deployments: {e}")))?;
        Ok(others
            .iter()
            .filter(|d| d.contract_id != self.deployment.contract_id)
            .flat_map(|d| d.shareables(self.store.registry()))
            .collect())
    }
}

impl WorkloadGetter for TwinScope<'_> {
    fn get(&self, name: &str) -> TypesResult<WorkloadWithId> {
        match self.deployment.get(name) {
            Err(TypesError::WorkloadNotFound(_)) => {}
            other => return other,
        }
        self.shared()?
            .into_iter()
            .find(|wl| wl.name == name)
            .ok_or_else(|| TypesError::WorkloadNotFound(format!("no workload with name '{name}'")))
    }

    fn by_type(&self, types: &[WorkloadType]) -> Vec<WorkloadWithId> {
        let mut results = self.deployment.by_type(types);
        match self.shared() {
            Ok(shared) => results.extend(shared.into_iter().filter(|wl| types.contains(&wl.typ))),
            Err(e) => warn!(twin = self.deployment.twin_id, error = %e, "failed to resolve shared workloads"),
        }
        results
    }
}
