//! Assembly of the provisioning stack from runtime collaborators.

use std::sync::Arc;

use gridnode_provision::{
    Counters, HostMemory, Manager, MapProvisioner, NodeConfig, ProvisionError, ProvisionResult,
    Statistics,
};
use gridnode_state::Storage;
use gridnode_types::zos::{
    CONTAINER_TYPE, GATEWAY_FQDN_PROXY_TYPE, GATEWAY_NAME_PROXY_TYPE, NETWORK_TYPE,
    PUBLIC_IP_TYPE, VOLUME_TYPE, ZDB_TYPE, ZMACHINE_TYPE, ZMOUNT_TYPE,
};
use gridnode_types::{Capacity, TypeRegistry, WorkloadType};
use tracing::{info, warn};

use crate::container::{ContainerManager, ContainerRuntime};
use crate::gateway::{FqdnProxyManager, GatewayBackend, NameProxyManager};
use crate::network::{NetworkManager, Networker};
use crate::public_ip::{PublicIpBackend, PublicIpManager};
use crate::vm::{VmManager, VmRuntime};
use crate::volume::{VolumeBackend, VolumeManager};
use crate::zdb::{ZdbBackend, ZdbManager};
use crate::zmount::{DiskBackend, ZMountManager};

/// The managers a node runs, one per workload type.
#[derive(Default)]
pub struct ManagerSet {
    managers: Vec<(WorkloadType, Arc<dyn Manager>)>,
}

impl ManagerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the manager for `typ`.
    pub fn with_manager(mut self, typ: impl Into<WorkloadType>, manager: Arc<dyn Manager>) -> Self {
        let typ = typ.into();
        self.managers.retain(|(t, _)| t != &typ);
        self.managers.push((typ, manager));
        self
    }

    pub fn with_volumes(self, backend: Arc<dyn VolumeBackend>) -> Self {
        self.with_manager(VOLUME_TYPE, Arc::new(VolumeManager::new(backend)))
    }

    pub fn with_disks(self, backend: Arc<dyn DiskBackend>) -> Self {
        self.with_manager(ZMOUNT_TYPE, Arc::new(ZMountManager::new(backend)))
    }

    pub fn with_zdb(self, backend: Arc<dyn ZdbBackend>) -> Self {
        self.with_manager(ZDB_TYPE, Arc::new(ZdbManager::new(backend)))
    }

    pub fn with_networker(self, networker: Arc<dyn Networker>) -> Self {
        self.with_manager(NETWORK_TYPE, Arc::new(NetworkManager::new(networker)))
    }

    pub fn with_containers(self, runtime: Arc<dyn ContainerRuntime>) -> Self {
        self.with_manager(CONTAINER_TYPE, Arc::new(ContainerManager::new(runtime)))
    }

    pub fn with_vms(self, runtime: Arc<dyn VmRuntime>) -> Self {
        self.with_manager(ZMACHINE_TYPE, Arc::new(VmManager::new(runtime)))
    }

    pub fn with_public_ips(self, backend: Arc<dyn PublicIpBackend>) -> Self {
        self.with_manager(PUBLIC_IP_TYPE, Arc::new(PublicIpManager::new(backend)))
    }

    pub fn with_gateways(self, backend: Arc<dyn GatewayBackend>) -> Self {
        self.with_manager(
            GATEWAY_NAME_PROXY_TYPE,
            Arc::new(NameProxyManager::new(Arc::clone(&backend))),
        )
        .with_manager(GATEWAY_FQDN_PROXY_TYPE, Arc::new(FqdnProxyManager::new(backend)))
    }

    pub fn types(&self) -> Vec<WorkloadType> {
        self.managers.iter().map(|(t, _)| t.clone()).collect()
    }

    /// Build the routing table. Every manager type must be registered.
    pub fn into_dispatcher(self, registry: Arc<TypeRegistry>) -> ProvisionResult<MapProvisioner> {
        let mut dispatcher = MapProvisioner::new(Arc::clone(&registry));
        for (typ, manager) in self.managers {
            if !registry.contains(&typ) {
                return Err(ProvisionError::UnknownType(typ.to_string()));
            }
            dispatcher = dispatcher.with_manager(typ, manager);
        }
        Ok(dispatcher)
    }
}

/// Dispatcher with counters, wrapped in admission control.
///
/// The advertised total comes from `config.total`; without it only memory
/// is known, taken from the host.
pub fn build_provisioner(
    config: &NodeConfig,
    managers: ManagerSet,
    storage: Arc<dyn Storage>,
    host: Arc<dyn HostMemory>,
    registry: Arc<TypeRegistry>,
) -> ProvisionResult<Statistics<MapProvisioner>> {
    let total = match config.total {
        Some(total) => total,
        None => {
            let memory = host.memory()?;
            warn!(mru = memory.total, "no total capacity configured, using host memory only");
            Capacity {
                mru: memory.total,
                ..Capacity::default()
            }
        }
    };

    let counters = Arc::new(Counters::new(&registry));
    let dispatcher = managers
        .into_dispatcher(Arc::clone(&registry))?
        .with_counters(counters)
        .with_redaction(config.redact_errors);

    let unhandled = dispatcher.unhandled_types();
    if !unhandled.is_empty() {
        warn!(types = ?unhandled, "registered workload types without a manager");
    }
    info!(total = %total, reserved = %config.reserved, "provisioner ready");

    Ok(Statistics::new(
        dispatcher,
        total,
        config.reserved,
        storage,
        host,
        registry,
    ))
}
