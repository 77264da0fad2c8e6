//! gridnode-primitives: the built-in workload managers.
//!
//! Each manager drives one narrow runtime collaborator trait (storage
//! pools, 0-db, the networker, container and VM runtimes, the gateway
//! proxy). Real integrations implement those traits; [`build_provisioner`]
//! wires whatever a node has into the provisioning engine.

pub mod container;
pub mod gateway;
pub mod network;
pub mod public_ip;
pub mod set;
pub mod vm;
pub mod volume;
pub mod zdb;
pub mod zmount;

pub use container::{ContainerInfo, ContainerManager, ContainerResult, ContainerRuntime};
pub use gateway::{
    FqdnProxyManager, GatewayBackend, GatewayProxyResult, GatewayRoute, NameProxyManager,
};
pub use network::{NetworkInfo, NetworkManager, NetworkResult, Networker};
pub use public_ip::{PublicIpBackend, PublicIpManager, PublicIpResult};
pub use set::{ManagerSet, build_provisioner};
pub use vm::{VmInfo, VmManager, VmRuntime, VmSpec, ZMachineResult};
pub use volume::{VolumeBackend, VolumeInfo, VolumeManager, VolumeResult};
pub use zdb::{ZdbBackend, ZdbEndpoint, ZdbManager, ZdbSpace};
pub use zmount::{DiskBackend, ZMountManager, ZMountResult};

use serde::Serialize;

/// Encode a manager result payload.
pub(crate) fn payload<T: Serialize>(value: &T) -> anyhow::Result<serde_json::Value> {
    Ok(serde_json::to_value(value)?)
}
