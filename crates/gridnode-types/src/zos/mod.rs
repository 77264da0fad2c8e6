//! Concrete workload payloads understood by a node.

mod container;
mod gateway;
mod network;
mod public_ip;
mod volume;
mod zdb;
mod zmachine;

use std::io::{self, Write};
use std::sync::Arc;

pub use container::{Container, ContainerCapacity, DiskType, Member, Mount};
pub use gateway::{Backend, GatewayFqdnProxy, GatewayNameProxy};
pub use network::{IpNet, Network, Peer};
pub use public_ip::PublicIp;
pub use volume::{Volume, ZMount};
pub use zdb::{Zdb, ZdbMode, ZdbResult};
pub use zmachine::{MachineCapacity, MachineInterface, MachineMount, MachineNetwork, ZMachine};

use crate::registry::TypeRegistry;

pub const NETWORK_TYPE: &str = "network";
pub const CONTAINER_TYPE: &str = "container";
pub const ZMACHINE_TYPE: &str = "zmachine";
pub const VOLUME_TYPE: &str = "volume";
pub const ZMOUNT_TYPE: &str = "zmount";
pub const ZDB_TYPE: &str = "zdb";
pub const PUBLIC_IP_TYPE: &str = "ip";
pub const GATEWAY_NAME_PROXY_TYPE: &str = "gateway-name-proxy";
pub const GATEWAY_FQDN_PROXY_TYPE: &str = "gateway-fqdn-proxy";

/// Register every built-in payload type.
pub fn register_all(registry: &mut TypeRegistry) {
    registry.register_sharable::<Network>(NETWORK_TYPE);
    registry.register::<Container>(CONTAINER_TYPE);
    registry.register::<ZMachine>(ZMACHINE_TYPE);
    registry.register::<Volume>(VOLUME_TYPE);
    registry.register::<ZMount>(ZMOUNT_TYPE);
    registry.register::<Zdb>(ZDB_TYPE);
    registry.register::<PublicIp>(PUBLIC_IP_TYPE);
    registry.register::<GatewayNameProxy>(GATEWAY_NAME_PROXY_TYPE);
    registry.register::<GatewayFqdnProxy>(GATEWAY_FQDN_PROXY_TYPE);
}

/// A fresh registry holding all built-in types.
pub fn default_registry() -> Arc<TypeRegistry> {
    let mut registry = TypeRegistry::new();
    register_all(&mut registry);
    Arc::new(registry)
}

/// Environment maps are written sorted by key as `k=v`.
fn write_env(w: &mut dyn Write, env: &std::collections::BTreeMap<String, String>) -> io::Result<()> {
    for (k, v) in env {
        write!(w, "{k}={v}")?;
    }
    Ok(())
}
