//! Private overlay network resource.

use std::fmt;
use std::io::{self, Write};
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::capacity::Capacity;
use crate::error::{TypesError, TypesResult};
use crate::workload::{WorkloadData, WorkloadGetter};

/// CIDR notation network, e.g. `10.1.0.0/16`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IpNet(String);

impl IpNet {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Parse into address and prefix length.
    pub fn parse(&self) -> TypesResult<(IpAddr, u8)> {
        let invalid = || TypesError::invalid(format!("invalid ip network '{}'", self.0));
        let (addr, prefix) = self.0.split_once('/').ok_or_else(invalid)?;
        let addr: IpAddr = addr.parse().map_err(|_| invalid())?;
        let prefix: u8 = prefix.parse().map_err(|_| invalid())?;
        let max = if addr.is_ipv4() { 32 } else { 128 };
        if prefix > max {
            return Err(invalid());
        }
        Ok((addr, prefix))
    }
}

impl fmt::Display for IpNet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    pub subnet: IpNet,
    pub wireguard_public_key: String,
    #[serde(default)]
    pub allowed_ips: Vec<IpNet>,
    #[serde(default)]
    pub endpoint: String,
}

impl Peer {
    fn valid(&self) -> TypesResult<()> {
        if self.subnet.is_empty() {
            return Err(TypesError::invalid("peer wireguard subnet cannot be empty"));
        }
        self.subnet.parse()?;
        if self.allowed_ips.is_empty() {
            return Err(TypesError::invalid("peer wireguard allowed ips cannot be empty"));
        }
        for ip in &self.allowed_ips {
            ip.parse()?;
        }
        if self.wireguard_public_key.is_empty() {
            return Err(TypesError::invalid("peer wireguard public key cannot be empty"));
        }
        Ok(())
    }

    fn challenge(&self, w: &mut dyn Write) -> io::Result<()> {
        write!(w, "{}", self.wireguard_public_key)?;
        write!(w, "{}", self.endpoint)?;
        write!(w, "{}", self.subnet)?;
        for ip in &self.allowed_ips {
            write!(w, "{ip}")?;
        }
        Ok(())
    }
}

/// The node-local slice of a tenant's private network.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Network {
    pub ip_range: IpNet,
    pub subnet: IpNet,
    pub wireguard_private_key: String,
    #[serde(default)]
    pub wireguard_listen_port: u16,
    #[serde(default)]
    pub peers: Vec<Peer>,
}

impl WorkloadData for Network {
    fn valid(&self, _getter: &dyn WorkloadGetter) -> TypesResult<()> {
        if self.ip_range.is_empty() {
            return Err(TypesError::invalid("network ip range cannot be empty"));
        }
        self.ip_range.parse()?;
        if self.subnet.is_empty() {
            return Err(TypesError::invalid("network resource subnet cannot be empty"));
        }
        self.subnet.parse()?;
        if self.wireguard_private_key.is_empty() {
            return Err(TypesError::invalid(
                "network resource wireguard private key cannot be empty",
            ));
        }
        for peer in &self.peers {
            peer.valid()?;
        }
        Ok(())
    }

    fn challenge(&self, w: &mut dyn Write) -> io::Result<()> {
        write!(w, "{}", self.ip_range)?;
        write!(w, "{}", self.subnet)?;
        write!(w, "{}", self.wireguard_private_key)?;
        write!(w, "{}", self.wireguard_listen_port)?;
        for peer in &self.peers {
            peer.challenge(w)?;
        }
        Ok(())
    }

    fn capacity(&self) -> TypesResult<Capacity> {
        Ok(Capacity::zero())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deployment::Deployment;

    fn network() -> Network {
        Network {
            ip_range: IpNet::new("10.1.0.0/16"),
            subnet: IpNet::new("10.1.1.0/24"),
            wireguard_private_key: "key".into(),
            wireguard_listen_port: 6000,
            peers: vec![],
        }
    }

    #[test]
    fn ip_net_parsing() {
        assert!(IpNet::new("10.0.0.0/8").parse().is_ok());
        assert!(IpNet::new("fd00::/64").parse().is_ok());
        assert!(IpNet::new("10.0.0.0/33").parse().is_err());
        assert!(IpNet::new("10.0.0.0").parse().is_err());
        assert!(IpNet::new("nope/8").parse().is_err());
    }

    #[test]
    fn network_validation() {
        let getter = Deployment::default();
        assert!(network().valid(&getter).is_ok());

        let mut bad = network();
        bad.wireguard_private_key.clear();
        assert!(bad.valid(&getter).is_err());

        let mut bad_peer = network();
        bad_peer.peers.push(Peer {
            subnet: IpNet::new("10.1.2.0/24"),
            wireguard_public_key: "pk".into(),
            allowed_ips: vec![],
            endpoint: String::new(),
        });
        assert!(bad_peer.valid(&getter).is_err());
    }

    #[test]
    fn network_is_free() {
        assert!(network().capacity().unwrap().is_zero());
    }
}
