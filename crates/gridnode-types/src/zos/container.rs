//! Container payload.

use std::collections::BTreeMap;
use std::fmt;
use std::io::{self, Write};
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use super::{NETWORK_TYPE, VOLUME_TYPE, write_env};
use crate::capacity::Capacity;
use crate::error::{TypesError, TypesResult};
use crate::workload::{Name, ResultState, WorkloadData, WorkloadGetter};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiskType {
    #[default]
    Ssd,
    Hdd,
}

impl fmt::Display for DiskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiskType::Ssd => f.write_str("ssd"),
            DiskType::Hdd => f.write_str("hdd"),
        }
    }
}

/// Attachment of a container to a private network workload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub network: Name,
    #[serde(default)]
    pub ips: Vec<IpAddr>,
    #[serde(default)]
    pub public_ip6: bool,
    #[serde(default)]
    pub yggdrasil_ip: bool,
}

impl Member {
    fn challenge(&self, w: &mut dyn Write) -> io::Result<()> {
        write!(w, "{}", self.network)?;
        for ip in &self.ips {
            write!(w, "{ip}")?;
        }
        write!(w, "{}", self.public_ip6)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mount {
    pub volume: Name,
    pub mountpoint: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerCapacity {
    pub cpu: u64,
    /// Bytes.
    pub memory: u64,
    #[serde(default)]
    pub disk_type: DiskType,
    /// Root disk size in bytes.
    #[serde(default)]
    pub disk_size: u64,
}

impl ContainerCapacity {
    fn challenge(&self, w: &mut dyn Write) -> io::Result<()> {
        write!(w, "{}", self.cpu)?;
        write!(w, "{}", self.memory)?;
        write!(w, "{}", self.disk_size)?;
        write!(w, "{}", self.disk_type)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Container {
    pub flist: String,
    #[serde(default)]
    pub hub_url: String,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub entrypoint: String,
    #[serde(default)]
    pub interactive: bool,
    #[serde(default)]
    pub mounts: Vec<Mount>,
    pub network: Member,
    pub capacity: ContainerCapacity,
}

impl WorkloadData for Container {
    fn valid(&self, getter: &dyn WorkloadGetter) -> TypesResult<()> {
        for mnt in &self.mounts {
            let wl = getter.get(&mnt.volume).map_err(|e| {
                TypesError::invalid(format!("mount volume '{}' is not found: {e}", mnt.volume))
            })?;
            if wl.typ != VOLUME_TYPE {
                return Err(TypesError::invalid(format!(
                    "workload of name '{}' is not a volume",
                    mnt.volume
                )));
            }
        }

        let net = getter.get(&self.network.network).map_err(|e| {
            TypesError::invalid(format!(
                "network '{}' is not found: {e}",
                self.network.network
            ))
        })?;
        if net.typ != NETWORK_TYPE {
            return Err(TypesError::invalid(format!(
                "workload of name '{}' is not a network",
                self.network.network
            )));
        }
        if !net.is_result(ResultState::Ok) {
            return Err(TypesError::invalid(format!(
                "network '{}' is not ready (state: {})",
                self.network.network, net.result.state
            )));
        }

        if self.capacity.cpu == 0 {
            return Err(TypesError::invalid("container cpu cannot be 0"));
        }
        Ok(())
    }

    fn challenge(&self, w: &mut dyn Write) -> io::Result<()> {
        write!(w, "{}", self.flist)?;
        write!(w, "{}", self.hub_url)?;
        write!(w, "{}", self.entrypoint)?;
        write!(w, "{}", self.interactive)?;
        write_env(w, &self.env)?;
        for mnt in &self.mounts {
            write!(w, "{}", mnt.volume)?;
            write!(w, "{}", mnt.mountpoint)?;
        }
        self.network.challenge(w)?;
        self.capacity.challenge(w)
    }

    fn capacity(&self) -> TypesResult<Capacity> {
        let mut cap = Capacity {
            cru: self.capacity.cpu,
            mru: self.capacity.memory,
            ..Capacity::default()
        };
        match self.capacity.disk_type {
            DiskType::Ssd => cap.sru = self.capacity.disk_size,
            DiskType::Hdd => cap.hru = self.capacity.disk_size,
        }
        Ok(cap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capacity::GIGABYTE;

    #[test]
    fn capacity_by_disk_type() {
        let mut c = Container {
            capacity: ContainerCapacity {
                cpu: 2,
                memory: GIGABYTE,
                disk_type: DiskType::Hdd,
                disk_size: 10 * GIGABYTE,
            },
            ..Default::default()
        };
        let cap = WorkloadData::capacity(&c).unwrap();
        assert_eq!((cap.cru, cap.mru, cap.hru, cap.sru), (2, GIGABYTE, 10 * GIGABYTE, 0));

        c.capacity.disk_type = DiskType::Ssd;
        let cap = WorkloadData::capacity(&c).unwrap();
        assert_eq!((cap.hru, cap.sru), (0, 10 * GIGABYTE));
    }

    #[test]
    fn env_is_written_sorted() {
        let c = Container {
            env: BTreeMap::from([("b".into(), "2".into()), ("a".into(), "1".into())]),
            ..Default::default()
        };
        let mut buf = Vec::new();
        c.challenge(&mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("a=1b=2"));
    }
}
