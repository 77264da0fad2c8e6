//! Virtual machine payload.

use std::collections::BTreeMap;
use std::io::{self, Write};
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use super::{PUBLIC_IP_TYPE, ZMACHINE_TYPE, write_env};
use crate::capacity::{Capacity, GIGABYTE, MEGABYTE, Unit};
use crate::error::{TypesError, TypesResult};
use crate::workload::{Name, WorkloadData, WorkloadGetter, WorkloadType};

const RESERVED_NETWORKS: [&str; 2] = ["ygg", "pub"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineInterface {
    pub network: Name,
    pub ip: IpAddr,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineNetwork {
    /// Name of an `ip` workload in the same deployment, or empty.
    #[serde(default)]
    pub public_ip: Name,
    #[serde(default)]
    pub planetary: bool,
    #[serde(default)]
    pub interfaces: Vec<MachineInterface>,
}

impl MachineNetwork {
    fn challenge(&self, w: &mut dyn Write) -> io::Result<()> {
        write!(w, "{}", self.public_ip)?;
        write!(w, "{}", self.planetary)?;
        for inf in &self.interfaces {
            write!(w, "{}", inf.network)?;
            write!(w, "{}", inf.ip)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineCapacity {
    pub cpu: u8,
    pub memory: Unit,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineMount {
    pub name: Name,
    pub mountpoint: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZMachine {
    pub flist: String,
    pub network: MachineNetwork,
    /// Root disk size; 0 selects the minimum.
    #[serde(default)]
    pub size: Unit,
    pub compute_capacity: MachineCapacity,
    #[serde(default)]
    pub mounts: Vec<MachineMount>,
    #[serde(default)]
    pub entrypoint: String,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub corex: bool,
}

impl ZMachine {
    /// 500 MiB for machines below one compute unit, 2 GiB otherwise.
    pub fn min_root_size(&self) -> Unit {
        let cu = self.compute_capacity.cpu as Unit * self.compute_capacity.memory / (8 * GIGABYTE);
        if cu == 0 {
            500 * MEGABYTE
        } else {
            2 * GIGABYTE
        }
    }

    pub fn root_size(&self) -> Unit {
        self.size.max(self.min_root_size())
    }
}

impl WorkloadData for ZMachine {
    fn valid(&self, getter: &dyn WorkloadGetter) -> TypesResult<()> {
        if self.network.interfaces.len() != 1 {
            return Err(TypesError::invalid(
                "only one private network interface is supported",
            ));
        }
        if self.compute_capacity.cpu == 0 {
            return Err(TypesError::invalid("cpu capacity can't be 0"));
        }
        if self.compute_capacity.memory < 250 * MEGABYTE {
            return Err(TypesError::invalid("memory capacity can't be less than 250M"));
        }
        let min_root = self.min_root_size();
        if self.size != 0 && self.size < min_root {
            return Err(TypesError::invalid(format!(
                "disk size can't be less than {min_root}, set to 0 for minimum"
            )));
        }

        if !self.network.public_ip.is_empty() {
            let wl = getter
                .get(&self.network.public_ip)
                .map_err(|_| TypesError::invalid("public ip is not found"))?;
            if wl.typ != PUBLIC_IP_TYPE {
                return Err(TypesError::invalid(format!(
                    "workload of name '{}' is not a public ip",
                    self.network.public_ip
                )));
            }

            let mut count = 0;
            for vm in getter.by_type(&[WorkloadType::from(ZMACHINE_TYPE)]) {
                let data: ZMachine = vm.decode()?;
                if data.network.public_ip == self.network.public_ip {
                    count += 1;
                }
            }
            if count > 1 {
                return Err(TypesError::invalid("public ip is assigned to multiple vms"));
            }
        }

        for inf in &self.network.interfaces {
            if RESERVED_NETWORKS.contains(&inf.network.as_str()) {
                return Err(TypesError::invalid(format!(
                    "'{}' is a reserved network name",
                    inf.network
                )));
            }
        }
        Ok(())
    }

    fn challenge(&self, w: &mut dyn Write) -> io::Result<()> {
        write!(w, "{}", self.flist)?;
        self.network.challenge(w)?;
        write!(w, "{}", self.size)?;
        write!(w, "{}", self.compute_capacity.cpu)?;
        write!(w, "{}", self.compute_capacity.memory)?;
        for mnt in &self.mounts {
            write!(w, "{}", mnt.name)?;
            write!(w, "{}", mnt.mountpoint)?;
        }
        write!(w, "{}", self.entrypoint)?;
        write_env(w, &self.env)
    }

    fn capacity(&self) -> TypesResult<Capacity> {
        Ok(Capacity {
            cru: self.compute_capacity.cpu as u64,
            mru: self.compute_capacity.memory,
            sru: self.root_size(),
            ..Capacity::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vm(cpu: u8, memory: Unit, size: Unit) -> ZMachine {
        ZMachine {
            flist: "https://hub/vm.flist".into(),
            network: MachineNetwork {
                interfaces: vec![MachineInterface {
                    network: "net".into(),
                    ip: "10.1.1.2".parse().unwrap(),
                }],
                ..Default::default()
            },
            size,
            compute_capacity: MachineCapacity { cpu, memory },
            ..Default::default()
        }
    }

    #[test]
    fn root_size_minimums() {
        assert_eq!(vm(1, GIGABYTE, 0).root_size(), 500 * MEGABYTE);
        assert_eq!(vm(2, 4 * GIGABYTE, 0).root_size(), 2 * GIGABYTE);
        assert_eq!(vm(2, 4 * GIGABYTE, 10 * GIGABYTE).root_size(), 10 * GIGABYTE);
    }

    #[test]
    fn capacity_counts_root_disk() {
        let cap = vm(2, 4 * GIGABYTE, 0).capacity().unwrap();
        assert_eq!(cap.cru, 2);
        assert_eq!(cap.mru, 4 * GIGABYTE);
        assert_eq!(cap.sru, 2 * GIGABYTE);
    }

    #[test]
    fn validation_rules() {
        let getter = crate::deployment::Deployment::default();
        assert!(vm(1, GIGABYTE, 0).valid(&getter).is_ok());
        assert!(vm(0, GIGABYTE, 0).valid(&getter).is_err());
        assert!(vm(1, 100 * MEGABYTE, 0).valid(&getter).is_err());
        assert!(vm(2, 8 * GIGABYTE, GIGABYTE).valid(&getter).is_err());

        let mut reserved = vm(1, GIGABYTE, 0);
        reserved.network.interfaces[0].network = "ygg".into();
        assert!(reserved.valid(&getter).is_err());

        let mut missing_ip = vm(1, GIGABYTE, 0);
        missing_ip.network.public_ip = "ip1".into();
        assert!(missing_ip.valid(&getter).is_err());
    }
}
