//! Key-value storage namespace payload.

use std::fmt;
use std::io::{self, Write};

use serde::{Deserialize, Serialize};

use crate::capacity::{Capacity, Unit};
use crate::error::{TypesError, TypesResult};
use crate::workload::{WorkloadData, WorkloadGetter};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ZdbMode {
    #[default]
    User,
    Seq,
}

impl fmt::Display for ZdbMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ZdbMode::User => f.write_str("user"),
            ZdbMode::Seq => f.write_str("seq"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Zdb {
    pub size: Unit,
    #[serde(default)]
    pub mode: ZdbMode,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub public: bool,
}

impl WorkloadData for Zdb {
    fn valid(&self, _getter: &dyn WorkloadGetter) -> TypesResult<()> {
        if self.size == 0 {
            return Err(TypesError::invalid("zdb namespace size cannot be zero"));
        }
        Ok(())
    }

    fn challenge(&self, w: &mut dyn Write) -> io::Result<()> {
        write!(w, "{}", self.size)?;
        write!(w, "{}", self.mode)?;
        write!(w, "{}", self.password)?;
        write!(w, "{}", self.public)
    }

    fn capacity(&self) -> TypesResult<Capacity> {
        Ok(Capacity {
            hru: self.size,
            ..Capacity::default()
        })
    }
}

/// Connection details returned once a namespace exists.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZdbResult {
    pub namespace: String,
    #[serde(default)]
    pub ips: Vec<String>,
    pub port: u16,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capacity::GIGABYTE;

    #[test]
    fn zdb_is_priced_in_hdd() {
        let zdb = Zdb {
            size: 10 * GIGABYTE,
            ..Default::default()
        };
        let cap = zdb.capacity().unwrap();
        assert_eq!(cap.hru, 10 * GIGABYTE);
        assert_eq!(cap.sru, 0);
    }

    #[test]
    fn mode_parses_lowercase() {
        let zdb: Zdb = serde_json::from_str(r#"{"size": 1, "mode": "seq"}"#).unwrap();
        assert_eq!(zdb.mode, ZdbMode::Seq);
        assert!(serde_json::from_str::<Zdb>(r#"{"size": 1, "mode": "other"}"#).is_err());
    }
}
