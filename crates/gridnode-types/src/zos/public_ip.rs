use std::io::{self, Write};

use serde::{Deserialize, Serialize};

use crate::capacity::Capacity;
use crate::error::{TypesError, TypesResult};
use crate::workload::{WorkloadData, WorkloadGetter};

/// Public address reservation. Only v4 addresses are counted as capacity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicIp {
    #[serde(default)]
    pub v4: bool,
    #[serde(default)]
    pub v6: bool,
}

impl WorkloadData for PublicIp {
    fn valid(&self, _getter: &dyn WorkloadGetter) -> TypesResult<()> {
        if !self.v4 && !self.v6 {
            return Err(TypesError::invalid("public ip must request at least one address family"));
        }
        Ok(())
    }

    fn challenge(&self, w: &mut dyn Write) -> io::Result<()> {
        write!(w, "{}", self.v4)?;
        write!(w, "{}", self.v6)
    }

    fn capacity(&self) -> TypesResult<Capacity> {
        Ok(Capacity {
            ipv4u: u64::from(self.v4),
            ..Capacity::default()
        })
    }
}
