//! Block storage payloads: `volume` (shared filesystem) and `zmount` (raw disk).

use std::io::{self, Write};

use serde::{Deserialize, Serialize};

use crate::capacity::{Capacity, Unit};
use crate::error::{TypesError, TypesResult};
use crate::workload::{WorkloadData, WorkloadGetter};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    pub size: Unit,
}

impl WorkloadData for Volume {
    fn valid(&self, _getter: &dyn WorkloadGetter) -> TypesResult<()> {
        if self.size == 0 {
            return Err(TypesError::invalid("volume size cannot be zero"));
        }
        Ok(())
    }

    fn challenge(&self, w: &mut dyn Write) -> io::Result<()> {
        write!(w, "{}", self.size)
    }

    fn capacity(&self) -> TypesResult<Capacity> {
        Ok(Capacity {
            sru: self.size,
            ..Capacity::default()
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZMount {
    pub size: Unit,
}

impl WorkloadData for ZMount {
    fn valid(&self, _getter: &dyn WorkloadGetter) -> TypesResult<()> {
        if self.size == 0 {
            return Err(TypesError::invalid("disk size cannot be zero"));
        }
        Ok(())
    }

    fn challenge(&self, w: &mut dyn Write) -> io::Result<()> {
        write!(w, "{}", self.size)
    }

    fn capacity(&self) -> TypesResult<Capacity> {
        Ok(Capacity {
            sru: self.size,
            ..Capacity::default()
        })
    }
}
