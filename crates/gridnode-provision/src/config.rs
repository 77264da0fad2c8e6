//! Node configuration loaded from TOML.

use std::path::{Path, PathBuf};
use std::time::Duration;

use gridnode_types::{Capacity, GIGABYTE};
use serde::{Deserialize, Serialize};

use crate::error::{ProvisionError, ProvisionResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Capacity set aside for the node's own services.
    pub reserved: Capacity,
    /// Advertised total; probed from hardware when absent.
    pub total: Option<Capacity>,
    /// redb database file holding deployments.
    pub state_path: PathBuf,
    /// Mask UUIDs in handler error messages.
    pub redact_errors: bool,
    pub usage_report_interval_secs: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            reserved: Capacity {
                mru: 2 * GIGABYTE,
                ..Capacity::default()
            },
            total: None,
            state_path: PathBuf::from("/var/lib/gridnode/state.redb"),
            redact_errors: true,
            usage_report_interval_secs: 120,
        }
    }
}

impl NodeConfig {
    pub fn from_file(path: &Path) -> ProvisionResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ProvisionError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> ProvisionResult<Self> {
        toml::from_str(content).map_err(|e| ProvisionError::Config(e.to_string()))
    }

    pub fn usage_report_interval(&self) -> Duration {
        Duration::from_secs(self.usage_report_interval_secs)
    }
}
