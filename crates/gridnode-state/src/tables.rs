//! redb table definitions for the deployment store.
//!
//! Keys are `&str`, values are JSON-serialized deployments.

use redb::TableDefinition;

/// Deployments keyed by `{twin}/{contract}`.
pub const DEPLOYMENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("deployments");

/// Key prefix shared by every deployment of one twin.
pub fn twin_prefix(twin: u32) -> String {
    format!("{twin}/")
}

pub fn deployment_key(twin: u32, contract: u64) -> String {
    format!("{twin}/{contract}")
}
