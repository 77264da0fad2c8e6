//! gridnode-state: persisted deployments for a node.
//!
//! Backed by [redb](https://docs.rs/redb). Deployments are stored whole,
//! JSON-serialized, under `{twin}/{contract}` keys; workloads are never
//! hard-deleted, they carry a `deleted` result instead.
//!
//! [`StateStore`] implements the [`Storage`] contract used by admission
//! control, and [`TwinScope`] resolves workload names across a twin's
//! deployments so sharable workloads can be referenced.

pub mod error;
pub mod scope;
pub mod storage;
pub mod store;
pub mod tables;

pub use error::{StateError, StateResult};
pub use scope::TwinScope;
pub use storage::{Storage, StorageCapacity};
pub use store::StateStore;
