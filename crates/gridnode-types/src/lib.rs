//! gridnode-types: data model for node-side workload provisioning.
//!
//! Capacity accounting, the workload and deployment envelopes with their
//! challenge encoding and threshold signatures, and the registry that maps
//! workload type names to payload implementations. Built-in payloads live
//! in [`zos`].

pub mod capacity;
pub mod deployment;
pub mod error;
pub mod registry;
pub mod signature;
pub mod workload;
pub mod zos;

pub use capacity::{Capacity, GIGABYTE, KILOBYTE, MEGABYTE, TERABYTE, Unit};
pub use deployment::{Deployment, JobOperation, UpgradeOp};
pub use error::{TypesError, TypesResult};
pub use registry::TypeRegistry;
pub use signature::{
    Ed25519Signer, Ed25519VerifyingKey, KeyGetter, Signature, SignatureRequest,
    SignatureRequirement, SignatureStyle, Signer, Sr25519Signer, Sr25519VerifyingKey, Verifier,
};
pub use workload::{
    Name, ResultState, Timestamp, Workload, WorkloadData, WorkloadGetter, WorkloadId,
    WorkloadResult, WorkloadType, WorkloadWithId, is_valid_name, now,
};
