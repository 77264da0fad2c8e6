//! Deployment envelope: versioned, signed collection of workloads owned by one twin.

use std::collections::HashSet;
use std::fmt;
use std::io::Write;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::error::{TypesError, TypesResult};
use crate::registry::TypeRegistry;
use crate::signature::{
    KeyGetter, Signature, SignatureRequirement, SignatureStyle, Signer, verifier_for,
};
use crate::workload::{
    is_valid_name, ResultState, Timestamp, Workload, WorkloadGetter, WorkloadId, WorkloadType,
    WorkloadWithId,
};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Deployment {
    #[serde(default)]
    pub version: u32,
    pub twin_id: u32,
    #[serde(default)]
    pub contract_id: u64,
    #[serde(default)]
    pub metadata: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub expiration: Timestamp,
    #[serde(default)]
    pub signature_requirement: SignatureRequirement,
    #[serde(default)]
    pub workloads: Vec<Workload>,
}

/// Change applied to one workload when moving between deployment versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobOperation {
    Remove,
    Add,
    Update,
    /// Workload version did not move; leave it alone.
    None,
}

impl fmt::Display for JobOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobOperation::Remove => "remove",
            JobOperation::Add => "add",
            JobOperation::Update => "update",
            JobOperation::None => "none",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpgradeOp {
    pub workload: WorkloadWithId,
    pub op: JobOperation,
}

impl Deployment {
    fn with_id(&self, wl: &Workload) -> TypesResult<WorkloadWithId> {
        let id = WorkloadId::new(self.twin_id, self.contract_id, &wl.name)?;
        Ok(WorkloadWithId::new(id, wl.clone()))
    }

    /// Key under which this deployment is persisted.
    pub fn key(&self) -> String {
        format!("{}/{}", self.twin_id, self.contract_id)
    }

    // ── Challenge & signatures ─────────────────────────────────

    /// Write the signature pre-image: header fields, every workload in
    /// order, then the signature requirement. The contract id is left out
    /// since contracts are created from this hash.
    pub fn challenge(&self, registry: &TypeRegistry, w: &mut dyn Write) -> TypesResult<()> {
        write!(w, "{}", self.version)?;
        write!(w, "{}", self.twin_id)?;
        write!(w, "{}", self.metadata)?;
        write!(w, "{}", self.description)?;
        write!(w, "{}", self.expiration)?;
        for wl in &self.workloads {
            wl.challenge(registry, w)?;
        }
        self.signature_requirement.challenge(w)?;
        Ok(())
    }

    /// SHA-256 of the challenge bytes.
    pub fn challenge_hash(&self, registry: &TypeRegistry) -> TypesResult<Vec<u8>> {
        let mut buf = Vec::new();
        self.challenge(registry, &mut buf)?;
        Ok(Sha256::digest(&buf).to_vec())
    }

    /// Sign the challenge hash as `twin`, replacing any earlier signature by that twin.
    pub fn sign(&mut self, registry: &TypeRegistry, twin: u32, signer: &dyn Signer) -> TypesResult<()> {
        let message = self.challenge_hash(registry)?;
        let signature = hex::encode(signer.sign(&message)?);

        let signatures = &mut self.signature_requirement.signatures;
        if let Some(existing) = signatures.iter_mut().find(|s| s.twin_id == twin) {
            existing.signature = signature;
            existing.signature_type = signer.kind().to_string();
            return Ok(());
        }
        signatures.push(Signature {
            twin_id: twin,
            signature,
            signature_type: signer.kind().to_string(),
        });
        Ok(())
    }

    /// Check the threshold signature requirement.
    ///
    /// The owning twin must be among the requests and is always treated as
    /// required. Signatures from twins that were not requested are rejected.
    pub fn verify(&self, registry: &TypeRegistry, keys: &dyn KeyGetter) -> TypesResult<()> {
        let mut message = self.challenge_hash(registry)?;
        let requirement = &self.signature_requirement;
        if requirement.signature_style == SignatureStyle::PolkaWallet {
            message = format!("<Bytes>{}</Bytes>", hex::encode(&message)).into_bytes();
        }

        for sig in &requirement.signatures {
            if !requirement.requests.iter().any(|r| r.twin_id == sig.twin_id) {
                return Err(TypesError::Signature(format!(
                    "unexpected signature from twin '{}'",
                    sig.twin_id
                )));
            }
        }

        let mut originator_found = false;
        let mut weight = 0u64;
        for request in &requirement.requests {
            let mut required = request.required;
            if request.twin_id == self.twin_id {
                originator_found = true;
                required = true;
            }

            let Some(signature) = requirement.signature_of(request.twin_id) else {
                if required {
                    return Err(TypesError::Signature(format!(
                        "missing required signature for twin '{}'",
                        request.twin_id
                    )));
                }
                continue;
            };

            let key = keys.get_key(request.twin_id).map_err(|e| {
                TypesError::Signature(format!(
                    "failed to get public key for twin '{}': {e}",
                    request.twin_id
                ))
            })?;
            let verifier = verifier_for(&signature.signature_type, key)?;
            let bytes = hex::decode(&signature.signature)
                .map_err(|e| TypesError::Signature(format!("invalid signature: {e}")))?;
            if !verifier.verify(&message, &bytes) {
                return Err(TypesError::Signature(format!(
                    "failed to verify signature of twin '{}'",
                    request.twin_id
                )));
            }
            weight = weight.checked_add(request.weight).ok_or_else(|| {
                TypesError::Signature("signature weights overflow".into())
            })?;
        }

        if !originator_found {
            return Err(TypesError::Signature(
                "originator twin id must be in the signature requests".into(),
            ));
        }
        if weight < requirement.weight_required {
            return Err(TypesError::Signature(format!(
                "required signature weight is not reached ({weight} < {})",
                requirement.weight_required
            )));
        }
        Ok(())
    }

    // ── Validation ─────────────────────────────────────────────

    /// Names are valid and unique, no workload is ahead of the deployment
    /// version, and every payload validates against its siblings.
    pub fn valid(&self, registry: &TypeRegistry) -> TypesResult<()> {
        self.valid_with(registry, self)
    }

    /// Like [`valid`](Self::valid), resolving cross-references through
    /// `getter` (e.g. one that also sees the twin's sharable workloads).
    pub fn valid_with(&self, registry: &TypeRegistry, getter: &dyn WorkloadGetter) -> TypesResult<()> {
        let mut names = HashSet::new();
        for wl in &self.workloads {
            if wl.version > self.version {
                return Err(TypesError::invalid(format!(
                    "workload '{}' version '{}' cannot be higher than deployment version '{}'",
                    wl.name, wl.version, self.version
                )));
            }
            is_valid_name(&wl.name)?;
            if !names.insert(wl.name.as_str()) {
                return Err(TypesError::invalid(format!(
                    "multiple workloads with the same name '{}'",
                    wl.name
                )));
            }
            wl.valid(registry, getter)?;
        }
        Ok(())
    }

    // ── Lifecycle helpers ──────────────────────────────────────

    /// True while at least one workload is neither deleted nor failed.
    pub fn is_active(&self) -> bool {
        self.workloads
            .iter()
            .any(|wl| !wl.result.state.is_any(&[ResultState::Deleted, ResultState::Error]))
    }

    /// Mark every workload as failed with `message`.
    pub fn set_error(&mut self, message: &str) {
        for wl in &mut self.workloads {
            wl.result.state = ResultState::Error;
            wl.result.error = message.to_string();
        }
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Workload> {
        self.workloads.iter_mut().find(|wl| wl.name == name)
    }

    /// Workloads whose type the registry marks as sharable.
    pub fn shareables(&self, registry: &TypeRegistry) -> Vec<WorkloadWithId> {
        self.workloads
            .iter()
            .filter(|wl| registry.is_sharable(&wl.typ))
            .filter_map(|wl| match self.with_id(wl) {
                Ok(w) => Some(w),
                Err(e) => {
                    warn!(name = %wl.name, error = %e, "deployment has invalid workload name");
                    None
                }
            })
            .collect()
    }

    /// Compute the operations that move this deployment to `next`.
    ///
    /// `next` must be valid and exactly one version ahead. Workloads that
    /// survive keep their previous result; removed workloads come last.
    pub fn upgrade(&self, registry: &TypeRegistry, next: &Deployment) -> TypesResult<Vec<UpgradeOp>> {
        next.valid(registry)
            .map_err(|e| TypesError::invalid(format!("new deployment is invalid: {e}")))?;

        if self.twin_id != next.twin_id || self.contract_id != next.contract_id {
            return Err(TypesError::invalid("cannot change deployment or twin id"));
        }

        let expected = self.version + 1;
        if next.version != expected {
            return Err(TypesError::invalid(format!(
                "expecting deployment version {expected}, got {}",
                next.version
            )));
        }

        let mut ops = Vec::with_capacity(next.workloads.len());
        for wl in &next.workloads {
            let mut with_id = next.with_id(wl)?;
            let op = match self.workloads.iter().find(|old| old.name == wl.name) {
                None if wl.version == expected => JobOperation::Add,
                None => {
                    return Err(TypesError::invalid(format!(
                        "invalid version number for workload '{}' expected '{expected}'",
                        wl.name
                    )));
                }
                Some(old) => {
                    if old.typ != wl.typ {
                        return Err(TypesError::invalid(format!(
                            "cannot change workload type '{}'",
                            wl.name
                        )));
                    }
                    with_id.result = old.result.clone();
                    if wl.version == expected {
                        JobOperation::Update
                    } else {
                        JobOperation::None
                    }
                }
            };
            ops.push(UpgradeOp {
                workload: with_id,
                op,
            });
        }

        for old in &self.workloads {
            if next.workloads.iter().any(|wl| wl.name == old.name) {
                continue;
            }
            ops.push(UpgradeOp {
                workload: self.with_id(old)?,
                op: JobOperation::Remove,
            });
        }
        Ok(ops)
    }
}

impl WorkloadGetter for Deployment {
    fn get(&self, name: &str) -> TypesResult<WorkloadWithId> {
        is_valid_name(name)?;
        let wl = self
            .workloads
            .iter()
            .find(|wl| wl.name == name)
            .ok_or_else(|| TypesError::WorkloadNotFound(format!("no workload with name '{name}'")))?;
        self.with_id(wl)
    }

    fn by_type(&self, types: &[WorkloadType]) -> Vec<WorkloadWithId> {
        self.workloads
            .iter()
            .filter(|wl| types.contains(&wl.typ))
            .filter_map(|wl| self.with_id(wl).ok())
            .collect()
    }
}
