//! Workload type registry.
//!
//! Maps a type name to the function that decodes its JSON payload into a
//! [`WorkloadData`] trait object. Dispatch on the payload happens exactly
//! once, through [`TypeRegistry::decode`]; nothing downstream inspects
//! concrete payload types.

use std::collections::BTreeMap;
use std::fmt;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{TypesError, TypesResult};
use crate::workload::{WorkloadData, WorkloadType};

type DecodeFn = fn(&Value) -> Result<Box<dyn WorkloadData>, serde_json::Error>;

#[derive(Clone, Copy)]
struct TypeEntry {
    sharable: bool,
    decode: DecodeFn,
}

fn decode_as<T>(value: &Value) -> Result<Box<dyn WorkloadData>, serde_json::Error>
where
    T: WorkloadData + DeserializeOwned + 'static,
{
    Ok(Box::new(T::deserialize(value)?))
}

/// Table of known workload types.
///
/// Built once at startup and then shared read-only (typically behind an
/// `Arc`); registration takes `&mut self` so it cannot race with lookups.
#[derive(Clone, Default)]
pub struct TypeRegistry {
    types: BTreeMap<WorkloadType, TypeEntry>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register payload type `T` under `typ`.
    pub fn try_register<T>(&mut self, typ: impl Into<WorkloadType>) -> TypesResult<()>
    where
        T: WorkloadData + DeserializeOwned + 'static,
    {
        self.insert(typ.into(), false, decode_as::<T>)
    }

    /// Register a type whose workloads other deployments of the same twin may reference.
    pub fn try_register_sharable<T>(&mut self, typ: impl Into<WorkloadType>) -> TypesResult<()>
    where
        T: WorkloadData + DeserializeOwned + 'static,
    {
        self.insert(typ.into(), true, decode_as::<T>)
    }

    /// Register payload type `T`, panicking on a duplicate name.
    ///
    /// Duplicate registration is a programming error in the startup wiring.
    pub fn register<T>(&mut self, typ: impl Into<WorkloadType>)
    where
        T: WorkloadData + DeserializeOwned + 'static,
    {
        if let Err(e) = self.try_register::<T>(typ) {
            panic!("{e}");
        }
    }

    /// Sharable variant of [`register`](Self::register).
    pub fn register_sharable<T>(&mut self, typ: impl Into<WorkloadType>)
    where
        T: WorkloadData + DeserializeOwned + 'static,
    {
        if let Err(e) = self.try_register_sharable::<T>(typ) {
            panic!("{e}");
        }
    }

    fn insert(&mut self, typ: WorkloadType, sharable: bool, decode: DecodeFn) -> TypesResult<()> {
        if self.types.contains_key(&typ) {
            return Err(TypesError::DuplicateType(typ.to_string()));
        }
        self.types.insert(typ, TypeEntry { sharable, decode });
        Ok(())
    }

    pub fn contains(&self, typ: &WorkloadType) -> bool {
        self.types.contains_key(typ)
    }

    /// Fails with [`TypesError::UnknownType`] for unregistered types.
    pub fn check(&self, typ: &WorkloadType) -> TypesResult<()> {
        if !self.contains(typ) {
            return Err(TypesError::UnknownType(typ.to_string()));
        }
        Ok(())
    }

    pub fn is_sharable(&self, typ: &WorkloadType) -> bool {
        self.types.get(typ).is_some_and(|e| e.sharable)
    }

    /// All registered types, sorted by name.
    pub fn types(&self) -> Vec<WorkloadType> {
        self.types.keys().cloned().collect()
    }

    pub fn sharable_types(&self) -> Vec<WorkloadType> {
        self.types
            .iter()
            .filter(|(_, e)| e.sharable)
            .map(|(t, _)| t.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Decode a payload of type `typ`.
    pub fn decode(&self, typ: &WorkloadType, data: &Value) -> TypesResult<Box<dyn WorkloadData>> {
        let entry = self
            .types
            .get(typ)
            .ok_or_else(|| TypesError::UnknownType(typ.to_string()))?;
        (entry.decode)(data).map_err(|source| TypesError::Decode {
            typ: typ.to_string(),
            source,
        })
    }
}

impl fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeRegistry")
            .field("types", &self.types.keys().collect::<Vec<_>>())
            .finish()
    }
}
