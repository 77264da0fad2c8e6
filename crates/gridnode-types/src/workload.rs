//! Workload envelope, result record, and identifiers.
//!
//! A [`Workload`] carries an opaque JSON payload. The payload is only ever
//! interpreted through the [`TypeRegistry`](crate::registry::TypeRegistry),
//! which maps the workload's type name to a concrete [`WorkloadData`]
//! implementation.

use std::fmt;
use std::io::{self, Write};
use std::ops::{Deref, DerefMut};
use std::str::FromStr;
use std::sync::LazyLock;
use std::time::{SystemTime, UNIX_EPOCH};

use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::capacity::Capacity;
use crate::error::{TypesError, TypesResult};
use crate::registry::TypeRegistry;

/// Unix timestamp in seconds.
pub type Timestamp = i64;

/// Workload name, unique within its deployment.
pub type Name = String;

const MAX_NAME_LEN: usize = 50;

static NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9_]+$").expect("name pattern compiles"));

/// Current unix time in seconds.
pub fn now() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as Timestamp)
        .unwrap_or_default()
}

/// Check a workload name against the allowed character set and length.
pub fn is_valid_name(name: &str) -> TypesResult<()> {
    if name.is_empty() || name.len() > MAX_NAME_LEN || !NAME_RE.is_match(name) {
        return Err(TypesError::InvalidName(name.to_string()));
    }
    Ok(())
}

// ── Workload type ──────────────────────────────────────────────

/// Name of a registered workload type, e.g. `"zdb"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkloadType(String);

impl WorkloadType {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkloadType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WorkloadType {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl PartialEq<str> for WorkloadType {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for WorkloadType {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

// ── Workload id ────────────────────────────────────────────────

/// Node-global workload identifier: `"{twin}-{contract}-{name}"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkloadId(String);

impl WorkloadId {
    pub fn new(twin: u32, contract: u64, name: &str) -> TypesResult<Self> {
        is_valid_name(name)?;
        Ok(Self(format!("{twin}-{contract}-{name}")))
    }

    /// Split the id back into (twin, contract, name).
    pub fn parts(&self) -> TypesResult<(u32, u64, Name)> {
        let mut it = self.0.splitn(3, '-');
        let (Some(twin), Some(contract), Some(name)) = (it.next(), it.next(), it.next()) else {
            return Err(TypesError::InvalidId(self.0.clone()));
        };
        let twin = twin
            .parse()
            .map_err(|_| TypesError::InvalidId(self.0.clone()))?;
        let contract = contract
            .parse()
            .map_err(|_| TypesError::InvalidId(self.0.clone()))?;
        Ok((twin, contract, name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkloadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for WorkloadId {
    type Err = TypesError;

    fn from_str(s: &str) -> TypesResult<Self> {
        let id = Self(s.to_string());
        let (_, _, name) = id.parts()?;
        is_valid_name(&name)?;
        Ok(id)
    }
}

// ── Result ─────────────────────────────────────────────────────

/// State of the last reconciliation attempt of a workload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultState {
    #[default]
    Init,
    Ok,
    Error,
    Deleted,
    Paused,
    Unchanged,
}

impl ResultState {
    pub fn is_any(&self, states: &[ResultState]) -> bool {
        states.contains(self)
    }

    /// Ok-equivalent states: the workload exists and its side effects are live.
    pub fn is_okay(&self) -> bool {
        self.is_any(&[ResultState::Ok, ResultState::Paused])
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ResultState::Init => "init",
            ResultState::Ok => "ok",
            ResultState::Error => "error",
            ResultState::Deleted => "deleted",
            ResultState::Paused => "paused",
            ResultState::Unchanged => "unchanged",
        }
    }
}

impl fmt::Display for ResultState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome record of the last reconciliation attempt, persisted with the workload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkloadResult {
    #[serde(default)]
    pub created: Timestamp,
    #[serde(default)]
    pub state: ResultState,
    #[serde(rename = "message", default)]
    pub error: String,
    #[serde(default)]
    pub data: Value,
}

impl WorkloadResult {
    /// A result that was never written.
    pub fn is_nil(&self) -> bool {
        self.created == 0 && self.data.is_null()
    }

    /// Bytes covered by a result signature: state, error message, payload.
    pub fn bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(self.state.as_str().as_bytes());
        buf.extend_from_slice(self.error.as_bytes());
        if !self.data.is_null() {
            buf.extend_from_slice(self.data.to_string().as_bytes());
        }
        buf
    }
}

// ── Payload capability ─────────────────────────────────────────

/// Capability set every concrete workload payload implements.
pub trait WorkloadData: fmt::Debug + Send + Sync {
    /// Schema and cross-reference validation against sibling workloads.
    fn valid(&self, getter: &dyn WorkloadGetter) -> TypesResult<()>;

    /// Write the semantically significant fields in a fixed order.
    fn challenge(&self, w: &mut dyn Write) -> io::Result<()>;

    /// Resource cost of this payload.
    fn capacity(&self) -> TypesResult<Capacity>;
}

/// Name lookup over the workloads visible to a deployment.
pub trait WorkloadGetter {
    fn get(&self, name: &str) -> TypesResult<WorkloadWithId>;

    fn by_type(&self, types: &[WorkloadType]) -> Vec<WorkloadWithId>;

    /// Like [`get`](Self::get), but also checks the workload type.
    fn get_type(&self, name: &str, typ: &WorkloadType) -> TypesResult<WorkloadWithId> {
        let wl = self.get(name)?;
        if &wl.typ != typ {
            return Err(TypesError::invalid(format!(
                "workload '{name}' of wrong type"
            )));
        }
        Ok(wl)
    }
}

// ── Workload ───────────────────────────────────────────────────

/// One unit of deployable work inside a deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workload {
    #[serde(default)]
    pub version: u32,
    pub name: Name,
    #[serde(rename = "type")]
    pub typ: WorkloadType,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub created: Timestamp,
    #[serde(default)]
    pub metadata: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub result: WorkloadResult,
}

impl Workload {
    /// Build a version-0 workload with an empty result.
    pub fn new(name: impl Into<Name>, typ: impl Into<WorkloadType>, data: Value) -> Self {
        Self {
            version: 0,
            name: name.into(),
            typ: typ.into(),
            data,
            created: 0,
            metadata: String::new(),
            description: String::new(),
            result: WorkloadResult::default(),
        }
    }

    /// Decode the payload into its registered [`WorkloadData`] implementation.
    pub fn workload_data(&self, registry: &TypeRegistry) -> TypesResult<Box<dyn WorkloadData>> {
        registry.decode(&self.typ, &self.data)
    }

    /// Decode the payload into a concrete type known to the caller.
    pub fn decode<T: DeserializeOwned>(&self) -> TypesResult<T> {
        T::deserialize(&self.data).map_err(|source| TypesError::Decode {
            typ: self.typ.to_string(),
            source,
        })
    }

    /// True if a result was written and it is in `state`.
    pub fn is_result(&self, state: ResultState) -> bool {
        !self.result.is_nil() && self.result.state == state
    }

    pub fn valid(&self, registry: &TypeRegistry, getter: &dyn WorkloadGetter) -> TypesResult<()> {
        is_valid_name(&self.name)?;
        let data = self.workload_data(registry)?;
        data.valid(getter)
    }

    /// Append this workload's challenge bytes to `w`.
    ///
    /// The name is not part of the challenge; the payload's own fields are.
    pub fn challenge(&self, registry: &TypeRegistry, w: &mut dyn Write) -> TypesResult<()> {
        let data = self.workload_data(registry)?;
        write!(w, "{}", self.version)?;
        write!(w, "{}", self.typ)?;
        write!(w, "{}", self.metadata)?;
        write!(w, "{}", self.description)?;
        data.challenge(w)?;
        Ok(())
    }

    pub fn capacity(&self, registry: &TypeRegistry) -> TypesResult<Capacity> {
        self.workload_data(registry)?.capacity()
    }
}

/// A workload paired with its node-global id.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkloadWithId {
    pub id: WorkloadId,
    pub workload: Workload,
}

impl WorkloadWithId {
    pub fn new(id: WorkloadId, workload: Workload) -> Self {
        Self { id, workload }
    }
}

impl Deref for WorkloadWithId {
    type Target = Workload;

    fn deref(&self) -> &Workload {
        &self.workload
    }
}

impl DerefMut for WorkloadWithId {
    fn deref_mut(&mut self) -> &mut Workload {
        &mut self.workload
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_follow_charset_and_length() {
        assert!(is_valid_name("net_1").is_ok());
        assert!(is_valid_name(&"a".repeat(50)).is_ok());
        assert!(is_valid_name(&"a".repeat(51)).is_err());
        assert!(is_valid_name("").is_err());
        assert!(is_valid_name("with-dash").is_err());
        assert!(is_valid_name("spa ce").is_err());
    }

    #[test]
    fn workload_id_round_trips_through_parts() {
        let id = WorkloadId::new(7, 42, "db_1").unwrap();
        assert_eq!(id.as_str(), "7-42-db_1");
        assert_eq!(id.parts().unwrap(), (7, 42, "db_1".to_string()));

        let parsed: WorkloadId = "7-42-db_1".parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn workload_id_rejects_garbage() {
        assert!("nope".parse::<WorkloadId>().is_err());
        assert!("x-1-name".parse::<WorkloadId>().is_err());
        assert!(WorkloadId::new(1, 1, "bad-name").is_err());
    }

    #[test]
    fn default_result_is_nil() {
        let result = WorkloadResult::default();
        assert!(result.is_nil());
        assert_eq!(result.state, ResultState::Init);

        let written = WorkloadResult {
            created: 10,
            state: ResultState::Ok,
            ..Default::default()
        };
        assert!(!written.is_nil());
    }

    #[test]
    fn result_states_serialize_lowercase() {
        let json = serde_json::to_string(&ResultState::Unchanged).unwrap();
        assert_eq!(json, "\"unchanged\"");
        let state: ResultState = serde_json::from_str("\"paused\"").unwrap();
        assert_eq!(state, ResultState::Paused);
        assert!(state.is_okay());
        assert!(!ResultState::Error.is_okay());
    }

    #[test]
    fn result_error_is_stored_as_message() {
        let result = WorkloadResult {
            created: 1,
            state: ResultState::Error,
            error: "boom".into(),
            data: Value::Null,
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["message"], "boom");
        assert_eq!(result.bytes(), b"errorboom".to_vec());
    }

    #[test]
    fn is_result_ignores_nil_results() {
        let mut wl = Workload::new("a", "volume", Value::Null);
        assert!(!wl.is_result(ResultState::Init));
        wl.result.created = 5;
        wl.result.state = ResultState::Ok;
        assert!(wl.is_result(ResultState::Ok));
    }

    #[test]
    fn workload_serializes_type_field() {
        let wl = Workload::new("vol", "volume", serde_json::json!({"size": 1}));
        let json = serde_json::to_value(&wl).unwrap();
        assert_eq!(json["type"], "volume");
        let back: Workload = serde_json::from_value(json).unwrap();
        assert_eq!(back, wl);
    }
}
