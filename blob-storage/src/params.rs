use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use crate::backend::BackendPolicy;
use crate::error::{StorageError, StorageResult};
use crate::usage::StorageUsage;

pub const TYPE: &str = "type";
pub const READ_ONLY: &str = "read-only";
pub const SKIP: &str = "skip";
pub const USAGE: &str = "usage";

/// Keys every backend type accepts.
pub const GENERIC_KEYS: [&str; 4] = [TYPE, READ_ONLY, SKIP, USAGE];

/// Backend-specific keys of one descriptor, checked against a schema.
///
/// JSON `null` counts as an absent key.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(transparent)]
pub struct Parameters(Map<String, Value>);

impl Parameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    fn present(&self, key: &str) -> Option<&Value> {
        self.0.get(key).filter(|v| !v.is_null())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.present(key).is_some()
    }

    pub fn string(&self, key: &str) -> StorageResult<Option<String>> {
        match self.present(key) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(other) => Err(wrong_type(key, "a string", other)),
        }
    }

    pub fn boolean(&self, key: &str, default: bool) -> StorageResult<bool> {
        match self.present(key) {
            None => Ok(default),
            Some(Value::Bool(b)) => Ok(*b),
            Some(other) => Err(wrong_type(key, "true or false", other)),
        }
    }

    pub fn integer(&self, key: &str) -> StorageResult<Option<u64>> {
        match self.present(key) {
            None => Ok(None),
            Some(value) => value
                .as_u64()
                .map(Some)
                .ok_or_else(|| wrong_type(key, "a non-negative integer", value)),
        }
    }

    pub fn object(&self, key: &str) -> StorageResult<Option<&Map<String, Value>>> {
        match self.present(key) {
            None => Ok(None),
            Some(Value::Object(map)) => Ok(Some(map)),
            Some(other) => Err(wrong_type(key, "an object", other)),
        }
    }

    /// Fails on any key outside the generic keys and `allowed`.
    pub fn reject_unknown(&self, allowed: &[&str]) -> StorageResult<()> {
        let unknown: Vec<&str> = self
            .0
            .keys()
            .map(String::as_str)
            .filter(|key| !GENERIC_KEYS.contains(key) && !allowed.contains(key))
            .collect();
        if unknown.is_empty() {
            Ok(())
        } else {
            Err(StorageError::Configuration(format!("unknown parameter(s): {}", unknown.join(", "))))
        }
    }

    pub fn policy(&self) -> StorageResult<BackendPolicy> {
        let usage = match self.string(USAGE)? {
            Some(raw) => raw.parse()?,
            None => StorageUsage::External,
        };
        Ok(BackendPolicy {
            read_only: self.boolean(READ_ONLY, false)?,
            skip: self.boolean(SKIP, false)?,
            usage,
        })
    }
}

impl From<Map<String, Value>> for Parameters {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

fn wrong_type(key: &str, expected: &str, found: &Value) -> StorageError {
    StorageError::Configuration(format!("parameter {key:?} must be {expected}, got {found}"))
}
