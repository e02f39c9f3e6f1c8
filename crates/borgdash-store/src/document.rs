//! In-memory representation of the borgmatic configuration file.
//!
//! Documents are ordered YAML mappings. Key order is whatever the file (or
//! the caller) established and is kept on every round trip.

use crate::{StoreError, StoreResult};
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::path::Path;

/// A parsed configuration document.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigDocument(Mapping);

impl ConfigDocument {
    /// Create an empty document.
    pub fn new() -> Self {
        Self(Mapping::new())
    }

    /// Parse YAML text into a document.
    pub fn parse(text: &str) -> StoreResult<Self> {
        Self::parse_at(text, None)
    }

    /// Parse YAML text read from `path`; the path is attached to errors.
    pub fn parse_at(text: &str, path: Option<&Path>) -> StoreResult<Self> {
        let value: Value =
            serde_yaml::from_str(text).map_err(|e| StoreError::serialization(path, &e))?;

        match value {
            // Empty file or a file holding only comments
            Value::Null => Ok(Self::new()),
            Value::Mapping(mapping) => Ok(Self(mapping)),
            other => Err(StoreError::Serialization {
                path: path.map(Path::to_path_buf),
                message: format!(
                    "top-level value must be a mapping, found {}",
                    value_kind(&other)
                ),
                line: Some(1),
                column: Some(1),
            }),
        }
    }

    /// Parse file content, rejecting bytes that are not UTF-8.
    pub fn from_bytes(bytes: &[u8], path: Option<&Path>) -> StoreResult<Self> {
        let text = std::str::from_utf8(bytes).map_err(|e| StoreError::Serialization {
            path: path.map(Path::to_path_buf),
            message: format!("file is not valid UTF-8: {e}"),
            line: None,
            column: None,
        })?;
        Self::parse_at(text, path)
    }

    /// Serialize to YAML text (two-space indentation, insertion order).
    pub fn to_yaml(&self) -> StoreResult<String> {
        serde_yaml::to_string(&self.0).map_err(|e| StoreError::serialization(None, &e))
    }

    /// Get a top-level section.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Set a top-level section, returning the previous value.
    ///
    /// An existing key keeps its position; a new key is appended.
    pub fn set(&mut self, key: &str, value: Value) -> Option<Value> {
        self.0.insert(Value::String(key.to_string()), value)
    }

    /// Remove a top-level section, keeping the order of the rest.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.shift_remove(key)
    }

    /// Top-level keys in document order. Non-string keys are skipped.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().filter_map(Value::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Borrow the underlying mapping.
    pub fn as_mapping(&self) -> &Mapping {
        &self.0
    }

    /// Consume the document, returning the underlying mapping.
    pub fn into_mapping(self) -> Mapping {
        self.0
    }
}

impl From<Mapping> for ConfigDocument {
    fn from(mapping: Mapping) -> Self {
        Self(mapping)
    }
}

impl TryFrom<Value> for ConfigDocument {
    type Error = StoreError;

    fn try_from(value: Value) -> StoreResult<Self> {
        match value {
            Value::Mapping(mapping) => Ok(Self(mapping)),
            Value::Null => Ok(Self::new()),
            other => Err(StoreError::Serialization {
                path: None,
                message: format!(
                    "top-level value must be a mapping, found {}",
                    value_kind(&other)
                ),
                line: None,
                column: None,
            }),
        }
    }
}

/// Human-readable name of a YAML value's type.
pub(crate) fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Sequence(_) => "a sequence",
        Value::Mapping(_) => "a mapping",
        Value::Tagged(_) => "a tagged value",
    }
}
