//! Sync state model.
//!
//! A [`SyncState`] is an opaque JSON object owned by the source connector,
//! typically keyed by stream identifier. The host only copies it into the
//! workspace before a run and replaces it with the last captured `STATE`
//! payload afterwards.

use serde::{Deserialize, Serialize};

/// JSON-object sync state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SyncState(serde_json::Map<String, serde_json::Value>);

/// The value offered as state was not a JSON object.
#[derive(Debug, thiserror::Error)]
#[error("sync state must be a JSON object, got {found}")]
pub struct NotAnObject {
    pub found: &'static str,
}

impl SyncState {
    /// Empty state (`{}`).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap a JSON value, which must be an object.
    ///
    /// # Errors
    ///
    /// Returns [`NotAnObject`] for any non-object value.
    pub fn from_value(value: serde_json::Value) -> Result<Self, NotAnObject> {
        match value {
            serde_json::Value::Object(map) => Ok(Self(map)),
            other => Err(NotAnObject {
                found: json_kind(&other),
            }),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }

    /// Pretty-printed JSON, as written to `state.json` and the state file.
    #[must_use]
    pub fn to_pretty_json(&self) -> String {
        serde_json::to_string_pretty(&self.0).unwrap_or_else(|_| "{}".to_string())
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}
