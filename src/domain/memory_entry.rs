//! Memory entry domain model (spec §3, §4.2).

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::MemoryEntryId;

/// Auto-detected or caller-supplied value type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryValueType {
    String,
    Number,
    Boolean,
    Object,
    Array,
    Binary,
}

impl MemoryValueType {
    /// Infer a type tag from a JSON value, the way `store` auto-detects it
    /// when the caller omits one (spec §4.2).
    #[must_use]
    pub fn detect(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::String(_) => Self::String,
            serde_json::Value::Number(_) => Self::Number,
            serde_json::Value::Bool(_) => Self::Boolean,
            serde_json::Value::Array(_) => Self::Array,
            serde_json::Value::Object(_) => Self::Object,
            serde_json::Value::Null => Self::Binary,
        }
    }
}

/// Visibility of a memory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessLevel {
    Private,
    Shared,
    Public,
}

/// A namespaced key/value record (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub id: MemoryEntryId,
    pub namespace: String,
    pub key: String,
    pub value: serde_json::Value,
    pub value_type: MemoryValueType,
    pub tags: HashSet<String>,
    pub owner: Option<String>,
    pub access_level: AccessLevel,
    pub size_bytes: usize,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub compressed: bool,
}

impl MemoryEntry {
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| exp <= now)
    }
}
