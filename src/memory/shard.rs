//! A single shard's primary map and secondary indexes.
//!
//! One [`Namespace`] owns `shard_count` of these, each behind its own
//! `RwLock`, so that "no reader may observe a half-updated index" (spec
//! §4.2) holds per-shard: every mutation that touches both the primary map
//! and an index happens while holding that shard's single write lock.

use std::collections::{HashMap, HashSet};

use chrono::Utc;

use crate::domain::memory_entry::{AccessLevel, MemoryEntry, MemoryValueType};
use crate::domain::ids::MemoryEntryId;

/// Tokenize a textual value into lowercase words for the full-text index.
pub(crate) fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

#[derive(Default)]
pub(crate) struct ShardData {
    pub(crate) entries: HashMap<String, MemoryEntry>,
    by_type: HashMap<MemoryValueType, HashSet<String>>,
    by_tag: HashMap<String, HashSet<String>>,
    by_owner: HashMap<String, HashSet<String>>,
    fulltext: HashMap<String, HashSet<String>>,
}

impl ShardData {
    fn index_entry(&mut self, entry: &MemoryEntry) {
        self.by_type.entry(entry.value_type).or_default().insert(entry.key.clone());
        for tag in &entry.tags {
            self.by_tag.entry(tag.clone()).or_default().insert(entry.key.clone());
        }
        if let Some(owner) = &entry.owner {
            self.by_owner.entry(owner.clone()).or_default().insert(entry.key.clone());
        }
        if let serde_json::Value::String(text) = &entry.value {
            for token in tokenize(text) {
                self.fulltext.entry(token).or_default().insert(entry.key.clone());
            }
        }
    }

    fn deindex_key(&mut self, key: &str, entry: &MemoryEntry) {
        if let Some(set) = self.by_type.get_mut(&entry.value_type) {
            set.remove(key);
        }
        for tag in &entry.tags {
            if let Some(set) = self.by_tag.get_mut(tag) {
                set.remove(key);
            }
        }
        if let Some(owner) = &entry.owner {
            if let Some(set) = self.by_owner.get_mut(owner) {
                set.remove(key);
            }
        }
        if let serde_json::Value::String(text) = &entry.value {
            for token in tokenize(text) {
                if let Some(set) = self.fulltext.get_mut(&token) {
                    set.remove(key);
                }
            }
        }
    }

    /// Insert or supersede an entry, re-indexing atomically. Returns the
    /// version assigned (bumped from any prior entry under the same key).
    pub(crate) fn put(&mut self, mut entry: MemoryEntry) -> MemoryEntry {
        if let Some(existing) = self.entries.remove(&entry.key) {
            self.deindex_key(&entry.key, &existing);
            entry.version = existing.version + 1;
            entry.created_at = existing.created_at;
        } else {
            entry.version = 1;
        }
        self.index_entry(&entry);
        self.entries.insert(entry.key.clone(), entry.clone());
        entry
    }

    pub(crate) fn get(&self, key: &str) -> Option<&MemoryEntry> {
        self.entries.get(key)
    }

    pub(crate) fn get_mut(&mut self, key: &str) -> Option<&mut MemoryEntry> {
        self.entries.get_mut(key)
    }

    pub(crate) fn delete(&mut self, key: &str) -> Option<MemoryEntry> {
        let removed = self.entries.remove(key)?;
        self.deindex_key(key, &removed);
        Some(removed)
    }

    pub(crate) fn keys_by_tag(&self, tag: &str) -> HashSet<String> {
        self.by_tag.get(tag).cloned().unwrap_or_default()
    }

    pub(crate) fn keys_by_type(&self, value_type: MemoryValueType) -> HashSet<String> {
        self.by_type.get(&value_type).cloned().unwrap_or_default()
    }

    pub(crate) fn keys_by_owner(&self, owner: &str) -> HashSet<String> {
        self.by_owner.get(owner).cloned().unwrap_or_default()
    }

    pub(crate) fn keys_by_fulltext(&self, query: &str) -> HashSet<String> {
        let mut result: Option<HashSet<String>> = None;
        for token in tokenize(query) {
            let matches = self.fulltext.get(&token).cloned().unwrap_or_default();
            result = Some(match result {
                Some(acc) => acc.intersection(&matches).cloned().collect(),
                None => matches,
            });
        }
        result.unwrap_or_default()
    }

    pub(crate) fn all_tags(&self) -> impl Iterator<Item = &String> {
        self.by_tag.keys()
    }

    pub(crate) fn all_types(&self) -> impl Iterator<Item = &MemoryValueType> {
        self.by_type.keys()
    }
}

/// A fresh, unversioned entry ready to be handed to a shard's `put`.
pub(crate) fn new_entry(
    namespace: &str,
    key: &str,
    value: serde_json::Value,
    value_type: MemoryValueType,
    tags: HashSet<String>,
    owner: Option<String>,
    access_level: AccessLevel,
    ttl_ms: Option<i64>,
    compressed: bool,
    size_bytes: usize,
) -> MemoryEntry {
    let now = Utc::now();
    MemoryEntry {
        id: MemoryEntryId::new(),
        namespace: namespace.to_string(),
        key: key.to_string(),
        value,
        value_type,
        tags,
        owner,
        access_level,
        size_bytes,
        version: 0,
        created_at: now,
        updated_at: now,
        last_accessed_at: now,
        expires_at: ttl_ms.map(|ms| now + chrono::Duration::milliseconds(ms)),
        compressed,
    }
}
