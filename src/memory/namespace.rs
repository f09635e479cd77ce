//! A namespace: a set of shards, replicated and hashed by key (spec §4.2
//! "Sharding").
//!
//! With `shard_count == 1` this degenerates to the base case spec §4.2
//! describes directly: "Writes take a per-namespace writer lock." With
//! `shard_count > 1`, each shard has its own lock, cross-shard queries fan
//! out and merge, and `replication_factor > 1` causes a write to land on
//! that many shards so a replica survives a single shard's data loss.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::domain::memory_entry::MemoryEntry;

use super::shard::ShardData;

pub struct Namespace {
    pub(crate) shards: Vec<Arc<RwLock<ShardData>>>,
    pub(crate) replication_factor: usize,
}

fn hash_key(key: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish()
}

impl Namespace {
    pub(crate) fn new(shard_count: usize, replication_factor: usize) -> Self {
        let shard_count = shard_count.max(1);
        Self {
            shards: (0..shard_count).map(|_| Arc::new(RwLock::new(ShardData::default()))).collect(),
            replication_factor: replication_factor.clamp(1, shard_count),
        }
    }

    /// The shard indices a key lands on: the primary shard first, then
    /// `replication_factor - 1` successors (wrapping), so "same key implies
    /// same shard" for the primary while still replicating.
    fn shard_indices(&self, key: &str) -> Vec<usize> {
        let n = self.shards.len();
        let primary = (hash_key(key) as usize) % n;
        (0..self.replication_factor).map(|i| (primary + i) % n).collect()
    }

    fn primary_shard(&self, key: &str) -> &Arc<RwLock<ShardData>> {
        let n = self.shards.len();
        &self.shards[(hash_key(key) as usize) % n]
    }

    /// Store (or supersede) an entry across all its replica shards. Shard
    /// locks are acquired in ascending index order to prevent lock-order
    /// cycles with any other concurrent multi-shard operation (spec §5: "no
    /// component may hold a lock across a suspension point that waits on
    /// another component's lock").
    pub(crate) async fn store(&self, entry: MemoryEntry) -> MemoryEntry {
        let mut indices = self.shard_indices(&entry.key);
        indices.sort_unstable();

        let mut stored = entry.clone();
        for idx in indices {
            let mut shard = self.shards[idx].write().await;
            stored = shard.put(entry.clone());
        }
        stored
    }

    /// Read the primary replica. Callers needing strict read-your-writes
    /// should always read the same key they wrote (spec §4.2: "same key
    /// implies same shard").
    pub(crate) async fn retrieve(&self, key: &str) -> Option<MemoryEntry> {
        let shard = self.primary_shard(key).read().await;
        shard.get(key).cloned()
    }

    /// Touch `last_accessed_at` on the primary replica.
    pub(crate) async fn touch(&self, key: &str) {
        let mut shard = self.primary_shard(key).write().await;
        if let Some(entry) = shard.get_mut(key) {
            entry.last_accessed_at = chrono::Utc::now();
        }
    }

    pub(crate) async fn delete(&self, key: &str) -> bool {
        let mut indices = self.shard_indices(key);
        indices.sort_unstable();
        let mut removed_any = false;
        for idx in indices {
            let mut shard = self.shards[idx].write().await;
            if shard.delete(key).is_some() {
                removed_any = true;
            }
        }
        removed_any
    }

    /// Fan out across every shard and merge, deduplicating by key and
    /// keeping the highest version seen (the eventual-consistency rule for
    /// cross-shard reads, spec §4.2).
    pub(crate) async fn all_entries(&self) -> Vec<MemoryEntry> {
        let mut merged: std::collections::HashMap<String, MemoryEntry> = std::collections::HashMap::new();
        for shard in &self.shards {
            let shard = shard.read().await;
            for entry in shard.entries.values() {
                merged
                    .entry(entry.key.clone())
                    .and_modify(|existing| {
                        if entry.version > existing.version {
                            *existing = entry.clone();
                        }
                    })
                    .or_insert_with(|| entry.clone());
            }
        }
        merged.into_values().collect()
    }

    pub(crate) fn shard_count(&self) -> usize {
        self.shards.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::memory_entry::{AccessLevel, MemoryValueType};
    use crate::memory::shard::new_entry;

    #[tokio::test]
    async fn store_and_retrieve_roundtrip() {
        let ns = Namespace::new(4, 2);
        let entry = new_entry(
            "default",
            "k",
            serde_json::json!("v1"),
            MemoryValueType::String,
            Default::default(),
            None,
            AccessLevel::Private,
            None,
            false,
            2,
        );
        ns.store(entry).await;
        let fetched = ns.retrieve("k").await.unwrap();
        assert_eq!(fetched.value, serde_json::json!("v1"));
        assert_eq!(fetched.version, 1);
    }

    #[tokio::test]
    async fn second_write_bumps_version() {
        let ns = Namespace::new(3, 1);
        let e1 = new_entry(
            "default", "k", serde_json::json!("v1"), MemoryValueType::String,
            Default::default(), None, AccessLevel::Private, None, false, 2,
        );
        ns.store(e1).await;
        let e2 = new_entry(
            "default", "k", serde_json::json!("v2"), MemoryValueType::String,
            Default::default(), None, AccessLevel::Private, None, false, 2,
        );
        let stored = ns.store(e2).await;
        assert_eq!(stored.version, 2);
        assert_eq!(ns.retrieve("k").await.unwrap().value, serde_json::json!("v2"));
    }

    #[tokio::test]
    async fn delete_removes_from_all_replicas() {
        let ns = Namespace::new(5, 3);
        let e1 = new_entry(
            "default", "k", serde_json::json!(1), MemoryValueType::Number,
            Default::default(), None, AccessLevel::Private, None, false, 1,
        );
        ns.store(e1).await;
        assert!(ns.delete("k").await);
        assert!(ns.retrieve("k").await.is_none());
        assert_eq!(ns.all_entries().await.len(), 0);
    }
}
