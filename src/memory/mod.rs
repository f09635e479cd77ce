//! Distributed Memory: namespaced, TTL'd, optionally sharded key/value store
//! (spec §4.2) shared by every other component (spec §5: "Distributed Memory
//! is the only legal cross-component shared state").

mod cleanup;
mod export;
mod namespace;
mod persistence;
mod query;
mod shard;
mod stats;

pub use cleanup::{CleanupAction, CleanupOptions, CleanupReport};
pub use export::{ConflictPolicy, ExportFormat, ExportOptions, ExportReport, ImportOptions, ImportReport};
pub use query::{Aggregation, QueryOptions, QueryResult, SortOrder};
pub use stats::MemoryStatistics;

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::instrument;

use crate::domain::ids::MemoryEntryId;
use crate::domain::memory_entry::{AccessLevel, MemoryEntry, MemoryValueType};
use crate::error::{CoreError, CoreResult};
use crate::event_bus::EventBus;

use namespace::Namespace;
use shard::new_entry;

/// Tunables for a [`DistributedMemory`] instance (spec §4.2, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Shards per namespace. `1` disables sharding.
    pub shard_count: usize,
    /// Number of shard replicas a write lands on.
    pub replication_factor: usize,
    /// Soft budget across every namespace; a `store` that would push total
    /// usage past this figure is rejected with `CapacityExceeded`. `None`
    /// disables the check entirely.
    pub max_memory_bytes: Option<usize>,
    /// Size above which a stored value is marked `compressed` (spec §4.2:
    /// "compression is applied when size >= compressionThreshold").
    pub compression_threshold_bytes: usize,
    /// Enables the compression path at all.
    pub compression_enabled: bool,
    /// Root directory for the write-ahead log and snapshots. `None` disables
    /// persistence entirely (spec §6).
    pub persistence_root: Option<PathBuf>,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            shard_count: 1,
            replication_factor: 1,
            max_memory_bytes: None,
            compression_threshold_bytes: 64 * 1024,
            compression_enabled: true,
            persistence_root: None,
        }
    }
}

/// Options accepted by [`DistributedMemory::store`].
#[derive(Debug, Clone, Default)]
pub struct StoreOptions {
    pub namespace: Option<String>,
    pub value_type: Option<MemoryValueType>,
    pub tags: HashSet<String>,
    pub owner: Option<String>,
    pub access_level: Option<AccessLevel>,
    pub ttl_ms: Option<i64>,
    pub force_compress: bool,
}

/// Options accepted by [`DistributedMemory::retrieve`].
///
/// `last_accessed_at` is touched by default (spec §4.2: "updates
/// last-accessed timestamp unless opts say otherwise"); set `skip_touch` to
/// opt out, e.g. for export/import reads that shouldn't count as access.
#[derive(Debug, Clone, Default)]
pub struct RetrieveOptions {
    pub namespace: Option<String>,
    pub skip_touch: bool,
}

fn default_namespace() -> &'static str {
    "default"
}

/// The Distributed Memory component.
///
/// One [`Namespace`] is created lazily per distinct namespace name and never
/// removed, matching spec §4.2's "primary map: `(namespace, key) -> entry`"
/// model realized as one map-of-maps keyed first by namespace.
pub struct DistributedMemory {
    config: MemoryConfig,
    namespaces: Arc<RwLock<HashMap<String, Arc<Namespace>>>>,
    events: EventBus,
}

impl DistributedMemory {
    #[must_use]
    pub fn new(config: MemoryConfig, events: EventBus) -> Self {
        Self {
            config,
            namespaces: Arc::new(RwLock::new(HashMap::new())),
            events,
        }
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    /// Replace the live configuration (`updateConfiguration`, spec §6).
    /// Does not retroactively reshard existing namespaces.
    pub fn update_configuration(&mut self, config: MemoryConfig) {
        self.config = config;
    }

    async fn namespace(&self, name: &str) -> Arc<Namespace> {
        if let Some(ns) = self.namespaces.read().await.get(name) {
            return ns.clone();
        }
        let mut namespaces = self.namespaces.write().await;
        namespaces
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Namespace::new(self.config.shard_count, self.config.replication_factor)))
            .clone()
    }

    /// Store (or supersede) a value under `(namespace, key)` (spec §4.2).
    #[instrument(skip(self, value, opts))]
    pub async fn store(&self, key: &str, value: Value, opts: StoreOptions) -> CoreResult<MemoryEntryId> {
        let namespace_name = opts.namespace.unwrap_or_else(|| default_namespace().to_string());
        let value_type = opts.value_type.unwrap_or_else(|| MemoryValueType::detect(&value));
        let size_bytes = serde_json::to_vec(&value).map(|bytes| bytes.len()).unwrap_or(0);
        let compressed = opts.force_compress
            || (self.config.compression_enabled && size_bytes >= self.config.compression_threshold_bytes);

        let entry = new_entry(
            &namespace_name,
            key,
            value,
            value_type,
            opts.tags,
            opts.owner,
            opts.access_level.unwrap_or(AccessLevel::Private),
            opts.ttl_ms,
            compressed,
            size_bytes,
        );

        let ns = self.namespace(&namespace_name).await;

        if let Some(budget) = self.config.max_memory_bytes {
            let current_total = stats::compute(self).await?.overview.total_bytes;
            let superseded_bytes = ns.retrieve(key).await.map_or(0, |existing| existing.size_bytes);
            let projected = current_total.saturating_sub(superseded_bytes) + size_bytes;
            if projected > budget {
                return Err(CoreError::CapacityExceeded(format!(
                    "store of {size_bytes} bytes into {namespace_name}/{key} would bring total usage to {projected} bytes, exceeding the {budget}-byte budget"
                )));
            }
        }

        let stored = ns.store(entry).await;

        if let Some(root) = &self.config.persistence_root {
            persistence::append_store(root, &namespace_name, &stored).await?;
        }

        self.events
            .publish(
                "memory.changed",
                serde_json::json!({ "namespace": namespace_name, "key": key, "op": "store" }),
            )
            .await;

        Ok(stored.id)
    }

    /// Fetch by key, honouring TTL expiry (spec §4.2: "returns null for
    /// expired entries and triggers asynchronous removal").
    #[instrument(skip(self, opts))]
    pub async fn retrieve(&self, key: &str, opts: RetrieveOptions) -> Option<MemoryEntry> {
        let namespace_name = opts.namespace.unwrap_or_else(|| default_namespace().to_string());
        let ns = self.namespace(&namespace_name).await;
        let entry = ns.retrieve(key).await?;

        if entry.is_expired(chrono::Utc::now()) {
            let ns = ns.clone();
            let key = key.to_string();
            tokio::spawn(async move {
                ns.delete(&key).await;
            });
            return None;
        }

        if !opts.skip_touch {
            ns.touch(key).await;
        }
        Some(entry)
    }

    /// Delete by key within `namespace` (spec §6's `deleteEntry`, adapted to
    /// a namespace-scoped key rather than a bare entry id, since keys are
    /// the primary address used throughout §4.2).
    #[instrument(skip(self))]
    pub async fn delete_entry(&self, namespace: &str, key: &str) -> CoreResult<bool> {
        let ns = self.namespace(namespace).await;
        let removed = ns.delete(key).await;

        if removed {
            if let Some(root) = &self.config.persistence_root {
                persistence::append_delete(root, namespace, key).await?;
            }
            self.events
                .publish(
                    "memory.changed",
                    serde_json::json!({ "namespace": namespace, "key": key, "op": "delete" }),
                )
                .await;
        }
        Ok(removed)
    }

    pub async fn list_namespaces(&self) -> Vec<String> {
        self.namespaces.read().await.keys().cloned().collect()
    }

    pub async fn list_types(&self, namespace: &str) -> Vec<MemoryValueType> {
        let ns = self.namespace(namespace).await;
        let entries = ns.all_entries().await;
        let mut types: Vec<MemoryValueType> = entries.iter().map(|e| e.value_type).collect();
        types.sort_by_key(|t| format!("{t:?}"));
        types.dedup_by_key(|t| format!("{t:?}"));
        types
    }

    pub async fn list_tags(&self, namespace: &str) -> Vec<String> {
        let ns = self.namespace(namespace).await;
        let mut tags: HashSet<String> = HashSet::new();
        for entry in ns.all_entries().await {
            tags.extend(entry.tags);
        }
        let mut tags: Vec<String> = tags.into_iter().collect();
        tags.sort();
        tags
    }

    pub(crate) async fn all_namespace_entries(&self, namespace: &str) -> Vec<MemoryEntry> {
        self.namespace(namespace).await.all_entries().await
    }

    pub(crate) async fn namespaces_snapshot(&self) -> HashMap<String, Arc<Namespace>> {
        self.namespaces.read().await.clone()
    }

    pub async fn query(&self, opts: QueryOptions) -> CoreResult<QueryResult> {
        query::run(self, opts).await
    }

    pub async fn cleanup(&self, opts: CleanupOptions) -> CoreResult<CleanupReport> {
        cleanup::run(self, opts).await
    }

    pub async fn get_statistics(&self) -> CoreResult<MemoryStatistics> {
        stats::compute(self).await
    }

    pub async fn export(&self, path: &std::path::Path, opts: ExportOptions) -> CoreResult<ExportReport> {
        export::export(self, path, opts).await
    }

    pub async fn import(&self, path: &std::path::Path, opts: ImportOptions) -> CoreResult<ImportReport> {
        export::import(self, path, opts).await
    }
}

impl From<std::io::Error> for CoreError {
    fn from(err: std::io::Error) -> Self {
        Self::CorruptData(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn store_then_retrieve_round_trips() {
        let memory = DistributedMemory::new(MemoryConfig::default(), EventBus::new());
        memory.store("greeting", serde_json::json!("hi"), StoreOptions::default()).await.unwrap();
        let entry = memory.retrieve("greeting", RetrieveOptions::default()).await.unwrap();
        assert_eq!(entry.value, serde_json::json!("hi"));
        assert_eq!(entry.version, 1);
    }

    #[tokio::test]
    async fn expired_entry_is_not_returned() {
        let memory = DistributedMemory::new(MemoryConfig::default(), EventBus::new());
        memory
            .store(
                "temp",
                serde_json::json!(1),
                StoreOptions { ttl_ms: Some(-1), ..Default::default() },
            )
            .await
            .unwrap();
        assert!(memory.retrieve("temp", RetrieveOptions::default()).await.is_none());
    }

    #[tokio::test]
    async fn delete_on_absent_key_is_false() {
        let memory = DistributedMemory::new(MemoryConfig::default(), EventBus::new());
        assert!(!memory.delete_entry("default", "missing").await.unwrap());
    }

    #[tokio::test]
    async fn version_is_monotonic_across_supersedes() {
        let memory = DistributedMemory::new(MemoryConfig::default(), EventBus::new());
        memory.store("k", serde_json::json!(1), StoreOptions::default()).await.unwrap();
        memory.store("k", serde_json::json!(2), StoreOptions::default()).await.unwrap();
        let entry = memory.retrieve("k", RetrieveOptions::default()).await.unwrap();
        assert_eq!(entry.version, 2);
    }

    #[tokio::test]
    async fn store_rejects_writes_that_would_exceed_the_memory_budget() {
        let memory = DistributedMemory::new(MemoryConfig { max_memory_bytes: Some(16), ..MemoryConfig::default() }, EventBus::new());
        let err = memory
            .store("k", serde_json::json!("a value far longer than sixteen bytes"), StoreOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::CapacityExceeded(_)));
    }

    #[tokio::test]
    async fn store_budget_check_does_not_double_count_an_overwritten_key() {
        let memory = DistributedMemory::new(MemoryConfig { max_memory_bytes: Some(64), ..MemoryConfig::default() }, EventBus::new());
        memory.store("k", serde_json::json!("short"), StoreOptions::default()).await.unwrap();
        // Re-storing under the same key must subtract the superseded entry's
        // size from the running total, not add to it.
        memory.store("k", serde_json::json!("short"), StoreOptions::default()).await.unwrap();
        let entry = memory.retrieve("k", RetrieveOptions::default()).await.unwrap();
        assert_eq!(entry.version, 2);
    }
}
