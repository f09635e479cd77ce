//! `getStatistics` (spec §4.2): a point-in-time rollup used by operators and
//! by `cleanup`'s "cleanup-recommended" signal.

use std::collections::HashMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::CoreResult;

use super::DistributedMemory;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Overview {
    pub total_entries: usize,
    pub total_bytes: usize,
    pub compressed_entries: usize,
    pub compression_ratio: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Distribution {
    pub by_namespace: HashMap<String, usize>,
    pub by_type: HashMap<String, usize>,
    pub by_owner: HashMap<String, usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Health {
    pub expired_count: usize,
    pub orphaned_count: usize,
    pub duplicate_key_count: usize,
    pub corrupted_count: usize,
    pub cleanup_recommended: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryStatistics {
    pub overview: Overview,
    pub distribution: Distribution,
    pub health: Health,
    pub optimization_suggestions: Vec<String>,
    pub potential_savings_bytes: usize,
}

pub(crate) async fn compute(memory: &DistributedMemory) -> CoreResult<MemoryStatistics> {
    let namespaces = memory.list_namespaces().await;
    let now = Utc::now();

    let mut stats = MemoryStatistics::default();
    let mut fingerprints: HashMap<String, usize> = HashMap::new();

    for namespace in &namespaces {
        let entries = memory.all_namespace_entries(namespace).await;
        let ns_count = entries.len();
        *stats.distribution.by_namespace.entry(namespace.clone()).or_insert(0) += ns_count;

        for entry in &entries {
            stats.overview.total_entries += 1;
            stats.overview.total_bytes += entry.size_bytes;
            if entry.compressed {
                stats.overview.compressed_entries += 1;
            }
            *stats.distribution.by_type.entry(format!("{:?}", entry.value_type)).or_insert(0) += 1;
            if let Some(owner) = &entry.owner {
                *stats.distribution.by_owner.entry(owner.clone()).or_insert(0) += 1;
            }
            if entry.is_expired(now) {
                stats.health.expired_count += 1;
            }
            if entry.tags.contains("orphan") {
                stats.health.orphaned_count += 1;
            }
            *fingerprints.entry(entry.value.to_string()).or_insert(0) += 1;
        }
    }

    stats.health.duplicate_key_count = fingerprints.values().filter(|&&count| count > 1).count();
    stats.overview.compression_ratio = if stats.overview.total_entries == 0 {
        0.0
    } else {
        stats.overview.compressed_entries as f64 / stats.overview.total_entries as f64
    };

    stats.health.cleanup_recommended =
        stats.health.expired_count > 0 || stats.health.orphaned_count > 0 || stats.health.duplicate_key_count > 0;

    if stats.health.expired_count > 0 {
        stats
            .optimization_suggestions
            .push(format!("run cleanup with remove-expired to reclaim {} entries", stats.health.expired_count));
        stats.potential_savings_bytes += stats.health.expired_count * (stats.overview.total_bytes
            .checked_div(stats.overview.total_entries.max(1))
            .unwrap_or(0));
    }
    if stats.health.duplicate_key_count > 0 {
        stats
            .optimization_suggestions
            .push(format!("run cleanup with remove-duplicates to drop {} duplicate values", stats.health.duplicate_key_count));
    }

    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_bus::EventBus;
    use crate::memory::{DistributedMemory, MemoryConfig, StoreOptions};

    #[tokio::test]
    async fn statistics_reflect_stored_entries() {
        let memory = DistributedMemory::new(MemoryConfig::default(), EventBus::new());
        memory.store("a", serde_json::json!(1), StoreOptions::default()).await.unwrap();
        memory.store("b", serde_json::json!(2), StoreOptions::default()).await.unwrap();

        let stats = memory.get_statistics().await.unwrap();
        assert_eq!(stats.overview.total_entries, 2);
        assert!(!stats.health.cleanup_recommended);
    }
}
