//! `query` (spec §4.2): filtered, paginated, optionally aggregated reads
//! across a namespace's merged shard view.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::memory_entry::{AccessLevel, MemoryEntry, MemoryValueType};
use crate::error::CoreResult;

use super::DistributedMemory;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// What to group by when `aggregate_by` is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregation {
    Namespace,
    Type,
    Owner,
    Tag,
}

#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    pub namespace: Option<String>,
    pub value_type: Option<MemoryValueType>,
    pub tags: Vec<String>,
    pub owner: Option<String>,
    pub access_level: Option<AccessLevel>,
    pub key_pattern: Option<String>,
    pub value_contains: Option<String>,
    pub fulltext: Option<String>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    pub updated_after: Option<DateTime<Utc>>,
    pub updated_before: Option<DateTime<Utc>>,
    pub min_size_bytes: Option<usize>,
    pub max_size_bytes: Option<usize>,
    pub include_expired: bool,
    pub offset: usize,
    pub limit: Option<usize>,
    pub sort_by_updated_at: bool,
    pub sort_order: Option<SortOrder>,
    pub aggregate_by: Option<Aggregation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationBucket {
    pub key: String,
    pub count: usize,
    pub total_size: usize,
}

#[derive(Debug, Clone)]
pub struct QueryResult {
    pub entries: Vec<MemoryEntry>,
    pub total: usize,
    pub aggregations: Option<Vec<AggregationBucket>>,
}

fn matches(entry: &MemoryEntry, opts: &QueryOptions) -> bool {
    if !opts.include_expired && entry.is_expired(Utc::now()) {
        return false;
    }
    if let Some(t) = opts.value_type {
        if entry.value_type != t {
            return false;
        }
    }
    if !opts.tags.is_empty() && !opts.tags.iter().all(|tag| entry.tags.contains(tag)) {
        return false;
    }
    if let Some(owner) = &opts.owner {
        if entry.owner.as_deref() != Some(owner.as_str()) {
            return false;
        }
    }
    if let Some(level) = opts.access_level {
        if entry.access_level != level {
            return false;
        }
    }
    if let Some(pattern) = &opts.key_pattern {
        if !entry.key.contains(pattern.as_str()) {
            return false;
        }
    }
    if let Some(needle) = &opts.value_contains {
        let hay = entry.value.to_string();
        if !hay.contains(needle.as_str()) {
            return false;
        }
    }
    if let Some(query) = &opts.fulltext {
        let hay = match &entry.value {
            serde_json::Value::String(s) => s.to_lowercase(),
            other => other.to_string().to_lowercase(),
        };
        if !query.to_lowercase().split_whitespace().all(|token| hay.contains(token)) {
            return false;
        }
    }
    if let Some(after) = opts.created_after {
        if entry.created_at < after {
            return false;
        }
    }
    if let Some(before) = opts.created_before {
        if entry.created_at > before {
            return false;
        }
    }
    if let Some(after) = opts.updated_after {
        if entry.updated_at < after {
            return false;
        }
    }
    if let Some(before) = opts.updated_before {
        if entry.updated_at > before {
            return false;
        }
    }
    if let Some(min) = opts.min_size_bytes {
        if entry.size_bytes < min {
            return false;
        }
    }
    if let Some(max) = opts.max_size_bytes {
        if entry.size_bytes > max {
            return false;
        }
    }
    true
}

fn aggregate(entries: &[MemoryEntry], by: Aggregation) -> Vec<AggregationBucket> {
    let mut buckets: HashMap<String, (usize, usize)> = HashMap::new();
    for entry in entries {
        let keys: Vec<String> = match by {
            Aggregation::Namespace => vec![entry.namespace.clone()],
            Aggregation::Type => vec![format!("{:?}", entry.value_type)],
            Aggregation::Owner => vec![entry.owner.clone().unwrap_or_default()],
            Aggregation::Tag => entry.tags.iter().cloned().collect(),
        };
        for key in keys {
            let bucket = buckets.entry(key).or_insert((0, 0));
            bucket.0 += 1;
            bucket.1 += entry.size_bytes;
        }
    }
    let mut out: Vec<AggregationBucket> = buckets
        .into_iter()
        .map(|(key, (count, total_size))| AggregationBucket { key, count, total_size })
        .collect();
    out.sort_by(|a, b| a.key.cmp(&b.key));
    out
}

pub(crate) async fn run(memory: &DistributedMemory, opts: QueryOptions) -> CoreResult<QueryResult> {
    let mut entries: Vec<MemoryEntry> = match &opts.namespace {
        Some(ns) => memory.all_namespace_entries(ns).await,
        None => {
            let mut all = Vec::new();
            for ns in memory.list_namespaces().await {
                all.extend(memory.all_namespace_entries(&ns).await);
            }
            all
        }
    };
    entries.retain(|entry| matches(entry, &opts));

    if opts.fulltext.is_some() && opts.key_pattern.is_none() {
        // fulltext already filtered above via `matches`.
    }

    entries.sort_by(|a, b| a.key.cmp(&b.key));
    if opts.sort_by_updated_at {
        entries.sort_by_key(|e| e.updated_at);
    }
    if opts.sort_order == Some(SortOrder::Descending) {
        entries.reverse();
    }

    let total = entries.len();
    let aggregations = opts.aggregate_by.map(|by| aggregate(&entries, by));

    let page: Vec<MemoryEntry> = entries
        .into_iter()
        .skip(opts.offset)
        .take(opts.limit.unwrap_or(usize::MAX))
        .collect();

    Ok(QueryResult { entries: page, total, aggregations })
}
