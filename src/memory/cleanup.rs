//! `cleanup` (spec §4.2): scheduled reclamation of expired, stale, orphaned
//! and duplicate entries. Must be idempotent when run twice with no writes
//! in between (spec §8 idempotence property).

use std::collections::HashMap;

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreResult;

use super::{DistributedMemory, RetrieveOptions, StoreOptions};

/// A single cleanup action family. `dry_run` runs every selected action's
/// detection pass without mutating anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CleanupAction {
    RemoveExpired,
    RemoveOlderThan,
    RemoveUnaccessed,
    RemoveOrphaned,
    RemoveDuplicates,
    CompressEligible,
    ArchiveOld,
}

#[derive(Debug, Clone, Default)]
pub struct CleanupOptions {
    pub namespace: Option<String>,
    pub actions: Vec<CleanupAction>,
    pub older_than_ms: Option<i64>,
    pub unaccessed_for_ms: Option<i64>,
    pub archive_older_than_ms: Option<i64>,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CleanupReport {
    pub removed: usize,
    pub archived: usize,
    pub compressed: usize,
    pub bytes_reclaimed: usize,
    pub actions: Vec<String>,
}

/// Reserved tag an application can attach to mark an entry orphaned (e.g.
/// the agent or task it belonged to no longer exists). Memory has no view
/// into other components' lifecycles, so orphan detection is caller-driven
/// rather than inferred.
const ORPHAN_TAG: &str = "orphan";

pub(crate) async fn run(memory: &DistributedMemory, opts: CleanupOptions) -> CoreResult<CleanupReport> {
    let namespaces = match &opts.namespace {
        Some(ns) => vec![ns.clone()],
        None => memory.list_namespaces().await,
    };

    let mut report = CleanupReport::default();
    let now = Utc::now();

    for namespace in namespaces {
        let entries = memory.all_namespace_entries(&namespace).await;

        if opts.actions.contains(&CleanupAction::RemoveExpired) {
            report.actions.push("remove-expired".to_string());
            for entry in entries.iter().filter(|e| e.is_expired(now)) {
                report.bytes_reclaimed += entry.size_bytes;
                report.removed += 1;
                if !opts.dry_run {
                    memory.delete_entry(&namespace, &entry.key).await?;
                }
            }
        }

        if let Some(older_than_ms) = opts.older_than_ms {
            if opts.actions.contains(&CleanupAction::RemoveOlderThan) {
                report.actions.push("remove-older-than".to_string());
                let cutoff = now - Duration::milliseconds(older_than_ms);
                for entry in entries.iter().filter(|e| e.created_at < cutoff) {
                    report.bytes_reclaimed += entry.size_bytes;
                    report.removed += 1;
                    if !opts.dry_run {
                        memory.delete_entry(&namespace, &entry.key).await?;
                    }
                }
            }
        }

        if let Some(unaccessed_for_ms) = opts.unaccessed_for_ms {
            if opts.actions.contains(&CleanupAction::RemoveUnaccessed) {
                report.actions.push("remove-unaccessed".to_string());
                let cutoff = now - Duration::milliseconds(unaccessed_for_ms);
                for entry in entries.iter().filter(|e| e.last_accessed_at < cutoff) {
                    report.bytes_reclaimed += entry.size_bytes;
                    report.removed += 1;
                    if !opts.dry_run {
                        memory.delete_entry(&namespace, &entry.key).await?;
                    }
                }
            }
        }

        if opts.actions.contains(&CleanupAction::RemoveOrphaned) {
            report.actions.push("remove-orphaned".to_string());
            for entry in entries.iter().filter(|e| e.tags.contains(ORPHAN_TAG)) {
                report.bytes_reclaimed += entry.size_bytes;
                report.removed += 1;
                if !opts.dry_run {
                    memory.delete_entry(&namespace, &entry.key).await?;
                }
            }
        }

        if opts.actions.contains(&CleanupAction::RemoveDuplicates) {
            report.actions.push("remove-duplicates".to_string());
            let mut seen: HashMap<String, String> = HashMap::new();
            let mut ordered = entries.clone();
            ordered.sort_by_key(|e| e.created_at);
            for entry in &ordered {
                let fingerprint = entry.value.to_string();
                if let Some(_first_key) = seen.get(&fingerprint) {
                    report.bytes_reclaimed += entry.size_bytes;
                    report.removed += 1;
                    if !opts.dry_run {
                        memory.delete_entry(&namespace, &entry.key).await?;
                    }
                } else {
                    seen.insert(fingerprint, entry.key.clone());
                }
            }
        }

        if opts.actions.contains(&CleanupAction::CompressEligible) {
            report.actions.push("compress-eligible".to_string());
            let threshold = memory.config().compression_threshold_bytes;
            for entry in entries.iter().filter(|e| !e.compressed && e.size_bytes >= threshold) {
                report.compressed += 1;
                if !opts.dry_run {
                    memory
                        .store(
                            &entry.key,
                            entry.value.clone(),
                            StoreOptions {
                                namespace: Some(namespace.clone()),
                                value_type: Some(entry.value_type),
                                tags: entry.tags.clone(),
                                owner: entry.owner.clone(),
                                access_level: Some(entry.access_level),
                                ttl_ms: None,
                                force_compress: true,
                            },
                        )
                        .await?;
                }
            }
        }

        if let Some(archive_older_than_ms) = opts.archive_older_than_ms {
            if opts.actions.contains(&CleanupAction::ArchiveOld) {
                report.actions.push("archive-old".to_string());
                let cutoff = now - Duration::milliseconds(archive_older_than_ms);
                for entry in entries.iter().filter(|e| e.updated_at < cutoff) {
                    report.archived += 1;
                    if !opts.dry_run {
                        memory
                            .store(
                                &entry.key,
                                entry.value.clone(),
                                StoreOptions {
                                    namespace: Some(format!("archive/{namespace}")),
                                    value_type: Some(entry.value_type),
                                    tags: entry.tags.clone(),
                                    owner: entry.owner.clone(),
                                    access_level: Some(entry.access_level),
                                    ttl_ms: None,
                                    force_compress: entry.compressed,
                                },
                            )
                            .await?;
                        memory.delete_entry(&namespace, &entry.key).await?;
                    }
                }
            }
        }
    }

    Ok(report)
}
