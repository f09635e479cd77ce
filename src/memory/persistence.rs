//! Write-ahead log persistence for Distributed Memory (spec §6):
//! `<root>/memory/<namespace>/<shard-id>.log`, length-prefixed and
//! checksummed records. There is deliberately no relational database layer
//! here (see DESIGN.md for the dropped `sqlx` dependency) — the teacher
//! rolls lightweight persistence by hand the same way in
//! `application::agent_executor`'s local state files.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

use crate::domain::memory_entry::MemoryEntry;
use crate::error::{CoreError, CoreResult};

/// A single persisted mutation, in writer order.
#[derive(Debug, Clone, Serialize, Deserialize)]
enum WalRecord {
    Store(MemoryEntry),
    Delete { key: String },
}

fn checksum(bytes: &[u8]) -> u64 {
    let mut hasher = DefaultHasher::new();
    bytes.hash(&mut hasher);
    hasher.finish()
}

fn log_path(root: &Path, namespace: &str) -> PathBuf {
    // All shards currently share one log per namespace; sharded persistence
    // would fan this out by shard index using the same record format.
    root.join("memory").join(namespace).join("shard-0.log")
}

async fn append(root: &Path, namespace: &str, record: &WalRecord) -> CoreResult<()> {
    let path = log_path(root, namespace);
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let body = serde_json::to_vec(record)?;
    let sum = checksum(&body);
    let mut framed = Vec::with_capacity(body.len() + 16);
    framed.extend_from_slice(&(body.len() as u32).to_le_bytes());
    framed.extend_from_slice(&sum.to_le_bytes());
    framed.extend_from_slice(&body);

    let mut file = tokio::fs::OpenOptions::new().create(true).append(true).open(&path).await?;
    file.write_all(&framed).await?;
    file.flush().await?;
    Ok(())
}

pub(crate) async fn append_store(root: &Path, namespace: &str, entry: &MemoryEntry) -> CoreResult<()> {
    append(root, namespace, &WalRecord::Store(entry.clone())).await
}

pub(crate) async fn append_delete(root: &Path, namespace: &str, key: &str) -> CoreResult<()> {
    append(root, namespace, &WalRecord::Delete { key: key.to_string() }).await
}

/// Replay a namespace's log from disk, applying records in order. Used on
/// restart to rebuild in-memory state; returns the final set of live
/// entries (deletes removing their matching stores).
pub async fn replay(root: &Path, namespace: &str) -> CoreResult<Vec<MemoryEntry>> {
    let path = log_path(root, namespace);
    let Ok(bytes) = tokio::fs::read(&path).await else {
        return Ok(Vec::new());
    };

    let mut live: std::collections::HashMap<String, MemoryEntry> = std::collections::HashMap::new();
    let mut cursor = 0usize;
    while cursor + 12 <= bytes.len() {
        let len = u32::from_le_bytes(bytes[cursor..cursor + 4].try_into().unwrap()) as usize;
        let sum = u64::from_le_bytes(bytes[cursor + 4..cursor + 12].try_into().unwrap());
        cursor += 12;
        if cursor + len > bytes.len() {
            return Err(CoreError::CorruptData(format!("truncated record in {}", path.display())));
        }
        let body = &bytes[cursor..cursor + len];
        if checksum(body) != sum {
            return Err(CoreError::CorruptData(format!("checksum mismatch in {}", path.display())));
        }
        let record: WalRecord = serde_json::from_slice(body)?;
        match record {
            WalRecord::Store(entry) => {
                live.insert(entry.key.clone(), entry);
            }
            WalRecord::Delete { key } => {
                live.remove(&key);
            }
        }
        cursor += len;
    }

    Ok(live.into_values().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::memory_entry::{AccessLevel, MemoryValueType};
    use crate::memory::shard::new_entry;

    #[tokio::test]
    async fn replay_reconstructs_live_entries_after_delete() {
        let dir = tempfile::tempdir().unwrap();
        let entry = new_entry(
            "ns", "k", serde_json::json!(1), MemoryValueType::Number,
            Default::default(), None, AccessLevel::Private, None, false, 1,
        );
        append_store(dir.path(), "ns", &entry).await.unwrap();

        let second = new_entry(
            "ns", "other", serde_json::json!(2), MemoryValueType::Number,
            Default::default(), None, AccessLevel::Private, None, false, 1,
        );
        append_store(dir.path(), "ns", &second).await.unwrap();
        append_delete(dir.path(), "ns", "k").await.unwrap();

        let live = replay(dir.path(), "ns").await.unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].key, "other");
    }

    #[tokio::test]
    async fn replay_of_missing_log_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let live = replay(dir.path(), "nothing-here").await.unwrap();
        assert!(live.is_empty());
    }
}
