//! Scenario C: versioned overwrite, full-text query, and tag cleanup on
//! delete.

use serde_json::json;
use swarmcore::event_bus::EventBus;
use swarmcore::memory::{DistributedMemory, MemoryConfig, QueryOptions, RetrieveOptions, StoreOptions};

#[tokio::test]
async fn overwrite_bumps_version_and_is_queryable_by_fulltext() {
    let memory = DistributedMemory::new(MemoryConfig::default(), EventBus::new());

    memory.store("k", json!("v1"), StoreOptions { namespace: Some("default".to_string()), ..Default::default() }).await.unwrap();
    memory.store("k", json!("v2"), StoreOptions { namespace: Some("default".to_string()), ..Default::default() }).await.unwrap();

    let entry = memory.retrieve("k", RetrieveOptions { namespace: Some("default".to_string()), ..Default::default() }).await.unwrap();
    assert_eq!(entry.value, json!("v2"));
    assert_eq!(entry.version, 2);

    let result = memory
        .query(QueryOptions { namespace: Some("default".to_string()), fulltext: Some("v2".to_string()), ..Default::default() })
        .await
        .unwrap();
    assert_eq!(result.entries.len(), 1);
    assert_eq!(result.entries[0].key, "k");
}

#[tokio::test]
async fn delete_removes_the_entry_and_its_unique_tags() {
    let memory = DistributedMemory::new(MemoryConfig::default(), EventBus::new());

    memory
        .store(
            "k",
            json!("v1"),
            StoreOptions { namespace: Some("default".to_string()), tags: ["only-on-k".to_string()].into_iter().collect(), ..Default::default() },
        )
        .await
        .unwrap();

    assert!(memory.list_tags("default").await.contains(&"only-on-k".to_string()));

    let deleted = memory.delete_entry("default", "k").await.unwrap();
    assert!(deleted);

    let entry = memory.retrieve("k", RetrieveOptions { namespace: Some("default".to_string()), ..Default::default() }).await;
    assert!(entry.is_none());
    assert!(!memory.list_tags("default").await.contains(&"only-on-k".to_string()));
}
