//! Process-wide topic-based pub/sub (spec §4.1).
//!
//! Delivery is at-most-once, synchronous, and in-order per publisher per
//! topic (spec §8 invariant 5). Exceptions never propagate to the
//! publisher: a handler that returns an error is logged and does not block
//! delivery to the remaining subscribers.
//!
//! Grounded on the shape of the teacher's `services::event_bus` envelope
//! (an id/severity/category/timestamp event struct) but reworked from a
//! `tokio::broadcast` stream into the subscribe/publish contract spec §4.1
//! actually specifies.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use tracing::warn;

/// Opaque handle returned by [`EventBus::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// An event delivered to subscribers.
#[derive(Debug, Clone)]
pub struct Event {
    pub topic: String,
    pub payload: Value,
    pub published_at: DateTime<Utc>,
}

type HandlerFn = dyn Fn(Event) -> BoxFuture<'static, Result<(), String>> + Send + Sync;

struct Subscription {
    id: SubscriptionId,
    pattern: String,
    handler: Arc<HandlerFn>,
}

/// Whether `topic` matches `pattern`. Patterns support exact match and a
/// single trailing `*` wildcard (spec §4.1).
fn pattern_matches(pattern: &str, topic: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => topic.starts_with(prefix),
        None => pattern == topic,
    }
}

/// The event bus. Cheaply cloneable; intended to be constructed once at
/// startup and shared (spec §9: "Global singletons… must be constructed at
/// startup and immutable thereafter").
#[derive(Clone)]
pub struct EventBus {
    subscriptions: Arc<RwLock<Vec<Subscription>>>,
    /// One lock per topic, so concurrent publishes to the *same* topic
    /// cannot interleave their fan-out passes (spec §5: "Event Bus
    /// publishes require no lock beyond the (short) subscriber-list read
    /// lock" — this is that lock, scoped per topic instead of global so
    /// unrelated topics never contend).
    topic_locks: Arc<RwLock<HashMap<String, Arc<Mutex<()>>>>>,
    next_id: Arc<AtomicU64>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        Self {
            subscriptions: Arc::new(RwLock::new(Vec::new())),
            topic_locks: Arc::new(RwLock::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Register a handler for a topic pattern. Handlers are invoked in
    /// subscription-registration order on each matching publish.
    pub async fn subscribe<F, Fut>(&self, pattern: impl Into<String>, handler: F) -> SubscriptionId
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<(), String>> + Send + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let handler = Arc::new(move |event: Event| -> BoxFuture<'static, Result<(), String>> {
            Box::pin(handler(event))
        });
        self.subscriptions.write().await.push(Subscription {
            id,
            pattern: pattern.into(),
            handler,
        });
        id
    }

    /// Remove a subscription. No-op if already removed.
    pub async fn unsubscribe(&self, id: SubscriptionId) {
        self.subscriptions.write().await.retain(|s| s.id != id);
    }

    async fn topic_lock(&self, topic: &str) -> Arc<Mutex<()>> {
        if let Some(lock) = self.topic_locks.read().await.get(topic) {
            return lock.clone();
        }
        let mut locks = self.topic_locks.write().await;
        locks.entry(topic.to_string()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    /// Publish `payload` on `topic`, synchronously fanning out to every
    /// matching subscriber in registration order. Never returns an error on
    /// a subscriber's behalf — failures are logged (spec §4.1).
    pub async fn publish(&self, topic: impl Into<String>, payload: Value) {
        let topic = topic.into();
        let lock = self.topic_lock(&topic).await;
        let _guard = lock.lock().await;

        let event = Event {
            topic: topic.clone(),
            payload,
            published_at: Utc::now(),
        };

        let matching: Vec<Arc<HandlerFn>> = {
            let subs = self.subscriptions.read().await;
            subs.iter()
                .filter(|s| pattern_matches(&s.pattern, &topic))
                .map(|s| s.handler.clone())
                .collect()
        };

        for handler in matching {
            if let Err(err) = handler(event.clone()).await {
                warn!(topic = %event.topic, error = %err, "event handler failed");
            }
        }
    }
}
