//! The bounded worker pool: `max_concurrency` workers pulling from one FIFO
//! queue (spec §4.4: "Submissions enter a FIFO priority queue. Workers
//! dequeue and spawn the external process"). Grounded on the
//! `Semaphore::acquire_owned` + `tokio::spawn` fan-out shape of the
//! teacher's `services::dag_executor::execute_wave`, reworked from a
//! one-shot wave of tasks into a long-lived pool draining a channel.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::time::sleep;
use tracing::debug;

use crate::domain::ids::ExecutionId;
use crate::event_bus::EventBus;
use crate::memory::{DistributedMemory, StoreOptions};

use super::{process, retry, ExecutionRecord, ExecutionStatus, Inner};

/// `priority` is a placeholder for a future priority lane; the queue is
/// plain FIFO today per spec §4.4's literal description.
pub(crate) fn spawn_pool(
    concurrency: usize,
    queue_rx: mpsc::UnboundedReceiver<ExecutionId>,
    inner: Arc<RwLock<Inner>>,
    events: EventBus,
    memory: Option<Arc<DistributedMemory>>,
    namespace: String,
) {
    let queue_rx = Arc::new(Mutex::new(queue_rx));

    for worker_id in 0..concurrency.max(1) {
        let queue_rx = queue_rx.clone();
        let inner = inner.clone();
        let events = events.clone();
        let memory = memory.clone();
        let namespace = namespace.clone();

        tokio::spawn(async move {
            loop {
                let id = {
                    let mut rx = queue_rx.lock().await;
                    match rx.recv().await {
                        Some(id) => id,
                        None => break,
                    }
                };
                run_one(id, &inner, &events, &memory, &namespace).await;
            }
            debug!(worker_id, "executor worker shut down");
        });
    }
}

async fn persist(memory: &Option<Arc<DistributedMemory>>, namespace: &str, record: &ExecutionRecord) {
    if !record.persist {
        return;
    }
    let Some(memory) = memory else { return };
    let Ok(value) = serde_json::to_value(record) else { return };
    let key = format!("exec/{}", record.id);
    let _ = memory.store(&key, value, StoreOptions { namespace: Some(namespace.to_string()), ..Default::default() }).await;
}

async fn run_one(id: ExecutionId, inner: &Arc<RwLock<Inner>>, events: &EventBus, memory: &Option<Arc<DistributedMemory>>, namespace: &str) {
    let (mut record, cancel) = {
        let mut guard = inner.write().await;
        let Some(cancel) = guard.cancel.get(&id).cloned() else { return };
        let Some(record) = guard.records.get_mut(&id) else { return };
        if record.status != ExecutionStatus::Queued {
            return;
        }
        record.status = ExecutionStatus::Running;
        record.started_at = Some(Utc::now());
        (record.clone(), cancel)
    };

    persist(memory, namespace, &record).await;
    events.publish("executor.started", json!({ "execution_id": id.to_string() })).await;

    loop {
        record.attempts += 1;
        let outcome = process::spawn_and_wait(
            &record.command,
            &record.args,
            record.cwd.as_deref(),
            &record.env,
            record.capture,
            record.timeout_ms,
            record.grace_period_ms,
            &cancel,
        )
        .await;

        let retries_remain = record.attempts < record.max_attempts;

        match outcome {
            Ok(result) => {
                record.exit_code = result.exit_code;
                record.stdout = result.stdout;
                record.stderr = result.stderr;

                if result.cancelled {
                    record.status = ExecutionStatus::Cancelled;
                    break;
                }
                if result.timed_out {
                    record.last_error = Some(format!("timed out after {:?}ms", record.timeout_ms));
                    if retries_remain {
                        sleep(retry::full_jitter_delay(record.backoff_base_ms, record.backoff_factor, record.attempts)).await;
                        continue;
                    }
                    record.status = ExecutionStatus::Timeout;
                    break;
                }
                if result.exit_code == Some(0) {
                    record.status = ExecutionStatus::Success;
                    break;
                }
                record.last_error = Some(format!("exited with code {:?}", result.exit_code));
            }
            Err(err) => {
                record.last_error = Some(err.to_string());
            }
        }

        if cancel.is_cancelled() {
            record.status = ExecutionStatus::Cancelled;
            break;
        }
        if !retries_remain {
            record.status = ExecutionStatus::Failed;
            break;
        }
        sleep(retry::full_jitter_delay(record.backoff_base_ms, record.backoff_factor, record.attempts)).await;
    }

    record.finished_at = Some(Utc::now());
    {
        let mut guard = inner.write().await;
        guard.records.insert(id, record.clone());
    }
    persist(memory, namespace, &record).await;
    events
        .publish("executor.completed", json!({ "execution_id": id.to_string(), "status": format!("{:?}", record.status) }))
        .await;
}
