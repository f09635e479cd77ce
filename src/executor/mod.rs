//! Background Executor: bounded concurrent execution of external processes
//! with retry, timeout, and optional persistence to Distributed Memory
//! (spec §4.4).
//!
//! Grounded on the teacher's `application::mcp_process_manager` (process
//! lifecycle: spawn, graceful-then-forced shutdown) and
//! `application::agent_executor` / `infrastructure::claude::retry`
//! (timeout + exponential-backoff retry loop around one unit of work),
//! reworked around a persisted [`ExecutionRecord`] instead of an
//! in-memory-only result.

mod process;
mod retry;
mod worker;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Notify, RwLock};
use tracing::{info, instrument};

use crate::domain::ids::ExecutionId;
use crate::error::{CoreError, CoreResult};
use crate::event_bus::EventBus;
use crate::memory::{DistributedMemory, StoreOptions};

/// Tunables for a [`BackgroundExecutor`] (spec §4.4, §6).
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Bound on concurrently running processes
    /// (`SWARMCORE_EXECUTOR_MAX_CONCURRENCY`).
    pub max_concurrency: usize,
    /// Distributed Memory namespace execution records are persisted under.
    pub memory_namespace: String,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self { max_concurrency: 8, memory_namespace: "executor".to_string() }
    }
}

/// What of a child process's output to capture (spec §4.4 `capture`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureMode {
    Stdout,
    Stderr,
    Both,
    None,
}

impl CaptureMode {
    const fn wants_stdout(self) -> bool {
        matches!(self, Self::Stdout | Self::Both)
    }

    const fn wants_stderr(self) -> bool {
        matches!(self, Self::Stderr | Self::Both)
    }
}

/// One `submit` call's parameters (spec §4.4).
#[derive(Debug, Clone)]
pub struct SubmitOptions {
    pub cwd: Option<PathBuf>,
    pub env: HashMap<String, String>,
    pub timeout_ms: Option<u64>,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_factor: f64,
    pub grace_period_ms: u64,
    pub capture: CaptureMode,
    pub persist: bool,
}

impl Default for SubmitOptions {
    fn default() -> Self {
        Self {
            cwd: None,
            env: HashMap::new(),
            timeout_ms: None,
            max_attempts: 1,
            backoff_base_ms: 500,
            backoff_factor: 2.0,
            grace_period_ms: 5_000,
            capture: CaptureMode::Both,
            persist: false,
        }
    }
}

/// Lifecycle state of one submission (spec §4.4 `status`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Queued,
    Running,
    Success,
    Failed,
    Cancelled,
    Timeout,
}

impl ExecutionStatus {
    const fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Cancelled | Self::Timeout)
    }
}

/// The persisted/queryable record of one `submit` call: its parameters plus
/// everything learned while running it (spec §4.4: "the full execution
/// record (cmd, args, attempts, final status, captured bytes or a pointer to
/// them)").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: ExecutionId,
    pub command: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: HashMap<String, String>,
    pub timeout_ms: Option<u64>,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_factor: f64,
    pub grace_period_ms: u64,
    pub capture: CaptureMode,
    pub persist: bool,
    pub attempts: u32,
    pub status: ExecutionStatus,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub last_error: Option<String>,
    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl ExecutionRecord {
    fn new(id: ExecutionId, command: String, args: Vec<String>, opts: &SubmitOptions) -> Self {
        Self {
            id,
            command,
            args,
            cwd: opts.cwd.clone(),
            env: opts.env.clone(),
            timeout_ms: opts.timeout_ms,
            max_attempts: opts.max_attempts.max(1),
            backoff_base_ms: opts.backoff_base_ms,
            backoff_factor: opts.backoff_factor,
            grace_period_ms: opts.grace_period_ms,
            capture: opts.capture,
            persist: opts.persist,
            attempts: 0,
            status: ExecutionStatus::Queued,
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            last_error: None,
            submitted_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }
}

/// Cooperative cancellation signal for one execution: a flag so a worker
/// that hasn't dispatched the process yet can see cancellation without
/// missing an edge-triggered notification, plus a [`Notify`] so a worker
/// already waiting on the child process wakes up promptly.
struct CancelHandle {
    requested: AtomicBool,
    notify: Notify,
}

impl CancelHandle {
    fn new() -> Arc<Self> {
        Arc::new(Self { requested: AtomicBool::new(false), notify: Notify::new() })
    }

    fn cancel(&self) {
        self.requested.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    fn is_cancelled(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    async fn notified(&self) {
        self.notify.notified().await;
    }
}

struct Inner {
    records: HashMap<ExecutionId, ExecutionRecord>,
    cancel: HashMap<ExecutionId, Arc<CancelHandle>>,
}

/// The Background Executor component.
pub struct BackgroundExecutor {
    config: ExecutorConfig,
    inner: Arc<RwLock<Inner>>,
    events: EventBus,
    memory: Option<Arc<DistributedMemory>>,
    queue_tx: mpsc::UnboundedSender<ExecutionId>,
}

impl BackgroundExecutor {
    /// Build a new executor and start its worker pool. `memory` is the
    /// Distributed Memory instance execution records persist to when a
    /// submission sets `persist`; `None` disables persistence entirely.
    #[must_use]
    pub fn new(config: ExecutorConfig, events: EventBus, memory: Option<Arc<DistributedMemory>>) -> Self {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(RwLock::new(Inner { records: HashMap::new(), cancel: HashMap::new() }));

        worker::spawn_pool(config.max_concurrency, queue_rx, inner.clone(), events.clone(), memory.clone(), config.memory_namespace.clone());

        Self { config, inner, events, memory, queue_tx }
    }

    /// Submit a command for execution; returns its [`ExecutionId`] immediately,
    /// before the process has necessarily started (spec §4.4 `submit`).
    #[instrument(skip(self, opts))]
    pub async fn submit(&self, command: impl Into<String> + std::fmt::Debug, args: Vec<String>, opts: SubmitOptions) -> CoreResult<ExecutionId> {
        let id = ExecutionId::new();
        let record = ExecutionRecord::new(id, command.into(), args, &opts);

        {
            let mut inner = self.inner.write().await;
            inner.records.insert(id, record.clone());
            inner.cancel.insert(id, CancelHandle::new());
        }

        if opts.persist {
            self.persist(&record).await?;
        }

        self.events.publish("executor.submitted", serde_json::json!({ "execution_id": id.to_string() })).await;
        self.queue_tx
            .send(id)
            .map_err(|_| CoreError::ValidationFailed("executor worker pool is shut down".to_string()))?;
        Ok(id)
    }

    /// Cancel a queued or running execution. Returns `false` if it already
    /// reached a terminal state or is unknown (spec §4.4 `cancel`).
    pub async fn cancel(&self, id: ExecutionId) -> CoreResult<bool> {
        let inner = self.inner.read().await;
        let Some(record) = inner.records.get(&id) else { return Ok(false) };
        if record.status.is_terminal() {
            return Ok(false);
        }
        if let Some(handle) = inner.cancel.get(&id) {
            handle.cancel();
        }
        Ok(true)
    }

    /// Look up one execution's current record (spec §4.4 `status`).
    pub async fn status(&self, id: ExecutionId) -> CoreResult<ExecutionRecord> {
        self.inner.read().await.records.get(&id).cloned().ok_or_else(|| CoreError::NotFound(id.to_string()))
    }

    /// List every execution this instance knows about, most recently
    /// submitted first.
    pub async fn list(&self) -> Vec<ExecutionRecord> {
        let mut records: Vec<_> = self.inner.read().await.records.values().cloned().collect();
        records.sort_by(|a, b| b.submitted_at.cmp(&a.submitted_at));
        records
    }

    async fn persist(&self, record: &ExecutionRecord) -> CoreResult<()> {
        let Some(memory) = &self.memory else { return Ok(()) };
        let key = format!("exec/{}", record.id);
        let value = serde_json::to_value(record)?;
        memory
            .store(&key, value, StoreOptions { namespace: Some(self.config.memory_namespace.clone()), ..Default::default() })
            .await?;
        Ok(())
    }

    /// Reload queued/running records from Distributed Memory on restart
    /// (spec §4.4: "On restart, the executor reloads in-flight records and
    /// reschedules `queued` ones; `running` records become
    /// `failed(interrupted)` and enter retry if attempts remain").
    pub async fn recover(&self) -> CoreResult<usize> {
        let Some(memory) = self.memory.clone() else { return Ok(0) };
        let mut recovered = 0;

        for entry in memory.all_namespace_entries(&self.config.memory_namespace).await {
            if !entry.key.starts_with("exec/") {
                continue;
            }
            let Ok(mut record) = serde_json::from_value::<ExecutionRecord>(entry.value.clone()) else { continue };

            let requeue = match record.status {
                ExecutionStatus::Queued => true,
                ExecutionStatus::Running => {
                    record.last_error = Some("interrupted by restart".to_string());
                    record.finished_at = Some(Utc::now());
                    let retry = record.attempts < record.max_attempts;
                    record.status = if retry { ExecutionStatus::Queued } else { ExecutionStatus::Failed };
                    retry
                }
                _ => continue,
            };

            if record.persist {
                self.persist(&record).await?;
            }

            {
                let mut inner = self.inner.write().await;
                inner.records.insert(record.id, record.clone());
                inner.cancel.insert(record.id, CancelHandle::new());
            }

            if requeue {
                let _ = self.queue_tx.send(record.id);
                recovered += 1;
            }
        }

        info!(recovered, "background executor recovery complete");
        Ok(recovered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager_memory() -> Arc<DistributedMemory> {
        Arc::new(DistributedMemory::new(crate::memory::MemoryConfig::default(), EventBus::new()))
    }

    #[tokio::test]
    async fn submit_runs_a_successful_command_to_completion() {
        let executor = BackgroundExecutor::new(ExecutorConfig::default(), EventBus::new(), None);
        let id = executor.submit("true", vec![], SubmitOptions::default()).await.unwrap();

        let record = wait_for_terminal(&executor, id).await;
        assert_eq!(record.status, ExecutionStatus::Success);
        assert_eq!(record.exit_code, Some(0));
    }

    #[tokio::test]
    async fn failing_command_retries_then_fails() {
        let executor = BackgroundExecutor::new(ExecutorConfig::default(), EventBus::new(), None);
        let opts = SubmitOptions { max_attempts: 2, backoff_base_ms: 1, ..Default::default() };
        let id = executor.submit("false", vec![], opts).await.unwrap();

        let record = wait_for_terminal(&executor, id).await;
        assert_eq!(record.status, ExecutionStatus::Failed);
        assert_eq!(record.attempts, 2);
    }

    #[tokio::test]
    async fn persisted_record_round_trips_through_memory() {
        let memory = manager_memory();
        let executor = BackgroundExecutor::new(ExecutorConfig::default(), EventBus::new(), Some(memory.clone()));
        let opts = SubmitOptions { persist: true, ..Default::default() };
        let id = executor.submit("true", vec![], opts).await.unwrap();

        let record = wait_for_terminal(&executor, id).await;
        assert_eq!(record.status, ExecutionStatus::Success);

        let stored = memory.retrieve(&format!("exec/{id}"), crate::memory::RetrieveOptions { namespace: Some("executor".to_string()), ..Default::default() }).await;
        assert!(stored.is_some());
    }

    #[tokio::test]
    async fn cancel_of_unknown_execution_returns_false() {
        let executor = BackgroundExecutor::new(ExecutorConfig::default(), EventBus::new(), None);
        assert!(!executor.cancel(ExecutionId::new()).await.unwrap());
    }

    #[tokio::test]
    async fn running_command_can_be_cancelled() {
        let executor = BackgroundExecutor::new(ExecutorConfig::default(), EventBus::new(), None);
        let id = executor.submit("sleep", vec!["5".to_string()], SubmitOptions { grace_period_ms: 100, ..Default::default() }).await.unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        assert!(executor.cancel(id).await.unwrap());

        let record = wait_for_terminal(&executor, id).await;
        assert_eq!(record.status, ExecutionStatus::Cancelled);
    }

    async fn wait_for_terminal(executor: &BackgroundExecutor, id: ExecutionId) -> ExecutionRecord {
        for _ in 0..200 {
            let record = executor.status(id).await.unwrap();
            if record.status.is_terminal() {
                return record;
            }
            tokio::time::sleep(std::time::Duration::from_millis(25)).await;
        }
        panic!("execution {id} never reached a terminal state");
    }
}
