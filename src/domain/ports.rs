//! Pluggable ports: the seams the core depends on but does not implement.
//!
//! The core only needs a task executor abstraction (spec §1) — concrete LLM
//! processes, cloud APIs, etc. are collaborator concerns. A [`Clock`] port
//! is added so heartbeat sweeps, backoff, and TTL expiry are deterministic
//! under test, following the same trait-at-the-seam shape as the teacher's
//! `domain::ports::Substrate`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use super::ids::TaskId;
use crate::error::CoreResult;

/// Outcome of running a task's payload to completion.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub success: bool,
    pub output: Value,
    pub error: Option<String>,
}

/// The pluggable unit of work execution a [`crate::executor::BackgroundExecutor`]
/// or [`crate::swarm::SwarmCoordinator`] drives. Implementations might shell
/// out to an LLM CLI, call an HTTP API, or run an in-process handler; the
/// core only calls this interface.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// Run one task to completion (or failure). `task_id` and `input` are
    /// the only state a generic executor needs — domain context flows
    /// through `input` and the Distributed Memory namespace the caller
    /// established for the task.
    async fn run(&self, task_id: TaskId, task_type: &str, input: &Value) -> CoreResult<ExecutionOutcome>;
}

/// A no-op executor used in tests and demos: echoes the input back as the
/// result after a trivial delay.
pub struct EchoExecutor;

#[async_trait]
impl TaskExecutor for EchoExecutor {
    async fn run(&self, _task_id: TaskId, _task_type: &str, input: &Value) -> CoreResult<ExecutionOutcome> {
        Ok(ExecutionOutcome {
            success: true,
            output: input.clone(),
            error: None,
        })
    }
}

/// Source of the current time, abstracted so timers (heartbeats, TTL,
/// backoff) are controllable in tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The real wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
