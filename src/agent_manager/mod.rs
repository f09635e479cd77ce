//! Agent Manager (spec §4.3): lifecycle FSM, heartbeat/health sweep,
//! resource accounting, and pools.
//!
//! Grounded on the teacher's `services::agent_service::AgentService`: an
//! async facade over a single write lock that emits events on every
//! mutation, generalized here from its repository-trait indirection to a
//! single in-process `HashMap` guarded by one lock (spec §5: "creation and
//! removal go through the same single-writer lock as individual agent
//! mutations").

mod health;
mod pool;

pub use health::{HealthCheckReport, HealthSweepConfig};
pub use pool::{AutoscaleDecision, PoolConfig};

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::instrument;

use crate::domain::agent::Capabilities;
use crate::domain::ports::Clock;
use crate::domain::{Agent, AgentConfig, AgentId, AgentStatus, AgentType, Pool, PoolId, TaskId};
use crate::error::{CoreError, CoreResult};
use crate::event_bus::EventBus;

/// Resource caps the manager refuses to exceed on `start` (spec §4.3
/// "Resource accounting").
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ResourceLimits {
    pub max_cluster_memory_bytes: u64,
    pub max_cluster_cpu_percent: f64,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_cluster_memory_bytes: 16 * 1024 * 1024 * 1024,
            max_cluster_cpu_percent: 800.0,
        }
    }
}

/// Top-level Agent Manager configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentManagerConfig {
    pub max_agents: usize,
    pub resource_limits: ResourceLimits,
    pub auto_restart: bool,
    pub max_restart_attempts: u32,
    pub node_id: String,
}

impl Default for AgentManagerConfig {
    fn default() -> Self {
        Self {
            max_agents: 100,
            resource_limits: ResourceLimits::default(),
            auto_restart: true,
            max_restart_attempts: 3,
            node_id: "node-1".to_string(),
        }
    }
}

/// A template used to stamp out new agents (spec §4.3 `create`).
#[derive(Debug, Clone)]
pub struct AgentTemplate {
    pub name: String,
    pub agent_type: AgentType,
    pub config: AgentConfig,
    pub capabilities: Capabilities,
}

struct Inner {
    agents: HashMap<AgentId, Agent>,
    pools: HashMap<PoolId, Pool>,
    next_sequence: u64,
}

/// The Agent Manager: owns every [`Agent`] and [`Pool`] record behind one
/// writer lock (spec §9: "components pass ids and look up by id").
pub struct AgentManager {
    config: AgentManagerConfig,
    inner: Arc<RwLock<Inner>>,
    events: EventBus,
    clock: Arc<dyn Clock>,
}

impl AgentManager {
    #[must_use]
    pub fn new(config: AgentManagerConfig, events: EventBus, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            inner: Arc::new(RwLock::new(Inner {
                agents: HashMap::new(),
                pools: HashMap::new(),
                next_sequence: 1,
            })),
            events,
            clock,
        }
    }

    pub fn config(&self) -> &AgentManagerConfig {
        &self.config
    }

    /// `create(template, overrides)` (spec §4.3). Refuses once `max_agents`
    /// is reached.
    #[instrument(skip(self, template))]
    pub async fn create_agent(&self, template: AgentTemplate) -> CoreResult<AgentId> {
        let mut inner = self.inner.write().await;
        if inner.agents.len() >= self.config.max_agents {
            return Err(CoreError::CapacityExceeded(format!(
                "max_agents ({}) reached",
                self.config.max_agents
            )));
        }

        let sequence = inner.next_sequence;
        inner.next_sequence += 1;

        let mut agent = Agent::new(template.name, template.agent_type, sequence, self.config.node_id.clone());
        agent.config = template.config;
        agent.capabilities = template.capabilities;
        let id = agent.id;
        inner.agents.insert(id, agent);
        drop(inner);

        self.events
            .publish("agent.created", serde_json::json!({ "agent_id": id.to_string() }))
            .await;
        Ok(id)
    }

    async fn transition(&self, id: AgentId, next: AgentStatus) -> CoreResult<()> {
        let mut inner = self.inner.write().await;
        let agent = inner.agents.get_mut(&id).ok_or_else(|| CoreError::NotFound(id.to_string()))?;
        if !agent.transition(next) {
            return Err(CoreError::InvalidState(format!(
                "agent {id} cannot move from {:?} to {next:?}",
                agent.status
            )));
        }
        Ok(())
    }

    /// `start(id)`: `created|stopped -> initializing -> idle` (spec §4.3).
    /// Rejects if projected cluster resource usage would exceed configured
    /// limits.
    #[instrument(skip(self))]
    pub async fn start_agent(&self, id: AgentId) -> CoreResult<()> {
        {
            let inner = self.inner.read().await;
            let projected_memory: u64 = inner.agents.values().map(|a| a.metrics.current_memory_bytes).sum();
            if projected_memory > self.config.resource_limits.max_cluster_memory_bytes {
                return Err(CoreError::CapacityExceeded("projected cluster memory limit exceeded".to_string()));
            }
        }

        self.transition(id, AgentStatus::Initializing).await?;
        self.transition(id, AgentStatus::Idle).await?;

        {
            let mut inner = self.inner.write().await;
            if let Some(agent) = inner.agents.get_mut(&id) {
                agent.last_heartbeat = Some(self.clock.now());
            }
        }

        self.events.publish("agent.started", serde_json::json!({ "agent_id": id.to_string() })).await;
        Ok(())
    }

    /// `stop(id, reason)`: any running state to `stopping`, draining
    /// assigned tasks, settling at `stopped` (spec §4.3). Drain is
    /// best-effort here — the Coordinator owns task cancellation; the
    /// manager only waits for `active_tasks` to clear or the drain timeout
    /// to elapse.
    #[instrument(skip(self))]
    pub async fn stop_agent(&self, id: AgentId, reason: &str, drain_timeout_ms: u64) -> CoreResult<()> {
        {
            let inner = self.inner.read().await;
            let agent = inner.agents.get(&id).ok_or_else(|| CoreError::NotFound(id.to_string()))?;
            if !matches!(agent.status, AgentStatus::Idle | AgentStatus::Busy | AgentStatus::Error) {
                return Err(CoreError::InvalidState(format!("agent {id} is not in a stoppable state")));
            }
        }

        self.transition(id, AgentStatus::Stopping).await?;

        let deadline = self.clock.now() + chrono::Duration::milliseconds(drain_timeout_ms as i64);
        loop {
            let drained = {
                let inner = self.inner.read().await;
                inner.agents.get(&id).is_none_or(|a| a.active_tasks.is_empty())
            };
            if drained || self.clock.now() >= deadline {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(25)).await;
        }

        self.transition(id, AgentStatus::Stopped).await?;
        {
            let mut inner = self.inner.write().await;
            if let Some(agent) = inner.agents.get_mut(&id) {
                agent.push_issue(format!("stopped: {reason}"));
            }
        }

        self.events
            .publish("agent.stopped", serde_json::json!({ "agent_id": id.to_string(), "reason": reason }))
            .await;
        Ok(())
    }

    /// `restart(id, reason)`: stop then start, preserving identity and
    /// metrics, bumping the restart counter (spec §4.3).
    #[instrument(skip(self))]
    pub async fn restart_agent(&self, id: AgentId, reason: &str) -> CoreResult<()> {
        self.stop_agent(id, reason, 5_000).await?;
        self.transition(id, AgentStatus::Initializing).await?;
        self.transition(id, AgentStatus::Idle).await?;

        let mut inner = self.inner.write().await;
        if let Some(agent) = inner.agents.get_mut(&id) {
            agent.metrics.restart_count += 1;
            agent.last_heartbeat = Some(self.clock.now());
        }
        drop(inner);

        self.events.publish("agent.restarted", serde_json::json!({ "agent_id": id.to_string() })).await;
        Ok(())
    }

    /// `remove(id)`: only from `stopped`; frees the record (spec §4.3).
    #[instrument(skip(self))]
    pub async fn remove_agent(&self, id: AgentId) -> CoreResult<()> {
        self.transition(id, AgentStatus::Terminated).await?;
        self.inner.write().await.agents.remove(&id);
        self.events.publish("agent.removed", serde_json::json!({ "agent_id": id.to_string() })).await;
        Ok(())
    }

    /// Record that `task_id` was handed to `agent_id`: adds it to the
    /// agent's workload set and, on the `0 -> 1` edge, flips `idle -> busy`
    /// (spec §9: the agent's "assigned tasks" is id membership only, never
    /// an object pointer). Used by the Swarm Coordinator's dispatch pass.
    #[instrument(skip(self))]
    pub async fn assign_task(&self, agent_id: AgentId, task_id: TaskId) -> CoreResult<()> {
        let mut inner = self.inner.write().await;
        let agent = inner.agents.get_mut(&agent_id).ok_or_else(|| CoreError::NotFound(agent_id.to_string()))?;
        if agent.workload() == 0 && !agent.transition(AgentStatus::Busy) {
            return Err(CoreError::InvalidState(format!("agent {agent_id} cannot accept work from {:?}", agent.status)));
        }
        agent.active_tasks.insert(task_id.0);
        Ok(())
    }

    /// Record a task's outcome for `agent_id`: removes it from the
    /// workload set, updates rolling metrics, and flips `busy -> idle` on
    /// the `1 -> 0` edge.
    #[instrument(skip(self))]
    pub async fn record_task_outcome(&self, agent_id: AgentId, task_id: TaskId, success: bool, execution_ms: f64) -> CoreResult<()> {
        let mut inner = self.inner.write().await;
        let agent = inner.agents.get_mut(&agent_id).ok_or_else(|| CoreError::NotFound(agent_id.to_string()))?;
        agent.active_tasks.remove(&task_id.0);
        if success {
            agent.metrics.record_completion(execution_ms);
        } else {
            agent.metrics.record_failure();
        }
        if agent.workload() == 0 && agent.status == AgentStatus::Busy {
            let _ = agent.transition(AgentStatus::Idle);
        }
        Ok(())
    }

    pub async fn get_agent(&self, id: AgentId) -> CoreResult<Agent> {
        self.inner.read().await.agents.get(&id).cloned().ok_or_else(|| CoreError::NotFound(id.to_string()))
    }

    pub async fn get_all_agents(&self) -> Vec<Agent> {
        self.inner.read().await.agents.values().cloned().collect()
    }

    /// `getSystemStats` (spec §6): coarse cluster-wide counters.
    pub async fn get_system_stats(&self) -> SystemStats {
        let inner = self.inner.read().await;
        let mut stats = SystemStats { total_agents: inner.agents.len(), ..Default::default() };
        for agent in inner.agents.values() {
            match agent.status {
                AgentStatus::Idle => stats.idle += 1,
                AgentStatus::Busy => stats.busy += 1,
                AgentStatus::Error => stats.errored += 1,
                _ => {}
            }
            stats.total_workload += agent.workload();
        }
        stats
    }

    pub async fn record_heartbeat(&self, id: AgentId) -> CoreResult<()> {
        let mut inner = self.inner.write().await;
        let agent = inner.agents.get_mut(&id).ok_or_else(|| CoreError::NotFound(id.to_string()))?;
        agent.last_heartbeat = Some(self.clock.now());
        agent.metrics.consecutive_missed_heartbeats = 0;
        Ok(())
    }

    /// Heartbeat/health sweep (spec §4.3). Called periodically by the
    /// caller's timer loop.
    pub async fn run_health_sweep(&self, sweep: &HealthSweepConfig) -> CoreResult<HealthCheckReport> {
        health::sweep(self, sweep).await
    }

    pub async fn create_pool(&self, config: PoolConfig) -> PoolId {
        let pool = Pool::new(config.template_name, config.min_size, config.max_size);
        let id = pool.id;
        let mut inner = self.inner.write().await;
        inner.pools.insert(id, pool);
        id
    }

    pub async fn get_pool(&self, id: PoolId) -> CoreResult<Pool> {
        self.inner.read().await.pools.get(&id).cloned().ok_or_else(|| CoreError::NotFound(id.to_string()))
    }

    /// `scalePool` (spec §4.3 "Pools"): one autoscaler tick.
    pub async fn scale_pool(
        &self,
        id: PoolId,
        queued_work: usize,
        queue_threshold: usize,
        idle_fraction_threshold: f64,
        template: AgentTemplate,
    ) -> CoreResult<AutoscaleDecision> {
        pool::scale(self, id, queued_work, queue_threshold, idle_fraction_threshold, template).await
    }

    fn inner(&self) -> Arc<RwLock<Inner>> {
        self.inner.clone()
    }

    fn events(&self) -> &EventBus {
        &self.events
    }

    fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemStats {
    pub total_agents: usize,
    pub idle: usize,
    pub busy: usize,
    pub errored: usize,
    pub total_workload: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::SystemClock;

    fn manager() -> AgentManager {
        AgentManager::new(AgentManagerConfig::default(), EventBus::new(), Arc::new(SystemClock))
    }

    fn template() -> AgentTemplate {
        AgentTemplate {
            name: "a".to_string(),
            agent_type: AgentType::Coder,
            config: AgentConfig::default(),
            capabilities: Capabilities::default(),
        }
    }

    #[tokio::test]
    async fn create_then_start_reaches_idle() {
        let manager = manager();
        let id = manager.create_agent(template()).await.unwrap();
        manager.start_agent(id).await.unwrap();
        assert_eq!(manager.get_agent(id).await.unwrap().status, AgentStatus::Idle);
    }

    #[tokio::test]
    async fn create_refuses_beyond_max_agents() {
        let mut config = AgentManagerConfig::default();
        config.max_agents = 1;
        let manager = AgentManager::new(config, EventBus::new(), Arc::new(SystemClock));
        manager.create_agent(template()).await.unwrap();
        assert!(manager.create_agent(template()).await.is_err());
    }

    #[tokio::test]
    async fn remove_requires_stopped() {
        let manager = manager();
        let id = manager.create_agent(template()).await.unwrap();
        assert!(manager.remove_agent(id).await.is_err());
    }

    #[tokio::test]
    async fn full_lifecycle_reaches_terminated() {
        let manager = manager();
        let id = manager.create_agent(template()).await.unwrap();
        manager.start_agent(id).await.unwrap();
        manager.stop_agent(id, "done", 100).await.unwrap();
        manager.remove_agent(id).await.unwrap();
        assert!(manager.get_agent(id).await.is_err());
    }

    #[tokio::test]
    async fn stop_called_twice_is_invalid_state() {
        let manager = manager();
        let id = manager.create_agent(template()).await.unwrap();
        manager.start_agent(id).await.unwrap();
        manager.stop_agent(id, "first", 100).await.unwrap();
        assert!(manager.stop_agent(id, "second", 100).await.is_err());
    }

    #[tokio::test]
    async fn assign_task_moves_idle_agent_to_busy() {
        let manager = manager();
        let id = manager.create_agent(template()).await.unwrap();
        manager.start_agent(id).await.unwrap();
        let task_id = crate::domain::TaskId::new();
        manager.assign_task(id, task_id).await.unwrap();
        assert_eq!(manager.get_agent(id).await.unwrap().status, AgentStatus::Busy);
    }

    #[tokio::test]
    async fn record_task_outcome_returns_agent_to_idle_when_drained() {
        let manager = manager();
        let id = manager.create_agent(template()).await.unwrap();
        manager.start_agent(id).await.unwrap();
        let task_id = crate::domain::TaskId::new();
        manager.assign_task(id, task_id).await.unwrap();
        manager.record_task_outcome(id, task_id, true, 12.0).await.unwrap();
        let agent = manager.get_agent(id).await.unwrap();
        assert_eq!(agent.status, AgentStatus::Idle);
        assert_eq!(agent.metrics.tasks_completed, 1);
    }
}
