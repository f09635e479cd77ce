//! Swarm Coordinator (spec §4.5): objective decomposition, DAG scheduling,
//! dispatch, work stealing, per-agent circuit breaking, and consensus
//! rounds.
//!
//! Grounded on the teacher's `services::dag_executor` for the
//! promote/score/dispatch tick shape, generalized from its single
//! wave-at-a-time execution into a persistent scheduler task that runs
//! until the coordinator is dropped, plus the teacher's
//! `services::circuit_breaker`/`services::dependency_resolver` pair
//! (already adapted in [`crate::circuit_breaker`] and
//! [`crate::dependency_resolver`]) reused here rather than duplicated.

mod consensus;
mod decomposition;
mod scheduler;
mod work_stealing;

pub use consensus::{ConsensusMode, ConsensusOutcome};
pub use scheduler::ScoringWeights;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::instrument;

use crate::agent_manager::{AgentManager, AgentTemplate};
use crate::circuit_breaker::CircuitBreakerRegistry;
use crate::dependency_resolver::DependencyResolver;
use crate::domain::ports::{Clock, TaskExecutor};
use crate::domain::{AgentId, Objective, ObjectiveId, ObjectiveStatus, Strategy, Task, TaskId, TaskStatus};
use crate::error::{CoreError, CoreResult};
use crate::event_bus::EventBus;
use crate::memory::DistributedMemory;

/// Tunables for one [`SwarmCoordinator`] instance.
#[derive(Debug, Clone)]
pub struct SwarmCoordinatorConfig {
    pub tick_interval_ms: u64,
    /// Enables the idle-steals-from-busiest pass (spec §4.5 "Work
    /// stealing").
    pub work_stealing_enabled: bool,
    pub scoring: ScoringWeights,
}

impl Default for SwarmCoordinatorConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 50,
            work_stealing_enabled: true,
            scoring: ScoringWeights::default(),
        }
    }
}

struct Inner {
    objectives: HashMap<ObjectiveId, Objective>,
    tasks: HashMap<TaskId, Task>,
    /// Tasks transitioned to `assigned` for an agent but not yet dispatched
    /// to the executor — the backlog `workStealing` steals from.
    agent_queues: HashMap<AgentId, VecDeque<TaskId>>,
    /// Handles for in-flight `run_task` futures, abort-cancelled by
    /// [`SwarmCoordinator::cancel_objective`].
    running_handles: HashMap<TaskId, JoinHandle<()>>,
}

/// The Swarm Coordinator: owns every [`Objective`] and [`Task`] record and
/// runs one scheduler loop per instance (spec §4.5: "Single scheduler task
/// per Coordinator instance").
#[derive(Clone)]
pub struct SwarmCoordinator {
    config: SwarmCoordinatorConfig,
    inner: Arc<RwLock<Inner>>,
    agents: Arc<AgentManager>,
    events: EventBus,
    memory: Arc<DistributedMemory>,
    executor: Arc<dyn TaskExecutor>,
    breakers: Arc<CircuitBreakerRegistry>,
    resolver: DependencyResolver,
    clock: Arc<dyn Clock>,
}

/// Aggregate counters for `getSwarmStatus` (spec §6).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SwarmStatus {
    pub objectives_planning: usize,
    pub objectives_executing: usize,
    pub objectives_completed: usize,
    pub objectives_failed: usize,
    pub objectives_cancelled: usize,
    pub tasks_pending: usize,
    pub tasks_queued: usize,
    pub tasks_running: usize,
    pub tasks_terminal: usize,
    pub total_agents: usize,
}

impl SwarmCoordinator {
    #[must_use]
    pub fn new(
        config: SwarmCoordinatorConfig,
        agents: Arc<AgentManager>,
        events: EventBus,
        memory: Arc<DistributedMemory>,
        executor: Arc<dyn TaskExecutor>,
        breakers: Arc<CircuitBreakerRegistry>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let coordinator = Self {
            config,
            inner: Arc::new(RwLock::new(Inner {
                objectives: HashMap::new(),
                tasks: HashMap::new(),
                agent_queues: HashMap::new(),
                running_handles: HashMap::new(),
            })),
            agents,
            events,
            memory,
            executor,
            breakers,
            resolver: DependencyResolver::new(),
            clock,
        };

        let loop_handle = coordinator.clone();
        tokio::spawn(async move { scheduler::run_loop(loop_handle).await });

        coordinator
    }

    fn inner(&self) -> Arc<RwLock<Inner>> {
        self.inner.clone()
    }

    fn agents(&self) -> &Arc<AgentManager> {
        &self.agents
    }

    fn events(&self) -> &EventBus {
        &self.events
    }

    fn memory(&self) -> &Arc<DistributedMemory> {
        &self.memory
    }

    fn executor(&self) -> &Arc<dyn TaskExecutor> {
        &self.executor
    }

    fn breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }

    fn resolver(&self) -> &DependencyResolver {
        &self.resolver
    }

    fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn config(&self) -> &SwarmCoordinatorConfig {
        &self.config
    }

    /// Run one scheduler tick out of band, for tests and for callers that
    /// want to drive scheduling deterministically instead of waiting on the
    /// background loop.
    pub async fn tick(&self) -> CoreResult<()> {
        scheduler::tick(self).await
    }

    /// `registerAgent` (spec §6): a thin pass-through to the Agent Manager,
    /// kept on the Coordinator's surface because callers above the core
    /// address agents through the Coordinator's API.
    pub async fn register_agent(&self, template: AgentTemplate) -> CoreResult<AgentId> {
        self.agents.create_agent(template).await
    }

    /// `createObjective(description, strategy)` (spec §4.5). Decomposes
    /// immediately but leaves the objective in `planning`; tasks are not
    /// visible to the scheduler until [`Self::execute_objective`].
    #[instrument(skip(self, description))]
    pub async fn create_objective(&self, description: impl Into<String> + std::fmt::Debug, strategy: Strategy) -> CoreResult<ObjectiveId> {
        let description = description.into();
        let objective = Objective::new(description.clone(), strategy);
        let id = objective.id;
        let tasks = decomposition::decompose(id, &description, strategy);

        let mut inner = self.inner.write().await;
        for task in tasks {
            inner.tasks.insert(task.id, task);
        }
        inner.objectives.insert(id, objective);
        drop(inner);

        self.events.publish("objective.created", serde_json::json!({ "objective_id": id.to_string() })).await;
        Ok(id)
    }

    /// `executeObjective(id)` (spec §4.5): moves the objective to
    /// `executing`, making its decomposed tasks eligible for the next
    /// scheduler tick's promotion pass.
    #[instrument(skip(self))]
    pub async fn execute_objective(&self, id: ObjectiveId) -> CoreResult<()> {
        let mut inner = self.inner.write().await;
        let task_ids: Vec<TaskId> = inner.tasks.values().filter(|t| t.objective_id == Some(id)).map(|t| t.id).collect();
        let objective = inner.objectives.get_mut(&id).ok_or_else(|| CoreError::NotFound(id.to_string()))?;
        if objective.status != ObjectiveStatus::Planning {
            return Err(CoreError::InvalidState(format!("objective {id} is not in planning")));
        }
        objective.begin_execution(task_ids);
        drop(inner);

        self.events.publish("objective.executing", serde_json::json!({ "objective_id": id.to_string() })).await;
        Ok(())
    }

    /// `createTask` (spec §6): manually attach a task to an already-created
    /// objective, for callers that augment the template decomposition.
    #[instrument(skip(self, task))]
    pub async fn create_task(&self, objective_id: ObjectiveId, mut task: Task) -> CoreResult<TaskId> {
        let mut inner = self.inner.write().await;
        if !inner.objectives.contains_key(&objective_id) {
            return Err(CoreError::NotFound(objective_id.to_string()));
        }
        let existing: Vec<Task> = inner.tasks.values().filter(|t| t.objective_id == Some(objective_id)).cloned().collect();
        self.resolver.validate_dependencies(&task, &existing)?;

        task.objective_id = Some(objective_id);
        let id = task.id;
        inner.tasks.insert(id, task);
        if let Some(objective) = inner.objectives.get_mut(&objective_id) {
            objective.task_ids.push(id);
            objective.progress.total += 1;
        }
        Ok(id)
    }

    /// `assignTask` (spec §6): an operator override that pins a queued task
    /// to a specific agent, bypassing scoring. The usual dispatch pass then
    /// carries it to `running` on the next tick.
    #[instrument(skip(self))]
    pub async fn assign_task(&self, task_id: TaskId, agent_id: AgentId) -> CoreResult<()> {
        self.agents.get_agent(agent_id).await?;
        let mut inner = self.inner.write().await;
        let task = inner.tasks.get_mut(&task_id).ok_or_else(|| CoreError::NotFound(task_id.to_string()))?;
        if !matches!(task.status, TaskStatus::Pending | TaskStatus::Queued) {
            return Err(CoreError::InvalidState(format!("task {task_id} is not pending or queued")));
        }
        if !task.transition(TaskStatus::Queued) && task.status != TaskStatus::Queued {
            return Err(CoreError::InvalidState(format!("task {task_id} cannot be queued from its current state")));
        }
        task.transition(TaskStatus::Assigned);
        task.assigned_agent = Some(agent_id);
        inner.agent_queues.entry(agent_id).or_default().push_back(task_id);
        Ok(())
    }

    pub async fn get_objective_status(&self, id: ObjectiveId) -> CoreResult<Objective> {
        self.inner.read().await.objectives.get(&id).cloned().ok_or_else(|| CoreError::NotFound(id.to_string()))
    }

    pub async fn get_task(&self, id: TaskId) -> CoreResult<Task> {
        self.inner.read().await.tasks.get(&id).cloned().ok_or_else(|| CoreError::NotFound(id.to_string()))
    }

    pub async fn get_swarm_status(&self) -> SwarmStatus {
        let inner = self.inner.read().await;
        let mut status = SwarmStatus { total_agents: self.agents.get_system_stats().await.total_agents, ..Default::default() };
        for objective in inner.objectives.values() {
            match objective.status {
                ObjectiveStatus::Planning => status.objectives_planning += 1,
                ObjectiveStatus::Executing => status.objectives_executing += 1,
                ObjectiveStatus::Completed => status.objectives_completed += 1,
                ObjectiveStatus::Failed => status.objectives_failed += 1,
                ObjectiveStatus::Cancelled => status.objectives_cancelled += 1,
            }
        }
        for task in inner.tasks.values() {
            match task.status {
                TaskStatus::Pending => status.tasks_pending += 1,
                TaskStatus::Queued => status.tasks_queued += 1,
                TaskStatus::Assigned | TaskStatus::Running => status.tasks_running += 1,
                TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled => status.tasks_terminal += 1,
            }
        }
        status
    }

    /// `cancelObjective` (spec §5: "Objective cancellation cascades to
    /// tasks; task cancellation does not cancel its agent"). Tasks not yet
    /// dispatched are cancelled immediately; in-flight tasks are aborted and
    /// marked cancelled, best-effort within `grace_period_ms` (spec §8
    /// Scenario F).
    #[instrument(skip(self))]
    pub async fn cancel_objective(&self, id: ObjectiveId, grace_period_ms: u64) -> CoreResult<()> {
        let mut inner = self.inner.write().await;
        let objective = inner.objectives.get_mut(&id).ok_or_else(|| CoreError::NotFound(id.to_string()))?;
        if objective.status.is_terminal() {
            return Ok(());
        }
        objective.status = ObjectiveStatus::Cancelled;
        objective.completed_at = Some(chrono::Utc::now());
        let task_ids = objective.task_ids.clone();

        let mut to_abort = Vec::new();
        for task_id in &task_ids {
            let Some(task) = inner.tasks.get_mut(task_id) else { continue };
            match task.status {
                TaskStatus::Pending | TaskStatus::Queued => {
                    task.transition(TaskStatus::Cancelled);
                }
                TaskStatus::Assigned | TaskStatus::Running => {
                    to_abort.push((*task_id, task.assigned_agent));
                }
                TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled => {}
            }
        }
        for (task_id, _) in &to_abort {
            for queue in inner.agent_queues.values_mut() {
                if let Some(pos) = queue.iter().position(|t| t == task_id) {
                    queue.remove(pos);
                    break;
                }
            }
            if let Some(handle) = inner.running_handles.remove(task_id) {
                handle.abort();
            }
        }
        drop(inner);

        // Aborting the handle only stops the task's future; it does not
        // touch the agent's own workload bookkeeping. `record_task_outcome`
        // is the only place that removes a task from `active_tasks` and
        // restores `idle` status, so it must run for every aborted task or
        // the agent leaks a permanently "busy" slot.
        for (task_id, agent_id) in &to_abort {
            if let Some(agent_id) = agent_id {
                let _ = self.agents.record_task_outcome(*agent_id, *task_id, false, 0.0).await;
            }
        }

        if !to_abort.is_empty() {
            tokio::time::sleep(std::time::Duration::from_millis(grace_period_ms)).await;
        }

        let mut inner = self.inner.write().await;
        for (task_id, _) in &to_abort {
            if let Some(task) = inner.tasks.get_mut(task_id) {
                if !task.status.is_terminal() {
                    let _ = task.transition(TaskStatus::Cancelled);
                }
            }
        }
        drop(inner);

        self.events.publish("objective.cancelled", serde_json::json!({ "objective_id": id.to_string() })).await;
        Ok(())
    }

    /// Tally a consensus round (spec §4.5 "Consensus mode"). The caller
    /// collects votes from participants (out of band — the core has no
    /// agent-to-agent RPC) within `voteTimeout`; a missing entry in `votes`
    /// is an abstention.
    pub async fn submit_consensus_round(
        &self,
        topic: impl Into<String>,
        participants: Vec<AgentId>,
        mode: ConsensusMode,
        votes: HashMap<AgentId, bool>,
    ) -> CoreResult<ConsensusOutcome> {
        consensus::run_round(self, topic.into(), participants, mode, votes).await
    }
}
