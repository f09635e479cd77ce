//! The scheduling loop (spec §4.5 "Scheduling loop"): promote, score,
//! assign, dispatch, complete. Grounded on the teacher's
//! `services::dag_executor::execute_wave`'s semaphore-gated fan-out,
//! reworked from one wave of a user-supplied graph into a repeating tick
//! over the coordinator's own task table.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::domain::agent::Capabilities;
use crate::domain::{Agent, AgentId, ObjectiveStatus, Task, TaskId, TaskStatus};
use crate::error::CoreResult;

use super::{work_stealing, SwarmCoordinator};

/// Weights feeding the candidate-pair score (spec §4.5 step 3). The base
/// capability-match score (3.0) is fixed by the spec and not configurable.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ScoringWeights {
    pub capability_match_base: f64,
    /// Per-skill bonus for languages/frameworks beyond the matched flag —
    /// the spec names a "bonus for secondary" match without defining one;
    /// this rewards broader secondary coverage, capped below.
    pub secondary_skill_bonus: f64,
    pub secondary_skill_bonus_cap: f64,
    pub load_weight: f64,
    pub success_rate_weight: f64,
    pub priority_weight: f64,
    /// Magnitude of the deterministic (hash-derived, not RNG) tie-breaker.
    pub tie_breaker_scale: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            capability_match_base: 3.0,
            secondary_skill_bonus: 0.1,
            secondary_skill_bonus_cap: 0.5,
            load_weight: 0.2,
            success_rate_weight: 1.0,
            priority_weight: 0.5,
            tie_breaker_scale: 0.01,
        }
    }
}

/// A pseudo-random but fully deterministic tie-breaker derived from the
/// (agent, task) pair, standing in for the spec's "small random
/// tie-breaker" so scheduling stays reproducible under test.
fn tie_breaker(agent_id: AgentId, task_id: TaskId) -> f64 {
    let mut hasher = DefaultHasher::new();
    agent_id.hash(&mut hasher);
    task_id.hash(&mut hasher);
    (hasher.finish() % 1_000) as f64 / 1_000.0
}

fn score(agent: &Agent, task: &Task, weights: &ScoringWeights) -> f64 {
    let capability_match = if agent.capabilities.covers(&task.task_type) { weights.capability_match_base } else { 0.0 };
    let secondary = ((agent.capabilities.languages.len() + agent.capabilities.frameworks.len()) as f64 * weights.secondary_skill_bonus)
        .min(weights.secondary_skill_bonus_cap);
    let spare_capacity = (agent.config.max_concurrent_tasks as f64 - agent.workload() as f64).max(0.0);
    let load = spare_capacity * weights.load_weight;
    let success = agent.metrics.success_rate() * weights.success_rate_weight;
    let priority = agent.health.weighted(crate::domain::agent::HealthWeights::default()) * weights.priority_weight;
    let jitter = tie_breaker(agent.id, task.id) * weights.tie_breaker_scale;
    capability_match + secondary + load + success + priority + jitter
}

/// Total assigned-or-running load the scheduler enforces against
/// `maxConcurrentTasks`: the agent's running count plus its own backlog.
async fn effective_load(coordinator: &SwarmCoordinator, agent: &Agent) -> usize {
    let inner = coordinator.inner();
    let inner = inner.read().await;
    agent.workload() + inner.agent_queues.get(&agent.id).map_or(0, std::collections::VecDeque::len)
}

fn capability_filter(agent: &Agent) -> bool {
    !matches!(
        agent.status,
        crate::domain::AgentStatus::Error
            | crate::domain::AgentStatus::Stopping
            | crate::domain::AgentStatus::Stopped
            | crate::domain::AgentStatus::Terminated
            | crate::domain::AgentStatus::Created
            | crate::domain::AgentStatus::Initializing
    )
}

/// Background scheduler loop, one per [`SwarmCoordinator`] (spec §4.5).
pub(crate) async fn run_loop(coordinator: SwarmCoordinator) {
    let interval = Duration::from_millis(coordinator.config().tick_interval_ms.max(1));
    loop {
        tokio::time::sleep(interval).await;
        if let Err(err) = tick(&coordinator).await {
            debug!(error = %err, "scheduler tick failed");
        }
    }
}

/// One full tick: promote, assign, dispatch, and (optionally) steal.
pub(crate) async fn tick(coordinator: &SwarmCoordinator) -> CoreResult<()> {
    promote(coordinator).await;
    assign(coordinator).await?;
    dispatch(coordinator).await;
    if coordinator.config().work_stealing_enabled {
        work_stealing::steal(coordinator).await;
        dispatch(coordinator).await;
    }
    Ok(())
}

/// Step 1: `pending` tasks whose objective is executing and whose
/// dependencies are all `completed` move to `queued`.
async fn promote(coordinator: &SwarmCoordinator) {
    let inner_lock = coordinator.inner();
    let mut inner = inner_lock.write().await;
    let completed: std::collections::HashSet<TaskId> =
        inner.tasks.values().filter(|t| t.status == TaskStatus::Completed).map(|t| t.id).collect();
    let executing: std::collections::HashSet<_> =
        inner.objectives.values().filter(|o| o.status == ObjectiveStatus::Executing).map(|o| o.id).collect();

    let ready: Vec<TaskId> = inner
        .tasks
        .values()
        .filter(|t| t.status == TaskStatus::Pending)
        .filter(|t| t.objective_id.is_some_and(|o| executing.contains(&o)))
        .filter(|t| t.dependencies_satisfied(|dep| completed.contains(&dep)))
        .map(|t| t.id)
        .collect();

    for task_id in ready {
        if let Some(task) = inner.tasks.get_mut(&task_id) {
            task.transition(TaskStatus::Queued);
        }
    }
}

/// Steps 2-3: compute candidate pairs and greedily assign the
/// highest-scoring agent to each queued task in priority order.
async fn assign(coordinator: &SwarmCoordinator) -> CoreResult<()> {
    let mut agents = coordinator.agents().get_all_agents().await;
    agents.retain(capability_filter);

    let mut remaining_capacity = std::collections::HashMap::new();
    for agent in &agents {
        let load = effective_load(coordinator, agent).await;
        remaining_capacity.insert(agent.id, (agent.config.max_concurrent_tasks as usize).saturating_sub(load));
    }

    let inner_lock = coordinator.inner();
    let mut ready_tasks: Vec<Task> = {
        let inner = inner_lock.read().await;
        inner.tasks.values().filter(|t| t.status == TaskStatus::Queued).cloned().collect()
    };
    ready_tasks.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.created_at.cmp(&b.created_at)));

    for task in ready_tasks {
        let mut best: Option<(AgentId, f64)> = None;
        for agent in &agents {
            if remaining_capacity.get(&agent.id).copied().unwrap_or(0) == 0 {
                continue;
            }
            if !agent.capabilities.covers(&task.task_type) {
                continue;
            }
            if !coordinator.breakers().allows_dispatch(agent.id).await {
                continue;
            }
            let candidate_score = score(agent, &task, &coordinator.config().scoring);
            let replace = match best {
                None => true,
                Some((best_agent, best_score)) => {
                    candidate_score > best_score || ((candidate_score - best_score).abs() < f64::EPSILON && agent.id < best_agent)
                }
            };
            if replace {
                best = Some((agent.id, candidate_score));
            }
        }

        let Some((agent_id, _)) = best else { continue };
        *remaining_capacity.get_mut(&agent_id).unwrap() -= 1;

        let mut inner = inner_lock.write().await;
        if let Some(task) = inner.tasks.get_mut(&task.id) {
            if task.status != TaskStatus::Queued {
                continue;
            }
            task.transition(TaskStatus::Assigned);
            task.assigned_agent = Some(agent_id);
        }
        inner.agent_queues.entry(agent_id).or_default().push_back(task.id);
    }

    Ok(())
}

/// Step 4: for every agent with a free running slot, pop its backlog and
/// start the task's executor run.
async fn dispatch(coordinator: &SwarmCoordinator) {
    let inner_lock = coordinator.inner();
    let mut to_start = Vec::new();
    {
        let agents = coordinator.agents().get_all_agents().await;
        let mut inner = inner_lock.write().await;
        for agent in &agents {
            let Some(queue) = inner.agent_queues.get_mut(&agent.id) else { continue };
            while agent.workload() + count_started_this_pass(&to_start, agent.id) < agent.config.max_concurrent_tasks as usize {
                let Some(task_id) = queue.pop_front() else { break };
                to_start.push((agent.id, task_id));
            }
        }
    }

    for (agent_id, task_id) in to_start {
        start_task(coordinator, agent_id, task_id).await;
    }
}

fn count_started_this_pass(started: &[(AgentId, TaskId)], agent_id: AgentId) -> usize {
    started.iter().filter(|(a, _)| *a == agent_id).count()
}

async fn start_task(coordinator: &SwarmCoordinator, agent_id: AgentId, task_id: TaskId) {
    let inner_lock = coordinator.inner();
    {
        let mut inner = inner_lock.write().await;
        let Some(task) = inner.tasks.get_mut(&task_id) else { return };
        if task.status != TaskStatus::Assigned {
            return;
        }
        task.transition(TaskStatus::Running);
    }

    if coordinator.agents().assign_task(agent_id, task_id).await.is_err() {
        let mut inner = inner_lock.write().await;
        if let Some(task) = inner.tasks.get_mut(&task_id) {
            let _ = task.transition(TaskStatus::Failed);
            task.error = Some("agent vanished before dispatch".to_string());
        }
        return;
    }

    coordinator.events().publish("task.started", json!({ "task_id": task_id.to_string(), "agent_id": agent_id.to_string() })).await;

    let coordinator = coordinator.clone();
    let handle = tokio::spawn(async move { run_task(coordinator, agent_id, task_id).await });

    let mut inner = inner_lock.write().await;
    inner.running_handles.insert(task_id, handle);
}

/// Run one dispatched task to completion: execute, record the outcome on
/// the agent, the circuit breaker and the task's objective, persist the
/// result, retry or propagate `upstream-failed` as needed.
async fn run_task(coordinator: SwarmCoordinator, agent_id: AgentId, task_id: TaskId) {
    let (task_type, input, objective_id) = {
        let inner = coordinator.inner();
        let inner = inner.read().await;
        let Some(task) = inner.tasks.get(&task_id) else { return };
        (task.task_type.clone(), task.input.clone(), task.objective_id)
    };

    let start = std::time::Instant::now();
    let outcome = coordinator.executor().run(task_id, &task_type, &input).await;
    let execution_ms = start.elapsed().as_secs_f64() * 1000.0;
    let success = matches!(&outcome, Ok(o) if o.success);

    coordinator.breakers().record_outcome(agent_id, success).await;
    let _ = coordinator.agents().record_task_outcome(agent_id, task_id, success, execution_ms).await;

    let mut newly_failed = Vec::new();
    {
        let inner = coordinator.inner();
        let mut inner = inner.write().await;
        inner.running_handles.remove(&task_id);

        let Some(task) = inner.tasks.get_mut(&task_id) else { return };
        task.attempt += 1;

        match outcome {
            Ok(result) if result.success => {
                task.transition(TaskStatus::Completed);
                task.result = Some(result.output);
                if let Some(objective) = objective_id.and_then(|o| inner.objectives.get_mut(&o)) {
                    objective.progress.completed += 1;
                }
            }
            Ok(result) => {
                task.error = result.error.clone();
                fail_or_retry(task);
                if task.status == TaskStatus::Failed {
                    newly_failed.push(task_id);
                }
            }
            Err(err) => {
                task.error = Some(err.to_string());
                fail_or_retry(task);
                if task.status == TaskStatus::Failed {
                    newly_failed.push(task_id);
                }
            }
        }
    }

    let finished = {
        let inner = coordinator.inner();
        let guard = inner.read().await;
        guard.tasks.get(&task_id).cloned()
    };
    if let Some(task) = finished {
        if task.status == TaskStatus::Completed {
            if let Some(value) = &task.result {
                let _ = coordinator
                    .memory()
                    .store(
                        &format!("results/{task_id}"),
                        value.clone(),
                        crate::memory::StoreOptions { namespace: Some("swarm".to_string()), ..Default::default() },
                    )
                    .await;
            }
        }
    }

    for failed_id in newly_failed {
        propagate_upstream_failed(&coordinator, failed_id).await;
    }

    coordinator
        .events()
        .publish("task.completed", json!({ "task_id": task_id.to_string(), "agent_id": agent_id.to_string(), "success": success }))
        .await;

    if let Some(objective_id) = objective_id {
        recompute_objective(&coordinator, objective_id).await;
    }
}

/// Retry within `max_attempts`, else terminal `failed` (spec §4.5 "Failure
/// semantics").
fn fail_or_retry(task: &mut Task) {
    task.transition(TaskStatus::Failed);
    if task.has_attempts_remaining() {
        task.transition(TaskStatus::Pending);
    }
}

/// A task that exhausted retries fails every transitive successor still
/// waiting on it, with cause `upstream-failed` (spec §4.5).
async fn propagate_upstream_failed(coordinator: &SwarmCoordinator, failed_id: TaskId) {
    let inner_lock = coordinator.inner();
    let mut frontier = vec![failed_id];
    let mut objectives_touched = std::collections::HashSet::new();

    while let Some(current) = frontier.pop() {
        let mut inner = inner_lock.write().await;
        let dependents: Vec<TaskId> = inner
            .tasks
            .values()
            .filter(|t| !t.status.is_terminal() && t.dependencies.contains(&current))
            .map(|t| t.id)
            .collect();

        for dep_id in dependents {
            if let Some(task) = inner.tasks.get_mut(&dep_id) {
                if task.status != TaskStatus::Pending {
                    continue;
                }
                task.error = Some(format!("upstream-failed: {current}"));
                task.transition(TaskStatus::Failed);
                if let Some(objective_id) = task.objective_id {
                    if let Some(objective) = inner.objectives.get_mut(&objective_id) {
                        objective.progress.failed += 1;
                    }
                    objectives_touched.insert(objective_id);
                }
                frontier.push(dep_id);
            }
        }
    }

    for objective_id in objectives_touched {
        recompute_objective(coordinator, objective_id).await;
    }
}

async fn recompute_objective(coordinator: &SwarmCoordinator, objective_id: crate::domain::ObjectiveId) {
    let inner_lock = coordinator.inner();
    let mut inner = inner_lock.write().await;
    let outstanding = inner
        .tasks
        .values()
        .filter(|t| t.objective_id == Some(objective_id) && !t.status.is_terminal())
        .count();
    if let Some(objective) = inner.objectives.get_mut(&objective_id) {
        objective.recompute_status(outstanding);
        if objective.status.is_terminal() {
            let topic = if objective.status == ObjectiveStatus::Completed { "objective.completed" } else { "objective.failed" };
            drop(inner);
            coordinator.events().publish(topic, json!({ "objective_id": objective_id.to_string() })).await;
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::agent::{AgentConfig, AgentType};

    fn agent_with(flag: &str, max_concurrent: u32) -> Agent {
        let mut agent = Agent::new("a", AgentType::Coder, 1, "node-1");
        agent.capabilities = Capabilities::new().with_flag(flag);
        agent.config = AgentConfig { max_concurrent_tasks: max_concurrent, ..Default::default() };
        agent.status = crate::domain::AgentStatus::Idle;
        agent
    }

    #[test]
    fn score_rewards_capability_match_over_mismatch() {
        let weights = ScoringWeights::default();
        let task = Task::new("coding", "d");
        let matching = agent_with("coding", 1);
        let mismatched = agent_with("writing", 1);
        assert!(score(&matching, &task, &weights) > score(&mismatched, &task, &weights));
    }

    #[test]
    fn score_prefers_lower_current_load() {
        let weights = ScoringWeights::default();
        let task = Task::new("coding", "d");
        let mut busy = agent_with("coding", 2);
        busy.active_tasks.insert(uuid::Uuid::new_v4());
        let idle = agent_with("coding", 2);
        assert!(score(&idle, &task, &weights) > score(&busy, &task, &weights));
    }

    #[test]
    fn tie_breaker_is_deterministic() {
        let agent = AgentId::new();
        let task = TaskId::new();
        assert_eq!(tie_breaker(agent, task), tie_breaker(agent, task));
    }

    #[test]
    fn capability_filter_excludes_terminated_agents() {
        let mut agent = agent_with("coding", 1);
        agent.status = crate::domain::AgentStatus::Terminated;
        assert!(!capability_filter(&agent));
    }
}
