//! Scenario E: agent A picks up a slow task while a backlog queues behind
//! it; agent B, idle, steals the lowest-priority task out of that backlog on
//! the same tick and finishes it while A is still busy.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use swarmcore::agent_manager::{AgentManager, AgentManagerConfig, AgentTemplate};
use swarmcore::circuit_breaker::{CircuitBreakerConfig, CircuitBreakerRegistry};
use swarmcore::domain::agent::{AgentConfig, AgentType, Capabilities};
use swarmcore::domain::ports::{ExecutionOutcome, SystemClock, TaskExecutor};
use swarmcore::domain::{Strategy, Task, TaskId, TaskStatus};
use swarmcore::event_bus::EventBus;
use swarmcore::memory::{DistributedMemory, MemoryConfig};
use swarmcore::swarm::{SwarmCoordinator, SwarmCoordinatorConfig};

/// Sleeps on its first invocation only, modeling the task agent A happens to
/// pick up first running long enough for B to go idle and steal from A's
/// backlog before A's own task finishes.
struct DelayedFirstExecutor {
    first: AtomicBool,
}

#[async_trait]
impl TaskExecutor for DelayedFirstExecutor {
    async fn run(&self, _task_id: TaskId, _task_type: &str, input: &Value) -> swarmcore::error::CoreResult<ExecutionOutcome> {
        if self.first.swap(false, Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        Ok(ExecutionOutcome { success: true, output: input.clone(), error: None })
    }
}

#[tokio::test]
async fn idle_agent_steals_lowest_priority_task_and_every_task_runs_exactly_once() {
    let events = EventBus::new();
    let agents = Arc::new(AgentManager::new(AgentManagerConfig::default(), events.clone(), Arc::new(SystemClock)));
    let memory = Arc::new(DistributedMemory::new(MemoryConfig::default(), events.clone()));
    let breakers = Arc::new(CircuitBreakerRegistry::new(CircuitBreakerConfig::default()));
    let coordinator = SwarmCoordinator::new(
        SwarmCoordinatorConfig { tick_interval_ms: 3_600_000, work_stealing_enabled: true, ..Default::default() },
        agents.clone(),
        events,
        memory,
        Arc::new(DelayedFirstExecutor { first: AtomicBool::new(true) }),
        breakers,
        Arc::new(SystemClock),
    );

    let agent_a = agents
        .create_agent(AgentTemplate {
            name: "a".to_string(),
            agent_type: AgentType::Coder,
            config: AgentConfig { max_concurrent_tasks: 1, ..Default::default() },
            capabilities: Capabilities::new().with_flag("coding"),
        })
        .await
        .unwrap();
    let agent_b = agents
        .create_agent(AgentTemplate {
            name: "b".to_string(),
            agent_type: AgentType::Coder,
            config: AgentConfig { max_concurrent_tasks: 1, ..Default::default() },
            capabilities: Capabilities::new().with_flag("coding"),
        })
        .await
        .unwrap();
    agents.start_agent(agent_a).await.unwrap();
    agents.start_agent(agent_b).await.unwrap();

    // Six tasks, all pre-backlogged onto A via the operator `assignTask`
    // override, which (unlike the scheduler's own `assign` pass) doesn't cap
    // a backlog at the agent's `maxConcurrentTasks`.
    let objective_id = coordinator.create_objective("holds the backlogged tasks", Strategy::Auto).await.unwrap();
    let priorities = [0, 50, 10, 30, 5, 40];
    let mut task_ids = Vec::new();
    for &priority in &priorities {
        let id = coordinator.create_task(objective_id, Task::new("coding", "work").with_priority(priority)).await.unwrap();
        coordinator.assign_task(id, agent_a).await.unwrap();
        task_ids.push(id);
    }

    coordinator.tick().await.unwrap();

    // The lowest-priority task left in A's backlog after its first task
    // started (priority 5, at index 4) should have been stolen onto B.
    let stolen_id = task_ids[4];
    let stolen = coordinator.get_task(stolen_id).await.unwrap();
    assert_eq!(stolen.assigned_agent, Some(agent_b), "the lowest-priority backlogged task should have been stolen onto the idle agent");

    for _ in 0..300 {
        let mut all_terminal = true;
        for &id in &task_ids {
            if !coordinator.get_task(id).await.unwrap().status.is_terminal() {
                all_terminal = false;
            }
        }
        if all_terminal {
            break;
        }
        coordinator.tick().await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    for &id in &task_ids {
        let task = coordinator.get_task(id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Completed, "task {id} never completed");
        assert_eq!(task.attempt, 1, "task {id} should have executed exactly once");
    }
}
