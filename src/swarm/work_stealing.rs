//! Work stealing (spec §4.5 "Work stealing"): an idle agent claims the
//! lowest-priority queued task from the busiest agent's backlog once that
//! backlog reaches depth 2. Runs as an extra pass inside the scheduler tick,
//! under the same coordinator task-state lock the rest of the tick uses, so
//! a steal is atomic with respect to promotion/assignment.

use tracing::debug;

use crate::domain::{AgentId, TaskId};

use super::SwarmCoordinator;

/// One work-stealing pass: every truly idle agent (no backlog, no running
/// tasks) takes one task from whichever other agent currently has the
/// deepest backlog, provided that backlog is at least 2 deep.
pub(crate) async fn steal(coordinator: &SwarmCoordinator) {
    let agents = coordinator.agents().get_all_agents().await;
    let inner_lock = coordinator.inner();

    let idle_agents: Vec<AgentId> = {
        let inner = inner_lock.read().await;
        agents
            .iter()
            .filter(|a| a.workload() == 0)
            .filter(|a| inner.agent_queues.get(&a.id).is_none_or(std::collections::VecDeque::is_empty))
            .map(|a| a.id)
            .collect()
    };

    for idle_id in idle_agents {
        let mut inner = inner_lock.write().await;
        let Some((busiest_id, _depth)) = inner
            .agent_queues
            .iter()
            .filter(|(agent_id, queue)| **agent_id != idle_id && queue.len() >= 2)
            .map(|(agent_id, queue)| (*agent_id, queue.len()))
            .max_by_key(|(_, depth)| *depth)
        else {
            continue;
        };

        let stolen: Option<TaskId> = {
            let queue = inner.agent_queues.get(&busiest_id).unwrap();
            queue
                .iter()
                .enumerate()
                .min_by_key(|(_, task_id)| inner.tasks.get(task_id).map_or(i32::MAX, |t| t.priority))
                .map(|(_, task_id)| *task_id)
        };

        let Some(task_id) = stolen else { continue };
        let queue = inner.agent_queues.get_mut(&busiest_id).unwrap();
        let Some(pos) = queue.iter().position(|t| *t == task_id) else { continue };
        queue.remove(pos);

        if let Some(task) = inner.tasks.get_mut(&task_id) {
            task.assigned_agent = Some(idle_id);
        }
        inner.agent_queues.entry(idle_id).or_default().push_back(task_id);
        debug!(task_id = %task_id, from = %busiest_id, to = %idle_id, "work-stolen task");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::agent_manager::{AgentManager, AgentManagerConfig, AgentTemplate};
    use crate::circuit_breaker::{CircuitBreakerConfig, CircuitBreakerRegistry};
    use crate::domain::agent::{AgentConfig, AgentType, Capabilities};
    use crate::domain::ports::{EchoExecutor, SystemClock};
    use crate::domain::Task;
    use crate::event_bus::EventBus;
    use crate::memory::{DistributedMemory, MemoryConfig};
    use crate::swarm::{SwarmCoordinator, SwarmCoordinatorConfig};

    async fn coordinator() -> (SwarmCoordinator, Arc<AgentManager>) {
        let events = EventBus::new();
        let agents = Arc::new(AgentManager::new(AgentManagerConfig::default(), events.clone(), Arc::new(SystemClock)));
        let memory = Arc::new(DistributedMemory::new(MemoryConfig::default(), events.clone()));
        let breakers = Arc::new(CircuitBreakerRegistry::new(CircuitBreakerConfig::default()));
        let coordinator = SwarmCoordinator::new(
            SwarmCoordinatorConfig { tick_interval_ms: 3_600_000, ..Default::default() },
            agents.clone(),
            events,
            memory,
            Arc::new(EchoExecutor),
            breakers,
            Arc::new(SystemClock),
        );
        (coordinator, agents)
    }

    async fn coder_agent(agents: &AgentManager, max_concurrent: u32) -> crate::domain::AgentId {
        let id = agents
            .create_agent(AgentTemplate {
                name: "coder".to_string(),
                agent_type: AgentType::Coder,
                config: AgentConfig { max_concurrent_tasks: max_concurrent, ..Default::default() },
                capabilities: Capabilities::new().with_flag("coding"),
            })
            .await
            .unwrap();
        agents.start_agent(id).await.unwrap();
        id
    }

    #[tokio::test]
    async fn idle_agent_steals_from_the_deepest_backlog() {
        let (coordinator, agents) = coordinator().await;
        let busy = coder_agent(&agents, 1).await;
        let idle = coder_agent(&agents, 1).await;

        {
            let inner = coordinator.inner();
            let mut inner = inner.write().await;
            let mut queue = std::collections::VecDeque::new();
            for _ in 0..3 {
                let task = Task::new("coding", "work");
                let id = task.id;
                inner.tasks.insert(id, task);
                queue.push_back(id);
            }
            inner.agent_queues.insert(busy, queue);
            inner.agent_queues.insert(idle, std::collections::VecDeque::new());
        }

        super::steal(&coordinator).await;

        let inner = coordinator.inner();
        let inner = inner.read().await;
        assert_eq!(inner.agent_queues.get(&busy).unwrap().len(), 2);
        assert_eq!(inner.agent_queues.get(&idle).unwrap().len(), 1);
    }
}
