//! Scenario A: a `research` objective decomposes into a linear
//! research -> analysis -> synthesis chain and completes end to end with
//! one researcher and one analyst agent.

use std::sync::Arc;
use std::time::Duration;

use swarmcore::agent_manager::{AgentManager, AgentManagerConfig, AgentTemplate};
use swarmcore::circuit_breaker::{CircuitBreakerConfig, CircuitBreakerRegistry};
use swarmcore::domain::agent::{AgentConfig, AgentType, Capabilities};
use swarmcore::domain::ports::{EchoExecutor, SystemClock};
use swarmcore::domain::{ObjectiveStatus, Strategy, TaskStatus};
use swarmcore::event_bus::EventBus;
use swarmcore::memory::{DistributedMemory, MemoryConfig};
use swarmcore::swarm::{SwarmCoordinator, SwarmCoordinatorConfig};

async fn wait_until_terminal(coordinator: &SwarmCoordinator, id: swarmcore::domain::ObjectiveId) -> swarmcore::domain::Objective {
    for _ in 0..200 {
        let objective = coordinator.get_objective_status(id).await.unwrap();
        if objective.status.is_terminal() {
            return objective;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("objective {id} never reached a terminal state");
}

#[tokio::test]
async fn research_objective_runs_research_then_analysis_then_synthesis() {
    let events = EventBus::new();
    let agents = Arc::new(AgentManager::new(AgentManagerConfig::default(), events.clone(), Arc::new(SystemClock)));
    let memory = Arc::new(DistributedMemory::new(MemoryConfig::default(), events.clone()));
    let breakers = Arc::new(CircuitBreakerRegistry::new(CircuitBreakerConfig::default()));
    let coordinator = SwarmCoordinator::new(
        SwarmCoordinatorConfig::default(),
        agents.clone(),
        events,
        memory,
        Arc::new(EchoExecutor),
        breakers,
        Arc::new(SystemClock),
    );

    for (name, flag) in [("researcher", "research"), ("analyst", "analysis"), ("synthesizer", "synthesis")] {
        let id = agents
            .create_agent(AgentTemplate {
                name: name.to_string(),
                agent_type: AgentType::Researcher,
                config: AgentConfig::default(),
                capabilities: Capabilities::new().with_flag(flag),
            })
            .await
            .unwrap();
        agents.start_agent(id).await.unwrap();
    }

    let objective_id = coordinator.create_objective("Summarize X", Strategy::Research).await.unwrap();
    coordinator.execute_objective(objective_id).await.unwrap();

    let objective = wait_until_terminal(&coordinator, objective_id).await;
    assert_eq!(objective.status, ObjectiveStatus::Completed);
    assert_eq!(objective.progress.total, 3);
    assert_eq!(objective.progress.completed, 3);
    assert_eq!(objective.progress.failed, 0);

    let mut kinds: Vec<String> = Vec::new();
    for task_id in &objective.task_ids {
        let task = coordinator.get_task(*task_id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        kinds.push(task.task_type.clone());
    }
    kinds.sort();
    assert_eq!(kinds, vec!["analysis".to_string(), "research".to_string(), "synthesis".to_string()]);
}
