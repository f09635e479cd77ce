//! Minimal end-to-end wiring of the four subsystems: create an agent,
//! decompose and run an objective, then print the swarm's status.
//!
//! Not a collaborator shell (spec §1 excludes the LLM runtime, scheduler
//! UI, and persistence backends) — just enough to exercise the core
//! against an [`EchoExecutor`] from the command line.

use std::sync::Arc;

use swarmcore::agent_manager::{AgentManager, AgentManagerConfig, AgentTemplate};
use swarmcore::circuit_breaker::{CircuitBreakerConfig, CircuitBreakerRegistry};
use swarmcore::config::CoreConfig;
use swarmcore::domain::agent::{AgentType, Capabilities};
use swarmcore::domain::ports::{EchoExecutor, SystemClock};
use swarmcore::domain::Strategy;
use swarmcore::event_bus::EventBus;
use swarmcore::memory::{DistributedMemory, MemoryConfig};
use swarmcore::swarm::{SwarmCoordinator, SwarmCoordinatorConfig};
use swarmcore::{logging, CoreResult};

#[tokio::main]
async fn main() -> CoreResult<()> {
    let config = CoreConfig::load().unwrap_or_else(|err| {
        eprintln!("warning: {err}, falling back to defaults");
        CoreConfig::default()
    });
    let _guard = logging::init(&config.log_level, None).expect("failed to initialize logging");

    let events = EventBus::new();
    let agents = Arc::new(AgentManager::new(
        AgentManagerConfig { max_agents: config.max_agents, ..Default::default() },
        events.clone(),
        Arc::new(SystemClock),
    ));
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

    let agent_id = agents
        .create_agent(AgentTemplate {
            name: "demo-coder".to_string(),
            agent_type: AgentType::Coder,
            config: swarmcore::domain::AgentConfig::default(),
            capabilities: Capabilities::new().with_flag("generic").with_flag("exploration").with_flag("execution").with_flag("validation"),
        })
        .await?;
    agents.start_agent(agent_id).await?;

    let objective_id = coordinator.create_objective("explore the repository layout", Strategy::Auto).await?;
    coordinator.execute_objective(objective_id).await?;

    for _ in 0..50 {
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let objective = coordinator.get_objective_status(objective_id).await?;
        if objective.status.is_terminal() {
            break;
        }
    }

    let status = coordinator.get_swarm_status().await;
    println!("{}", serde_json::to_string_pretty(&status).unwrap());
    Ok(())
}
