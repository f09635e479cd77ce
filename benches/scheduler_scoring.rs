use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use swarmcore::agent_manager::{AgentManager, AgentManagerConfig, AgentTemplate};
use swarmcore::circuit_breaker::{CircuitBreakerConfig, CircuitBreakerRegistry};
use swarmcore::domain::agent::{AgentConfig, AgentType, Capabilities};
use swarmcore::domain::ports::{EchoExecutor, SystemClock};
use swarmcore::domain::{Strategy, Task};
use swarmcore::event_bus::EventBus;
use swarmcore::memory::{DistributedMemory, MemoryConfig};
use swarmcore::swarm::{SwarmCoordinator, SwarmCoordinatorConfig};

async fn seeded_coordinator(agent_count: usize, task_count: usize) -> SwarmCoordinator {
    let events = EventBus::new();
    let agents = Arc::new(AgentManager::new(AgentManagerConfig::default(), events.clone(), Arc::new(SystemClock)));
    let memory = Arc::new(DistributedMemory::new(MemoryConfig::default(), events.clone()));
    let breakers = Arc::new(CircuitBreakerRegistry::new(CircuitBreakerConfig::default()));
    // Tick interval set far out so the benchmark drives `tick` explicitly
    // instead of racing the background scheduler loop.
    let coordinator = SwarmCoordinator::new(
        SwarmCoordinatorConfig { tick_interval_ms: 3_600_000, ..Default::default() },
        agents.clone(),
        events,
        memory,
        Arc::new(EchoExecutor),
        breakers,
        Arc::new(SystemClock),
    );

    for i in 0..agent_count {
        let id = agents
            .create_agent(AgentTemplate {
                name: format!("agent-{i}"),
                agent_type: AgentType::Coder,
                config: AgentConfig { max_concurrent_tasks: 4, ..Default::default() },
                capabilities: Capabilities::new().with_flag("generic"),
            })
            .await
            .unwrap();
        agents.start_agent(id).await.unwrap();
    }

    let objective_id = coordinator.create_objective("bench objective", Strategy::Auto).await.unwrap();
    coordinator.execute_objective(objective_id).await.unwrap();
    for i in 0..task_count {
        let task = Task::new("generic", format!("bench task {i}"));
        let _ = coordinator.create_task(objective_id, task).await;
    }

    coordinator
}

// Setup (agent/task creation) runs inside the timed async block since
// `SwarmCoordinator` offers no way to seed state synchronously; it's dwarfed
// by the promotion/scoring/dispatch pass over 50 agents x 200 tasks anyway.
fn bench_scheduler_tick(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("scheduler_tick_50_agents_200_tasks", |b| {
        b.to_async(&runtime).iter(|| async {
            let coordinator = seeded_coordinator(50, 200).await;
            black_box(coordinator.tick().await.unwrap())
        });
    });
}

criterion_group!(benches, bench_scheduler_tick);
criterion_main!(benches);
