//! Heartbeat and health sweep (spec §4.3).

use serde::{Deserialize, Serialize};

use crate::domain::agent::HealthWeights;
use crate::domain::{AgentId, AgentStatus};
use crate::error::CoreResult;

use super::AgentManager;

/// Tunables for one [`AgentManager::run_health_sweep`] pass.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HealthSweepConfig {
    /// Consecutive missed heartbeats before responsiveness drops to 0 and
    /// the agent is moved to `error` (spec §4.3: "missing three consecutive
    /// heartbeats").
    pub missed_heartbeat_threshold: u32,
    pub weights: HealthWeights,
}

impl Default for HealthSweepConfig {
    fn default() -> Self {
        Self {
            missed_heartbeat_threshold: 3,
            weights: HealthWeights::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HealthCheckReport {
    pub checked: usize,
    pub moved_to_error: Vec<AgentId>,
    pub auto_restarted: Vec<AgentId>,
}

/// Run one sweep: every agent whose `last_heartbeat` predates `now -
/// heartbeat_interval` by `missed_heartbeat_threshold` intervals has its
/// responsiveness zeroed and moves to `error`; if `auto_restart` is enabled
/// and the agent's restart count is under the configured maximum, it is
/// immediately restarted (spec §4.3).
pub(crate) async fn sweep(manager: &AgentManager, sweep: &HealthSweepConfig) -> CoreResult<HealthCheckReport> {
    let now = manager.clock().now();
    let mut report = HealthCheckReport::default();

    let candidates: Vec<AgentId> = {
        let inner = manager.inner();
        let inner = inner.read().await;
        report.checked = inner.agents.len();
        inner
            .agents
            .values()
            .filter(|agent| matches!(agent.status, AgentStatus::Idle | AgentStatus::Busy))
            .filter_map(|agent| {
                let last = agent.last_heartbeat?;
                let interval = chrono::Duration::milliseconds(agent.config.heartbeat_interval_ms as i64);
                let missed = (now - last).num_milliseconds() / interval.num_milliseconds().max(1);
                (missed >= i64::from(sweep.missed_heartbeat_threshold)).then_some(agent.id)
            })
            .collect()
    };

    for id in candidates {
        let score = {
            let inner = manager.inner();
            let mut inner = inner.write().await;
            let Some(agent) = inner.agents.get_mut(&id) else { continue };
            agent.health.responsiveness = 0.0;
            agent.metrics.consecutive_missed_heartbeats += 1;
            let score = agent.health.weighted(sweep.weights);
            agent.push_issue(format!("missed heartbeat threshold exceeded, health score {score:.2}"));
            let _ = agent.transition(AgentStatus::Error);
            score
        };
        report.moved_to_error.push(id);
        manager
            .events()
            .publish("agent.unhealthy", serde_json::json!({ "agent_id": id.to_string(), "health_score": score }))
            .await;

        let (auto_restart, under_max, restart_count) = {
            let inner = manager.inner();
            let inner = inner.read().await;
            let agent = inner.agents.get(&id);
            (
                manager.config().auto_restart,
                agent.is_some_and(|a| a.metrics.restart_count < manager.config().max_restart_attempts),
                agent.map(|a| a.metrics.restart_count).unwrap_or_default(),
            )
        };

        if auto_restart && under_max {
            if manager.restart_agent(id, "auto-restart after health sweep").await.is_ok() {
                report.auto_restarted.push(id);
            }
        } else if auto_restart {
            tracing::warn!(agent_id = %id, restart_count, "auto-restart bound exceeded, leaving agent in error");
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::agent_manager::{AgentManagerConfig, AgentTemplate};
    use crate::domain::ports::Clock;
    use crate::domain::agent::Capabilities;
    use crate::domain::{AgentConfig, AgentType};
    use crate::event_bus::EventBus;

    struct FixedClock(std::sync::Mutex<chrono::DateTime<chrono::Utc>>);
    impl Clock for FixedClock {
        fn now(&self) -> chrono::DateTime<chrono::Utc> {
            *self.0.lock().unwrap()
        }
    }

    #[tokio::test]
    async fn missed_heartbeats_move_agent_to_error() {
        let clock = Arc::new(FixedClock(std::sync::Mutex::new(chrono::Utc::now())));
        let manager = AgentManager::new(AgentManagerConfig::default(), EventBus::new(), clock.clone());
        let id = manager
            .create_agent(AgentTemplate {
                name: "a".to_string(),
                agent_type: AgentType::Coder,
                config: AgentConfig { heartbeat_interval_ms: 10, ..Default::default() },
                capabilities: Capabilities::default(),
            })
            .await
            .unwrap();
        manager.start_agent(id).await.unwrap();

        *clock.0.lock().unwrap() = clock.now() + chrono::Duration::milliseconds(1_000);

        let report = manager.run_health_sweep(&HealthSweepConfig::default()).await.unwrap();
        assert_eq!(report.moved_to_error, vec![id]);
    }
}
