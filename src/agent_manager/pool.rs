//! Pool autoscaling (spec §4.3 "Pools").

use serde::{Deserialize, Serialize};

use crate::domain::{AgentStatus, PoolId};
use crate::error::CoreResult;

use super::{AgentManager, AgentTemplate};

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub template_name: String,
    pub min_size: usize,
    pub max_size: usize,
}

/// What one [`AgentManager::scale_pool`] tick decided to do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AutoscaleDecision {
    Grew { created: usize },
    Shrank { removed: usize },
    Unchanged,
}

/// One autoscaler tick (spec §4.3): grow when queued work exceeds
/// `queue_threshold` and `size < max`; shrink when the idle fraction exceeds
/// `idle_fraction_threshold` and `size > min`, preferring zero-workload
/// agents for removal.
pub(crate) async fn scale(
    manager: &AgentManager,
    id: PoolId,
    queued_work: usize,
    queue_threshold: usize,
    idle_fraction_threshold: f64,
    template: AgentTemplate,
) -> CoreResult<AutoscaleDecision> {
    let pool = manager.get_pool(id).await?;

    if queued_work > queue_threshold && pool.can_grow() {
        let new_id = manager.create_agent(template).await?;
        manager.start_agent(new_id).await?;

        let inner = manager.inner();
        let mut inner = inner.write().await;
        if let Some(pool) = inner.pools.get_mut(&id) {
            pool.members.insert(new_id);
        }
        if let Some(agent) = inner.agents.get_mut(&new_id) {
            agent.pool_id = Some(id);
        }
        return Ok(AutoscaleDecision::Grew { created: 1 });
    }

    let idle_fraction = {
        let inner = manager.inner();
        let inner = inner.read().await;
        let members: Vec<_> = pool.members.iter().filter_map(|aid| inner.agents.get(aid)).collect();
        if members.is_empty() {
            0.0
        } else {
            members.iter().filter(|a| a.status == AgentStatus::Idle).count() as f64 / members.len() as f64
        }
    };

    if idle_fraction > idle_fraction_threshold && pool.can_shrink() {
        let candidate = {
            let inner = manager.inner();
            let inner = inner.read().await;
            pool.members
                .iter()
                .filter_map(|aid| inner.agents.get(aid))
                .filter(|a| a.status == AgentStatus::Idle && a.workload() == 0)
                .min_by_key(|a| a.id)
                .map(|a| a.id)
        };

        let Some(victim) = candidate else {
            return Ok(AutoscaleDecision::Unchanged);
        };

        manager.stop_agent(victim, "pool shrink", 1_000).await?;
        manager.remove_agent(victim).await?;

        let inner = manager.inner();
        let mut inner = inner.write().await;
        if let Some(pool) = inner.pools.get_mut(&id) {
            pool.members.remove(&victim);
        }
        return Ok(AutoscaleDecision::Shrank { removed: 1 });
    }

    Ok(AutoscaleDecision::Unchanged)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::agent_manager::AgentManagerConfig;
    use crate::domain::ports::SystemClock;
    use crate::domain::agent::Capabilities;
    use crate::domain::{AgentConfig, AgentType};
    use crate::event_bus::EventBus;

    fn template() -> AgentTemplate {
        AgentTemplate {
            name: "a".to_string(),
            agent_type: AgentType::Coder,
            config: AgentConfig::default(),
            capabilities: Capabilities::default(),
        }
    }

    #[tokio::test]
    async fn grows_when_queue_exceeds_threshold() {
        let manager = AgentManager::new(AgentManagerConfig::default(), EventBus::new(), Arc::new(SystemClock));
        let pool_id = manager
            .create_pool(PoolConfig { template_name: "t".to_string(), min_size: 0, max_size: 3 })
            .await;

        let decision = manager.scale_pool(pool_id, 10, 5, 0.8, template()).await.unwrap();
        assert_eq!(decision, AutoscaleDecision::Grew { created: 1 });
        assert_eq!(manager.get_pool(pool_id).await.unwrap().size(), 1);
    }

    #[tokio::test]
    async fn shrinks_idle_pool_above_min() {
        let manager = AgentManager::new(AgentManagerConfig::default(), EventBus::new(), Arc::new(SystemClock));
        let pool_id = manager
            .create_pool(PoolConfig { template_name: "t".to_string(), min_size: 0, max_size: 3 })
            .await;
        manager.scale_pool(pool_id, 10, 5, 0.8, template()).await.unwrap();

        let decision = manager.scale_pool(pool_id, 0, 5, 0.1, template()).await.unwrap();
        assert_eq!(decision, AutoscaleDecision::Shrank { removed: 1 });
    }
}
