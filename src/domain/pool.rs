//! Agent pool domain model (spec §3, §4.3).

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::ids::{AgentId, PoolId};

/// A managed group of agents sharing a template and an autoscaling policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pool {
    pub id: PoolId,
    pub template_name: String,
    pub min_size: usize,
    pub max_size: usize,
    pub target_size: usize,
    pub autoscale: bool,
    pub members: HashSet<AgentId>,
}

impl Pool {
    #[must_use]
    pub fn new(template_name: impl Into<String>, min_size: usize, max_size: usize) -> Self {
        Self {
            id: PoolId::new(),
            template_name: template_name.into(),
            min_size,
            max_size,
            target_size: min_size,
            autoscale: false,
            members: HashSet::new(),
        }
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.members.len()
    }

    #[must_use]
    pub fn can_grow(&self) -> bool {
        self.size() < self.max_size
    }

    #[must_use]
    pub fn can_shrink(&self) -> bool {
        self.size() > self.min_size
    }
}
