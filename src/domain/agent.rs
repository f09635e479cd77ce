//! Agent domain model.
//!
//! Agents are logical workers backed by an external LLM process or an
//! internal executor (spec §1). They carry capabilities, a lifecycle FSM, a
//! health score, and rolling execution metrics.

use std::collections::{HashSet, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{AgentId, AgentIdentity, PoolId};

/// Closed set of agent type tags, with an escape hatch for caller-defined
/// kinds (spec §9: "dynamic dispatch by type tag… with a reserved `custom`
/// variant carrying a free-form string").
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "name")]
pub enum AgentType {
    Coordinator,
    Researcher,
    Coder,
    Analyst,
    Reviewer,
    Custom(String),
}

impl AgentType {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Coordinator => "coordinator",
            Self::Researcher => "researcher",
            Self::Coder => "coder",
            Self::Analyst => "analyst",
            Self::Reviewer => "reviewer",
            Self::Custom(name) => name,
        }
    }
}

/// Agent lifecycle FSM (spec §4.3):
/// `created -> initializing -> idle <-> busy -> (error|stopping) -> stopped -> terminated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Created,
    Initializing,
    Idle,
    Busy,
    Error,
    Stopping,
    Stopped,
    Terminated,
}

impl AgentStatus {
    /// Whether `self -> next` is a legal FSM transition.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        use AgentStatus::{Busy, Created, Error, Idle, Initializing, Stopped, Stopping, Terminated};
        matches!(
            (self, next),
            (Created, Initializing)
                | (Initializing, Idle)
                | (Idle, Busy)
                | (Busy, Idle)
                | (Idle, Stopping)
                | (Busy, Stopping)
                | (Idle, Error)
                | (Busy, Error)
                | (Error, Stopping)
                | (Error, Initializing)
                | (Stopping, Stopped)
                | (Stopped, Initializing)
                | (Stopped, Terminated)
        )
    }

    /// Whether the agent is in a state that may accept dispatch.
    #[must_use]
    pub const fn is_dispatchable(self) -> bool {
        matches!(self, Self::Idle)
    }
}

/// Capability set: free-form string flags plus language/framework lists
/// (spec §3).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub flags: HashSet<String>,
    pub languages: HashSet<String>,
    pub frameworks: HashSet<String>,
}

impl Capabilities {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_flag(mut self, flag: impl Into<String>) -> Self {
        self.flags.insert(flag.into());
        self
    }

    /// Whether this capability set covers a requested task-type tag. A flag
    /// match is sufficient; languages/frameworks are scored as bonuses by
    /// the scheduler, not required for coverage.
    #[must_use]
    pub fn covers(&self, task_kind: &str) -> bool {
        self.flags.contains(task_kind) || self.flags.contains("*")
    }
}

/// Per-agent configuration (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Autonomy level in `0.0..=1.0`.
    pub autonomy: f64,
    pub max_concurrent_tasks: u32,
    pub timeout_ms: u64,
    pub heartbeat_interval_ms: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            autonomy: 0.5,
            max_concurrent_tasks: 1,
            timeout_ms: 60_000,
            heartbeat_interval_ms: 10_000,
        }
    }
}

/// Weighted health-score components, each in `0.0..=1.0` (spec §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HealthScore {
    pub responsiveness: f64,
    pub performance: f64,
    pub reliability: f64,
    pub resource_usage: f64,
}

impl Default for HealthScore {
    fn default() -> Self {
        Self {
            responsiveness: 1.0,
            performance: 1.0,
            reliability: 1.0,
            resource_usage: 1.0,
        }
    }
}

/// Default weights for [`HealthScore::weighted`] (spec open question #1:
/// implementers may expose these as configuration; we fix the default here
/// and let callers override via [`HealthWeights`]).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HealthWeights {
    pub responsiveness: f64,
    pub performance: f64,
    pub reliability: f64,
    pub resource_usage: f64,
}

impl Default for HealthWeights {
    fn default() -> Self {
        Self {
            responsiveness: 0.3,
            performance: 0.3,
            reliability: 0.3,
            resource_usage: 0.1,
        }
    }
}

impl HealthScore {
    /// Weighted sum of the four components, capped at 0.5 if any component
    /// is exactly zero (spec §4.3).
    #[must_use]
    pub fn weighted(&self, weights: HealthWeights) -> f64 {
        let sum = self.responsiveness * weights.responsiveness
            + self.performance * weights.performance
            + self.reliability * weights.reliability
            + self.resource_usage * weights.resource_usage;

        let any_zero = self.responsiveness == 0.0
            || self.performance == 0.0
            || self.reliability == 0.0
            || self.resource_usage == 0.0;

        if any_zero {
            sum.min(0.5)
        } else {
            sum
        }
    }
}

/// Rolling execution metrics (spec §3).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentMetrics {
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub avg_execution_ms: f64,
    pub current_memory_bytes: u64,
    pub current_cpu_percent: f64,
    pub consecutive_missed_heartbeats: u32,
    pub restart_count: u32,
}

impl AgentMetrics {
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        let total = self.tasks_completed + self.tasks_failed;
        if total == 0 {
            1.0
        } else {
            self.tasks_completed as f64 / total as f64
        }
    }

    pub fn record_completion(&mut self, execution_ms: f64) {
        let n = self.tasks_completed as f64;
        self.avg_execution_ms = (self.avg_execution_ms * n + execution_ms) / (n + 1.0);
        self.tasks_completed += 1;
    }

    pub fn record_failure(&mut self) {
        self.tasks_failed += 1;
    }
}

/// A bounded record of something noteworthy that happened to an agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentIssue {
    pub at: DateTime<Utc>,
    pub message: String,
}

/// Maximum number of retained [`AgentIssue`]s per agent (spec §4.3).
pub const MAX_ISSUES: usize = 32;

/// An agent record: the unit the Agent Manager creates, starts, monitors and
/// destroys.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub identity: AgentIdentity,
    pub name: String,
    pub agent_type: AgentType,
    pub capabilities: Capabilities,
    pub config: AgentConfig,
    pub status: AgentStatus,
    pub health: HealthScore,
    pub metrics: AgentMetrics,
    /// Ids of tasks currently assigned to this agent; the Coordinator owns
    /// the tasks themselves, this is only the count/membership the Agent
    /// Manager needs for workload accounting (spec §9).
    pub active_tasks: HashSet<uuid::Uuid>,
    pub pool_id: Option<PoolId>,
    pub node_id: String,
    pub issues: VecDeque<AgentIssue>,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Agent {
    #[must_use]
    pub fn new(name: impl Into<String>, agent_type: AgentType, sequence: u64, node_id: impl Into<String>) -> Self {
        let node_id = node_id.into();
        let now = Utc::now();
        Self {
            id: AgentId::new(),
            identity: AgentIdentity::new(node_id.clone(), sequence),
            name: name.into(),
            agent_type,
            capabilities: Capabilities::default(),
            config: AgentConfig::default(),
            status: AgentStatus::Created,
            health: HealthScore::default(),
            metrics: AgentMetrics::default(),
            active_tasks: HashSet::new(),
            pool_id: None,
            node_id,
            issues: VecDeque::with_capacity(MAX_ISSUES),
            last_heartbeat: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[must_use]
    pub fn workload(&self) -> usize {
        self.active_tasks.len()
    }

    #[must_use]
    pub fn has_capacity(&self) -> bool {
        (self.workload() as u32) < self.config.max_concurrent_tasks
    }

    pub fn push_issue(&mut self, message: impl Into<String>) {
        if self.issues.len() >= MAX_ISSUES {
            self.issues.pop_front();
        }
        self.issues.push_back(AgentIssue {
            at: Utc::now(),
            message: message.into(),
        });
    }

    /// Attempt the FSM transition, returning whether it was legal. On
    /// success, bumps `updated_at`.
    #[must_use]
    pub fn transition(&mut self, next: AgentStatus) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        self.status = next;
        self.updated_at = Utc::now();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fsm_rejects_illegal_transition() {
        let mut agent = Agent::new("a", AgentType::Coder, 1, "node-1");
        assert!(!agent.transition(AgentStatus::Busy));
        assert_eq!(agent.status, AgentStatus::Created);
    }

    #[test]
    fn fsm_allows_documented_path() {
        let mut agent = Agent::new("a", AgentType::Coder, 1, "node-1");
        assert!(agent.transition(AgentStatus::Initializing));
        assert!(agent.transition(AgentStatus::Idle));
        assert!(agent.transition(AgentStatus::Busy));
        assert!(agent.transition(AgentStatus::Idle));
        assert!(agent.transition(AgentStatus::Stopping));
        assert!(agent.transition(AgentStatus::Stopped));
        assert!(agent.transition(AgentStatus::Terminated));
    }

    #[test]
    fn health_score_caps_at_half_when_component_zero() {
        let mut health = HealthScore::default();
        health.responsiveness = 0.0;
        assert!(health.weighted(HealthWeights::default()) <= 0.5);
    }

    #[test]
    fn issue_deque_is_bounded() {
        let mut agent = Agent::new("a", AgentType::Coder, 1, "node-1");
        for i in 0..40 {
            agent.push_issue(format!("issue {i}"));
        }
        assert_eq!(agent.issues.len(), MAX_ISSUES);
        assert_eq!(agent.issues.back().unwrap().message, "issue 39");
    }
}
