//! Per-agent circuit breaker (spec §4.5, §5).
//!
//! Grounded on the state-machine shape of the teacher's
//! `services::circuit_breaker` (`CircuitState`, `record_failure`,
//! `record_success`, `allows`) but replaces its time-windowed failure list
//! and per-scope recovery-policy machinery with the exact rule spec §4.5
//! fixes: failure rate over the last N attempts, doubling cooldown capped at
//! a ceiling, and a single half-open probe.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;

use crate::domain::AgentId;

/// Circuit breaker configuration (spec §4.5 defaults).
#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    /// Size of the sliding attempt window (`N`).
    pub window: usize,
    /// Minimum attempts in the window before a failure rate is meaningful.
    pub min_attempts: usize,
    /// Failure rate (0.0..=1.0) above which the circuit opens.
    pub failure_threshold: f64,
    /// Initial cooldown before an open circuit tries half-open.
    pub cooldown: Duration,
    /// Cooldown ceiling after repeated doubling.
    pub max_cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            window: 10,
            min_attempts: 10,
            failure_threshold: 0.5,
            cooldown: Duration::seconds(30),
            max_cooldown: Duration::minutes(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

struct AgentBreaker {
    state: CircuitState,
    attempts: VecDeque<bool>,
    current_cooldown: Duration,
    opened_at: Option<DateTime<Utc>>,
    half_open_probe_outstanding: bool,
}

impl AgentBreaker {
    fn new(config: &CircuitBreakerConfig) -> Self {
        Self {
            state: CircuitState::Closed,
            attempts: VecDeque::with_capacity(config.window),
            current_cooldown: config.cooldown,
            opened_at: None,
            half_open_probe_outstanding: false,
        }
    }

    fn failure_rate(&self) -> f64 {
        if self.attempts.is_empty() {
            return 0.0;
        }
        let failures = self.attempts.iter().filter(|ok| !**ok).count();
        failures as f64 / self.attempts.len() as f64
    }

    fn open(&mut self, doubling: bool, config: &CircuitBreakerConfig) {
        if doubling {
            self.current_cooldown = (self.current_cooldown * 2).min(config.max_cooldown);
        }
        self.state = CircuitState::Open;
        self.opened_at = Some(Utc::now());
        self.half_open_probe_outstanding = false;
    }

    fn close(&mut self, config: &CircuitBreakerConfig) {
        self.state = CircuitState::Closed;
        self.opened_at = None;
        self.current_cooldown = config.cooldown;
        self.half_open_probe_outstanding = false;
        self.attempts.clear();
    }
}

/// Registry of per-agent circuit breakers, protected by the agent-scoped
/// lock discipline of spec §5 ("Circuit-breaker state is per-agent,
/// protected by the agent lock").
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    breakers: Arc<RwLock<HashMap<AgentId, AgentBreaker>>>,
}

impl CircuitBreakerRegistry {
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Whether dispatch to `agent` is currently permitted. A half-open
    /// breaker permits exactly one outstanding probe at a time (spec §4.5:
    /// "Half-open permits one probe").
    pub async fn allows_dispatch(&self, agent: AgentId) -> bool {
        let mut breakers = self.breakers.write().await;
        let breaker = breakers.entry(agent).or_insert_with(|| AgentBreaker::new(&self.config));

        match breaker.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let Some(opened_at) = breaker.opened_at else {
                    return true;
                };
                if Utc::now() > opened_at + breaker.current_cooldown {
                    breaker.state = CircuitState::HalfOpen;
                    breaker.half_open_probe_outstanding = true;
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                if breaker.half_open_probe_outstanding {
                    false
                } else {
                    breaker.half_open_probe_outstanding = true;
                    true
                }
            }
        }
    }

    /// Record the outcome of a dispatched task for the breaker's sliding
    /// window and apply the spec §4.5 state transitions.
    pub async fn record_outcome(&self, agent: AgentId, success: bool) {
        let mut breakers = self.breakers.write().await;
        let breaker = breakers.entry(agent).or_insert_with(|| AgentBreaker::new(&self.config));

        match breaker.state {
            CircuitState::HalfOpen => {
                if success {
                    breaker.close(&self.config);
                } else {
                    breaker.open(true, &self.config);
                }
            }
            CircuitState::Closed | CircuitState::Open => {
                if breaker.attempts.len() >= self.config.window {
                    breaker.attempts.pop_front();
                }
                breaker.attempts.push_back(success);

                if breaker.state == CircuitState::Closed
                    && breaker.attempts.len() >= self.config.min_attempts
                    && breaker.failure_rate() > self.config.failure_threshold
                {
                    breaker.open(false, &self.config);
                }
            }
        }
    }

    pub async fn state(&self, agent: AgentId) -> CircuitState {
        self.breakers
            .read()
            .await
            .get(&agent)
            .map_or(CircuitState::Closed, |b| b.state)
    }

    /// Forcibly reset a breaker, e.g. after manual operator intervention.
    pub async fn reset(&self, agent: AgentId) {
        if let Some(breaker) = self.breakers.write().await.get_mut(&agent) {
            breaker.close(&self.config);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn opens_after_majority_failures_in_window() {
        let registry = CircuitBreakerRegistry::new(CircuitBreakerConfig {
            window: 10,
            min_attempts: 10,
            failure_threshold: 0.5,
            cooldown: Duration::milliseconds(50),
            max_cooldown: Duration::seconds(5),
        });
        let agent = AgentId::new();

        for _ in 0..6 {
            registry.record_outcome(agent, false).await;
        }
        for _ in 0..4 {
            registry.record_outcome(agent, true).await;
        }

        assert_eq!(registry.state(agent).await, CircuitState::Open);
        assert!(!registry.allows_dispatch(agent).await);
    }

    #[tokio::test]
    async fn half_open_probe_then_close_on_success() {
        let registry = CircuitBreakerRegistry::new(CircuitBreakerConfig {
            window: 10,
            min_attempts: 10,
            failure_threshold: 0.5,
            cooldown: Duration::milliseconds(10),
            max_cooldown: Duration::seconds(5),
        });
        let agent = AgentId::new();
        for _ in 0..10 {
            registry.record_outcome(agent, false).await;
        }
        assert_eq!(registry.state(agent).await, CircuitState::Open);

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(registry.allows_dispatch(agent).await);
        assert_eq!(registry.state(agent).await, CircuitState::HalfOpen);

        registry.record_outcome(agent, true).await;
        assert_eq!(registry.state(agent).await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn half_open_failure_doubles_cooldown() {
        let registry = CircuitBreakerRegistry::new(CircuitBreakerConfig {
            window: 10,
            min_attempts: 10,
            failure_threshold: 0.5,
            cooldown: Duration::milliseconds(10),
            max_cooldown: Duration::seconds(5),
        });
        let agent = AgentId::new();
        for _ in 0..10 {
            registry.record_outcome(agent, false).await;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(registry.allows_dispatch(agent).await);
        registry.record_outcome(agent, false).await;
        assert_eq!(registry.state(agent).await, CircuitState::Open);

        // Original cooldown has elapsed, but it was doubled: still blocked.
        tokio::time::sleep(std::time::Duration::from_millis(15)).await;
        assert!(!registry.allows_dispatch(agent).await);
    }
}
