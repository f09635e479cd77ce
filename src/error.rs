//! Core error kinds shared across every component.
//!
//! The core never throws across a component boundary: every operation
//! returns a [`CoreResult`]. Component-internal errors may exist locally but
//! must convert into [`CoreError`] via `From` before crossing out.

use thiserror::Error;

/// Flat error taxonomy for the coordination core (spec §7).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Unknown id.
    #[error("not found: {0}")]
    NotFound(String),

    /// Operation not allowed in the current FSM state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Would exceed `maxAgents`, memory budget, executor queue, or resource caps.
    #[error("capacity exceeded: {0}")]
    CapacityExceeded(String),

    /// Operation or external process exceeded its allowance.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Cooperative cancellation observed.
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// Upstream task failed beyond retries.
    #[error("dependency failed: {0}")]
    DependencyFailed(String),

    /// Dispatch blocked by an agent's circuit breaker.
    #[error("circuit open: {0}")]
    CircuitOpen(String),

    /// Persistence record failed checksum.
    #[error("corrupt data: {0}")]
    CorruptData(String),

    /// Import encountered a key conflict under `rename` with no available suffix.
    #[error("conflict resolution required: {0}")]
    ConflictResolutionRequired(String),

    /// Input violates a documented constraint (e.g. circular dependency).
    #[error("validation failed: {0}")]
    ValidationFailed(String),
}

/// Result alias used throughout the coordination core.
pub type CoreResult<T> = Result<T, CoreError>;

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::ValidationFailed(format!("serialization error: {err}"))
    }
}

impl CoreError {
    /// Whether this error kind is inherently transient and may be retried
    /// locally without surfacing to the caller (spec §7 propagation policy).
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::CircuitOpen(_))
    }
}
