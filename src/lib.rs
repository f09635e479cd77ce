//! swarmcore — a multi-agent orchestration coordination core.
//!
//! Four tightly-coupled subsystems share a consistent view of agents, tasks
//! and objectives under concurrent mutation:
//!
//! - [`agent_manager`] — agent lifecycle, health, and resource accounting.
//! - [`swarm`] — objective decomposition, DAG scheduling, dispatch, work
//!   stealing, and per-agent circuit breaking.
//! - [`executor`] — bounded concurrent execution of external processes with
//!   retry, timeout, and persistence.
//! - [`memory`] — namespaced, TTL'd, optionally sharded key-value store with
//!   change notifications.
//!
//! [`event_bus`] and [`config`] are the ambient glue: a process-wide
//! publish/subscribe bus, and environment-driven startup configuration.

pub mod circuit_breaker;
pub mod config;
pub mod dependency_resolver;
pub mod domain;
pub mod error;
pub mod event_bus;
pub mod executor;
pub mod logging;
pub mod memory;

pub mod agent_manager;
pub mod swarm;

pub use error::{CoreError, CoreResult};
