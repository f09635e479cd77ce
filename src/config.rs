//! Startup configuration, read once from the environment.
//!
//! Mirrors the validation shape of the teacher's
//! `infrastructure::config::loader::ConfigLoader`, but restricted to the
//! four environment variables the core contract recognizes (spec §6): CLI
//! flags and project config files are collaborator concerns layered on top
//! of this by the excluded application shell.

use figment::providers::Env;
use figment::Figment;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration error types.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid max_agents: {0}, must be between 1 and 100000")]
    InvalidMaxAgents(usize),

    #[error("invalid log level: {0}")]
    InvalidLogLevel(String),

    #[error("invalid executor_max_concurrency: {0}, must be at least 1")]
    InvalidConcurrency(usize),

    #[error("failed to extract configuration: {0}")]
    Extraction(String),
}

/// Startup configuration for the coordination core.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Hard ceiling on simultaneously tracked agents (`SWARMCORE_MAX_AGENTS`).
    pub max_agents: usize,
    /// Default directive for the tracing `EnvFilter` (`SWARMCORE_LOG_LEVEL`).
    pub log_level: String,
    /// Root path for Distributed Memory persistence (`SWARMCORE_MEMORY_ROOT`).
    /// `None` disables persistence.
    pub memory_root: Option<String>,
    /// Background Executor worker pool size (`SWARMCORE_EXECUTOR_MAX_CONCURRENCY`).
    pub executor_max_concurrency: usize,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            max_agents: 100,
            log_level: "info".to_string(),
            memory_root: None,
            executor_max_concurrency: 8,
        }
    }
}

impl CoreConfig {
    /// Load configuration from `SWARMCORE_*` environment variables, falling
    /// back to defaults, then validate it.
    ///
    /// # Errors
    /// Returns a [`ConfigError`] if extraction fails or a value violates a
    /// documented constraint.
    pub fn load() -> Result<Self, ConfigError> {
        let config: Self = Figment::new()
            .merge(figment::providers::Serialized::defaults(Self::default()))
            .merge(Env::prefixed("SWARMCORE_"))
            .extract()
            .map_err(|e| ConfigError::Extraction(e.to_string()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    fn validate(config: &Self) -> Result<(), ConfigError> {
        if config.max_agents == 0 || config.max_agents > 100_000 {
            return Err(ConfigError::InvalidMaxAgents(config.max_agents));
        }
        if config.executor_max_concurrency == 0 {
            return Err(ConfigError::InvalidConcurrency(config.executor_max_concurrency));
        }
        if !["trace", "debug", "info", "warn", "error"].contains(&config.log_level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.log_level.clone()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(CoreConfig::validate(&CoreConfig::default()).is_ok());
    }

    #[test]
    fn rejects_zero_max_agents() {
        let mut config = CoreConfig::default();
        config.max_agents = 0;
        assert_eq!(
            CoreConfig::validate(&config),
            Err(ConfigError::InvalidMaxAgents(0))
        );
    }

    #[test]
    fn rejects_unknown_log_level() {
        let mut config = CoreConfig::default();
        config.log_level = "verbose".to_string();
        assert!(CoreConfig::validate(&config).is_err());
    }

    #[test]
    fn env_override_takes_precedence() {
        temp_env::with_var("SWARMCORE_MAX_AGENTS", Some("7"), || {
            let config = CoreConfig::load().unwrap();
            assert_eq!(config.max_agents, 7);
        });
    }
}
