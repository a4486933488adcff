//! Configuration management for the flownet engine
//!
//! Handles execution parameters and logging. Values come from `FLOWNET_*` environment
//! variables; anything missing or unparsable falls back to its default.

use crate::runtime::strategy::{DownstreamFailurePolicy, ExecutionStrategy};
use serde::{Deserialize, Serialize};

/// Main application configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Execution manager configuration
    pub execution: ExecutionConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Execution manager configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Dispatch strategy for modules within a group
    pub strategy: ExecutionStrategy,
    /// Capacity of the execution queue
    pub queue_capacity: usize,
    /// What happens downstream of a module that did not complete
    pub failure_policy: DownstreamFailurePolicy,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Max level: trace, debug, info, warn or error
    pub level: String,
}

impl LoggingConfig {
    pub fn max_level(&self) -> tracing::Level {
        self.level.parse().unwrap_or(tracing::Level::INFO)
    }
}

const DEFAULT_QUEUE_CAPACITY: usize = 64;

impl Config {
    /// Build a configuration from an arbitrary variable source
    pub fn from_vars<F>(var: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut strategy: ExecutionStrategy = var("FLOWNET_STRATEGY")
            .and_then(|s| s.parse().ok())
            .unwrap_or_default();
        if let ExecutionStrategy::Parallel { .. } = strategy {
            if let Some(max) =
                var("FLOWNET_MAX_CONCURRENCY").and_then(|s| s.parse::<usize>().ok())
            {
                strategy = ExecutionStrategy::bounded(max);
            }
        }

        Self {
            execution: ExecutionConfig {
                strategy,
                queue_capacity: var("FLOWNET_QUEUE_CAPACITY")
                    .and_then(|s| s.parse().ok())
                    .filter(|capacity| *capacity > 0)
                    .unwrap_or(DEFAULT_QUEUE_CAPACITY),
                failure_policy: var("FLOWNET_FAILURE_POLICY")
                    .and_then(|s| s.parse().ok())
                    .unwrap_or_default(),
            },
            logging: LoggingConfig {
                level: var("FLOWNET_LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            },
        }
    }
}

impl Default for Config {
    /// Default configuration with ENV_VAR support for container deployment
    fn default() -> Self {
        Self::from_vars(|key| std::env::var(key).ok())
    }
}
