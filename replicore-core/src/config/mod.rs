//! Configuration management for Replicore
//!
//! Defaults, TOML files and `REPLICORE_<SECTION>_<KEY>` environment
//! overrides, validated before use.

use crate::core_replication::{NodeId, ResolutionPolicy};
use crate::logging::{LogConfig, LogLevel};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::time::Duration;
use uuid::Uuid;

mod error;

pub use error::ConfigError;

/// Main application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Local node identity
    #[serde(default)]
    pub node: NodeConfig,

    /// Replication pipeline tuning
    #[serde(default)]
    pub replication: ReplicationConfig,

    /// Conflict resolution policy
    #[serde(default)]
    pub resolution: ResolutionConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Metrics configuration
    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Identity stamped into change vectors of local writes
    pub node_id: NodeId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicationConfig {
    /// Number of per-document lock stripes
    pub lock_stripes: usize,

    /// Time budget of one resolution script call
    #[serde(with = "humantime_serde")]
    pub script_timeout: Duration,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionConfig {
    #[serde(default)]
    pub policy: ResolutionPolicy,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Enable JSON formatting
    pub json_format: bool,

    /// Include timestamps
    pub with_timestamp: bool,

    /// Include target module
    pub with_target: bool,
}

/// Metrics configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Forward replication counters to the `metrics` facade
    pub enabled: bool,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self { node_id: Uuid::new_v4() }
    }
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            lock_stripes: 64,
            script_timeout: Duration::from_secs(5),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            with_timestamp: true,
            with_target: true,
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl LoggingConfig {
    /// Logging subsystem settings; unknown levels fall back to info
    pub fn to_log_config(&self) -> LogConfig {
        LogConfig::new(self.level.parse().unwrap_or_default())
            .with_timestamp(self.with_timestamp)
            .with_target(self.with_target)
            .json_format(self.json_format)
    }
}

fn parse_var<T>(key: &str, value: &str, what: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| ConfigError::InvalidValue(format!("Invalid {} in {}: {}", what, key, e)))
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// Environment variables follow the pattern: REPLICORE_<SECTION>_<KEY>
    /// Example: REPLICORE_REPLICATION_SCRIPT_TIMEOUT=500ms
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env(|key| env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides looked up through `lookup`
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        const NODE_ID: &str = "REPLICORE_NODE_NODE_ID";
        const LOCK_STRIPES: &str = "REPLICORE_REPLICATION_LOCK_STRIPES";
        const SCRIPT_TIMEOUT: &str = "REPLICORE_REPLICATION_SCRIPT_TIMEOUT";
        const POLICY: &str = "REPLICORE_RESOLUTION_POLICY";
        const LOG_LEVEL: &str = "REPLICORE_LOG_LEVEL";
        const LOG_JSON: &str = "REPLICORE_LOG_JSON";
        const METRICS_ENABLED: &str = "REPLICORE_METRICS_ENABLED";

        // Node config
        if let Some(id) = lookup(NODE_ID) {
            self.node.node_id = parse_var(NODE_ID, &id, "node id")?;
        }

        // Replication config
        if let Some(stripes) = lookup(LOCK_STRIPES) {
            self.replication.lock_stripes = parse_var(LOCK_STRIPES, &stripes, "stripe count")?;
        }
        if let Some(timeout) = lookup(SCRIPT_TIMEOUT) {
            self.replication.script_timeout = humantime_serde::re::humantime::parse_duration(&timeout)
                .map_err(|e| ConfigError::InvalidValue(format!("Invalid duration in {}: {}", SCRIPT_TIMEOUT, e)))?;
        }

        // Resolution config; script maps are only configurable from a file
        if let Some(policy) = lookup(POLICY) {
            self.resolution.policy = match policy.as_str() {
                "none" => ResolutionPolicy::None,
                "resolve_to_latest" => ResolutionPolicy::ResolveToLatest,
                "resolve_to_tombstone" => ResolutionPolicy::ResolveToTombstone,
                other => {
                    return Err(ConfigError::InvalidValue(format!(
                        "Invalid policy in {}: {}",
                        POLICY, other
                    )))
                }
            };
        }

        // Logging config
        if let Some(level) = lookup(LOG_LEVEL) {
            self.logging.level = level;
        }
        if let Some(json) = lookup(LOG_JSON) {
            self.logging.json_format = parse_var(LOG_JSON, &json, "JSON flag")?;
        }

        // Metrics config
        if let Some(enabled) = lookup(METRICS_ENABLED) {
            self.metrics.enabled = parse_var(METRICS_ENABLED, &enabled, "metrics flag")?;
        }

        Ok(())
    }

    /// Load configuration from file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::FileReadError(e.to_string()))?;

        let config: Self =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.replication.lock_stripes == 0 {
            return Err(ConfigError::ValidationFailed(
                "lock_stripes must be greater than 0".to_string(),
            ));
        }

        if self.replication.script_timeout.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "script_timeout must be greater than 0".to_string(),
            ));
        }

        if let ResolutionPolicy::ScriptByCollection { scripts } = &self.resolution.policy {
            if let Some((collection, _)) = scripts.iter().find(|(_, script)| script.trim().is_empty()) {
                return Err(ConfigError::ValidationFailed(format!(
                    "Empty script id for collection {}",
                    collection
                )));
            }
        }

        if self.logging.level.parse::<LogLevel>().is_err() {
            return Err(ConfigError::ValidationFailed(format!(
                "Invalid log level: {}",
                self.logging.level
            )));
        }

        Ok(())
    }

    /// Render as the TOML a config file would contain
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::SerializeError(e.to_string()))
    }

    /// Save configuration to file
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let contents = self.to_toml()?;

        std::fs::write(path, contents).map_err(|e| ConfigError::FileWriteError(e.to_string()))?;

        Ok(())
    }
}
