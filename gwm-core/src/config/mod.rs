//! Configuration for gwm
//!
//! Every section has defaults, so an empty file or environment yields a
//! working configuration. Values come from a TOML file, `GWM_*` environment
//! variables, or the builder.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{GwmError, GwmResult};

pub mod defaults;
pub mod jobs;

pub use defaults::*;
pub use jobs::JobsConfig;

/// Root configuration structure for gwm
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GwmConfig {
    /// Job submission and status refresh
    pub jobs: JobsConfig,

    /// Quota accounting
    pub quota: QuotaConfig,

    /// Node operation policy
    pub node_ops: NodeOpsConfig,

    /// Log output
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaConfig {
    /// Hold a per-owner, per-cluster lock from usage read until the job is
    /// recorded. Without it two concurrent requests can both pass against
    /// the same usage.
    pub serialize_per_owner: bool,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            serialize_per_owner: DEFAULT_SERIALIZE_PER_OWNER,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeOpsConfig {
    /// Only cluster admins may change node roles. When false, holders of
    /// the migrate permission may as well.
    pub role_change_requires_admin: bool,
}

impl Default for NodeOpsConfig {
    fn default() -> Self {
        Self {
            role_change_requires_admin: DEFAULT_ROLE_CHANGE_REQUIRES_ADMIN,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

impl LoggingConfig {
    pub fn validate(&self) -> GwmResult<()> {
        if !LOG_LEVELS.contains(&self.level.as_str()) {
            return Err(GwmError::configuration(
                "logging",
                format!("unknown log level '{}'", self.level),
            ));
        }
        Ok(())
    }
}

impl GwmConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from environment variables
    pub fn from_env() -> GwmResult<Self> {
        let mut config = Self::default();
        config.jobs = JobsConfig::from_env()?;
        config.quota.serialize_per_owner =
            parse_bool_from_env("GWM_QUOTA_SERIALIZE_PER_OWNER", config.quota.serialize_per_owner)?;
        config.node_ops.role_change_requires_admin = parse_bool_from_env(
            "GWM_ROLE_CHANGE_REQUIRES_ADMIN",
            config.node_ops.role_change_requires_admin,
        )?;
        if let Ok(level) = std::env::var("GWM_LOG_LEVEL") {
            config.logging.level = level;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> GwmResult<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        let config: Self = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> GwmResult<()> {
        self.jobs.validate()?;
        self.logging.validate()?;
        Ok(())
    }

    pub fn builder() -> GwmConfigBuilder {
        GwmConfigBuilder::new()
    }
}

/// Builder for GwmConfig
pub struct GwmConfigBuilder {
    config: GwmConfig,
}

impl GwmConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: GwmConfig::default(),
        }
    }

    pub fn refresh_timeout(mut self, timeout: Duration) -> Self {
        self.config.jobs.refresh_timeout = timeout;
        self
    }

    pub fn serialize_per_owner(mut self, enabled: bool) -> Self {
        self.config.quota.serialize_per_owner = enabled;
        self
    }

    pub fn role_change_requires_admin(mut self, required: bool) -> Self {
        self.config.node_ops.role_change_requires_admin = required;
        self
    }

    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    pub fn build(self) -> GwmResult<GwmConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for GwmConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn parse_duration_secs_from_env(key: &str, default: Duration) -> GwmResult<Duration> {
    match std::env::var(key) {
        Ok(value) => value
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| GwmError::configuration("env", format!("Invalid {}", key))),
        Err(_) => Ok(default),
    }
}

pub(crate) fn parse_bool_from_env(key: &str, default: bool) -> GwmResult<bool> {
    match std::env::var(key) {
        Ok(value) => value
            .parse::<bool>()
            .map_err(|_| GwmError::configuration("env", format!("Invalid {}", key))),
        Err(_) => Ok(default),
    }
}
