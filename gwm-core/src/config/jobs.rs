//! Job service configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::defaults::*;
use super::parse_duration_secs_from_env;
use crate::error::{GwmError, GwmResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    /// How long to wait for the status refresh that follows a submission
    #[serde(with = "humantime_serde")]
    pub refresh_timeout: Duration,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            refresh_timeout: duration_secs(DEFAULT_JOB_REFRESH_TIMEOUT_SECS),
        }
    }
}

impl JobsConfig {
    pub fn from_env() -> GwmResult<Self> {
        let mut config = Self::default();
        config.refresh_timeout =
            parse_duration_secs_from_env("GWM_JOB_REFRESH_TIMEOUT_SECS", config.refresh_timeout)?;
        Ok(config)
    }

    pub fn validate(&self) -> GwmResult<()> {
        if self.refresh_timeout.is_zero() {
            return Err(GwmError::configuration(
                "jobs",
                "refresh_timeout must be greater than zero",
            ));
        }
        if self.refresh_timeout > duration_secs(MAX_JOB_REFRESH_TIMEOUT_SECS) {
            return Err(GwmError::configuration(
                "jobs",
                format!(
                    "refresh_timeout too large (max {}s)",
                    MAX_JOB_REFRESH_TIMEOUT_SECS
                ),
            ));
        }
        Ok(())
    }
}
