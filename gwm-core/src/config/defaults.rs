//! Default configuration values for gwm

use std::time::Duration;

// Job service defaults
pub const DEFAULT_JOB_REFRESH_TIMEOUT_SECS: u64 = 5;
pub const MAX_JOB_REFRESH_TIMEOUT_SECS: u64 = 300;

// Quota defaults
pub const DEFAULT_SERIALIZE_PER_OWNER: bool = true;

// Node operation defaults
pub const DEFAULT_ROLE_CHANGE_REQUIRES_ADMIN: bool = true;

// Logging defaults
pub const DEFAULT_LOG_LEVEL: &str = "info";
pub const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

pub const fn duration_secs(secs: u64) -> Duration {
    Duration::from_secs(secs)
}
