use std::time::Duration;

use thiserror::Error;

pub const MIN_INTERVAL_SECS: i64 = 1;
pub const MAX_INTERVAL_SECS: i64 = 3600;
pub const MIN_TIMEOUT_SECS: i64 = 1;
pub const MAX_TIMEOUT_SECS: i64 = 300;
pub const MIN_START_PERIOD_SECS: i64 = 0;
pub const MAX_START_PERIOD_SECS: i64 = 3600;
pub const MIN_RETRIES: i64 = 0;
pub const MAX_RETRIES: i64 = 100;
/// Upper bound on the CMD-SHELL command string, in bytes.
pub const MAX_SHELL_COMMAND_LEN: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("healthcheck {field} must be between {min} and {max}, got {value}")]
    OutOfRange {
        field: &'static str,
        value: i64,
        min: i64,
        max: i64,
    },
    #[error("healthcheck is enabled but has no test command")]
    EmptyCommand,
}

/// Validated healthcheck configuration for one container.
///
/// `test` holds the fully expanded probe argv (first element the executable);
/// the CMD / CMD-SHELL distinction of the annotation format is resolved at
/// parse time. Copies are independent, there is no shared interior state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthcheckConfig {
    pub test: Vec<String>,
    pub interval_secs: u64,
    pub timeout_secs: u64,
    pub start_period_secs: u64,
    pub retries: u32,
    pub enabled: bool,
}

impl HealthcheckConfig {
    /// Invalid-by-default configuration, intended only as a parse target.
    pub fn disabled() -> Self {
        Self {
            test: Vec::new(),
            interval_secs: 0,
            timeout_secs: 0,
            start_period_secs: 0,
            retries: 0,
            enabled: false,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range(
            "interval",
            self.interval_secs as i64,
            MIN_INTERVAL_SECS,
            MAX_INTERVAL_SECS,
        )?;
        check_range(
            "timeout",
            self.timeout_secs as i64,
            MIN_TIMEOUT_SECS,
            MAX_TIMEOUT_SECS,
        )?;
        check_range(
            "start_period",
            self.start_period_secs as i64,
            MIN_START_PERIOD_SECS,
            MAX_START_PERIOD_SECS,
        )?;
        check_range("retries", self.retries as i64, MIN_RETRIES, MAX_RETRIES)?;

        if self.enabled && self.test.is_empty() {
            return Err(ConfigError::EmptyCommand);
        }

        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

pub(crate) fn check_range(
    field: &'static str,
    value: i64,
    min: i64,
    max: i64,
) -> Result<i64, ConfigError> {
    if value < min || value > max {
        return Err(ConfigError::OutOfRange {
            field,
            value,
            min,
            max,
        });
    }
    Ok(value)
}
