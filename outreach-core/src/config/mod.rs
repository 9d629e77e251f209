use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level dispatcher configuration shared by the supervisor and its workers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub limits: LimitsConfig,
    pub retry: RetryConfig,
    pub proxy: ProxyHealthConfig,
    pub supervisor: SupervisorConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
}

impl DispatchConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.limits.validate()?;
        self.proxy.validate()?;
        self.supervisor.validate()?;
        if self.database.url.trim().is_empty() {
            return Err(ConfigError::MissingField {
                field: "database.url".to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_messages_per_hour: u32,
    /// Cycles per task within one session (run id).
    pub max_cycles: u32,
    /// Jitter fraction applied to send and cycle delays.
    pub delay_randomness: f64,
    pub cycle_delay_minutes: u64,
    pub failure_backoff_secs: u64,
    pub slow_mode_buffer_secs: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_messages_per_hour: 30,
            max_cycles: 1,
            delay_randomness: 0.2,
            cycle_delay_minutes: 20,
            failure_backoff_secs: 300,
            slow_mode_buffer_secs: 5,
        }
    }
}

impl LimitsConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_messages_per_hour == 0 {
            return Err(ConfigError::invalid(
                "limits.max_messages_per_hour",
                "must be greater than 0",
            ));
        }
        if self.max_cycles < 1 {
            return Err(ConfigError::invalid("limits.max_cycles", "must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.delay_randomness) {
            return Err(ConfigError::invalid(
                "limits.delay_randomness",
                format!("{} is outside [0, 1]", self.delay_randomness),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Counted failures (exception/timeout) after which a task is blocked.
    pub max_attempts_before_block: u32,
    /// Pause after a failed send before the worker claims again.
    pub failure_pause_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts_before_block: 3,
            failure_pause_secs: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyHealthConfig {
    pub min_attempts_for_check: u32,
    /// Chat-not-found percentage above which a proxy is rotated.
    pub chat_not_found_threshold: f64,
    pub unblock_tasks_on_rotate: bool,
    pub health_reset_hours: u64,
    pub reset_interval_minutes: u64,
    pub pool_file: String,
}

impl Default for ProxyHealthConfig {
    fn default() -> Self {
        Self {
            min_attempts_for_check: 10,
            chat_not_found_threshold: 40.0,
            unblock_tasks_on_rotate: true,
            health_reset_hours: 24,
            reset_interval_minutes: 60,
            pool_file: "proxies.txt".to_string(),
        }
    }
}

impl ProxyHealthConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.chat_not_found_threshold > 0.0 && self.chat_not_found_threshold <= 100.0) {
            return Err(ConfigError::invalid(
                "proxy.chat_not_found_threshold",
                format!("{} is outside (0, 100]", self.chat_not_found_threshold),
            ));
        }
        if self.reset_interval_minutes == 0 {
            return Err(ConfigError::invalid(
                "proxy.reset_interval_minutes",
                "must be greater than 0",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    pub max_restart_attempts: u32,
    pub restart_base_delay_secs: u64,
    pub restart_max_delay_secs: u64,
    pub restart_cooldown_secs: u64,
    pub shutdown_grace_secs: u64,
    pub stale_task_timeout_minutes: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            max_restart_attempts: 5,
            restart_base_delay_secs: 30,
            restart_max_delay_secs: 300,
            restart_cooldown_secs: 3600,
            shutdown_grace_secs: 5,
            stale_task_timeout_minutes: 30,
        }
    }
}

impl SupervisorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.restart_base_delay_secs == 0 {
            return Err(ConfigError::invalid(
                "supervisor.restart_base_delay_secs",
                "must be greater than 0",
            ));
        }
        if self.restart_max_delay_secs < self.restart_base_delay_secs {
            return Err(ConfigError::invalid(
                "supervisor.restart_max_delay_secs",
                "must not be lower than restart_base_delay_secs",
            ));
        }
        Ok(())
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// `sqlite://path.db` or `postgres://...`
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://outreach.db".to_string(),
            max_connections: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub dir: String,
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: "logs".to_string(),
            level: "info".to_string(),
        }
    }
}
