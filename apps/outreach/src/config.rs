use anyhow::{Context, Result};
use config::{Config, Environment, File};
use outreach_core::{ConfigError, DispatchConfig};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

/// Everything the `outreach` binary reads from its TOML file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(flatten)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub groups: HashMap<String, GroupConfig>,
    #[serde(default)]
    pub driver: DriverConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GroupConfig {
    #[serde(default)]
    pub profiles: Vec<String>,
}

/// External automation program behind the sender and browser session.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    pub program: String,
    pub args: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            program: "outreach-driver".to_string(),
            args: Vec::new(),
            timeout_secs: 120,
        }
    }
}

impl DriverConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl AppConfig {
    /// Reads `path`, then lets `OUTREACH__SECTION__KEY` variables override it.
    pub fn load(path: &str) -> Result<Self> {
        let settings = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("OUTREACH")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("Failed to read config {}", path))?;

        let config: AppConfig = settings
            .try_deserialize()
            .map_err(|e| anyhow::anyhow!(e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.dispatch.validate()?;
        if self.driver.program.trim().is_empty() {
            return Err(ConfigError::MissingField {
                field: "driver.program".to_string(),
            });
        }
        if self.driver.timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "driver.timeout_secs".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    /// Profiles listed under `[groups.<id>]`, empty for unknown groups.
    pub fn group_profiles(&self, group_id: &str) -> Vec<String> {
        self.groups
            .get(group_id)
            .map(|g| g.profiles.clone())
            .unwrap_or_default()
    }
}
