pub mod admin;
pub mod start;
pub mod worker;

use anyhow::Result;
use outreach_core::{
    connect, with_retry, Clock, ProfileRegistry, ProxyPool, RetryPolicy, Store, SystemClock,
    TaskQueue,
};
use std::sync::Arc;
use tracing::info;

use crate::config::AppConfig;

/// Config plus an open store, shared by every subcommand.
pub struct AppContext {
    pub config: AppConfig,
    pub config_path: String,
    pub store: Arc<dyn Store>,
    pub clock: Arc<dyn Clock>,
}

impl AppContext {
    /// Connects to the configured database, retrying transient failures.
    pub async fn open(config: AppConfig, config_path: &str) -> Result<Self> {
        let policy = RetryPolicy::new(3, 500);
        let database = config.dispatch.database.clone();
        let store = with_retry(&policy, "Database connect", || connect(&database)).await?;
        info!("Connected to {}", database.url);

        Ok(Self {
            config,
            config_path: config_path.to_string(),
            store,
            clock: Arc::new(SystemClock),
        })
    }

    pub fn queue(&self) -> TaskQueue {
        TaskQueue::new(
            self.store.clone(),
            self.clock.clone(),
            self.config.dispatch.limits.clone(),
        )
    }

    pub fn proxy_pool(&self) -> ProxyPool {
        ProxyPool::new(
            self.store.clone(),
            self.clock.clone(),
            self.config.dispatch.proxy.clone(),
        )
    }

    pub fn profiles(&self) -> ProfileRegistry {
        ProfileRegistry::new(self.store.clone(), self.clock.clone())
    }

    pub async fn close(self) {
        self.store.close().await;
    }
}

/// Non-empty, non-comment lines of a text file, trimmed.
pub fn read_lines(path: &str) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", path, e))?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_read_lines_skips_blanks_and_comments() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# targets").unwrap();
        writeln!(file, "  @alpha  ").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "https://t.me/beta").unwrap();

        let lines = read_lines(file.path().to_str().unwrap()).unwrap();
        assert_eq!(lines, vec!["@alpha", "https://t.me/beta"]);
    }

    #[test]
    fn test_read_lines_missing_file() {
        assert!(read_lines("/nonexistent/targets.txt").is_err());
    }
}
