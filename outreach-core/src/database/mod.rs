//! # Store
//!
//! One repository interface over the shared task/profile/proxy state, with a
//! SQLite backend (default) and a Postgres backend behind the `postgres`
//! feature. Every multi-row mutation a caller relies on being atomic is a
//! single trait method, so backends own their own transactions.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::error;

use crate::config::DatabaseConfig;
use crate::error::DatabaseError;
use crate::models::{
    Attempt, AttemptOutcome, AttemptStatus, DailyStats, Profile, ProxyAssignment, ProxyOutcome,
    ProxyStats, QueueStats, Task,
};

#[cfg(feature = "postgres")]
pub mod postgres;
mod rows;
pub mod sqlite;

#[cfg(feature = "postgres")]
pub use postgres::PgStore;
pub use sqlite::SqliteStore;

/// Parameters of one atomic claim.
#[derive(Debug, Clone)]
pub struct ClaimRequest {
    pub group_id: String,
    pub profile_id: String,
    /// Session scope; when set, eligibility counts this run's successes only.
    pub run_id: Option<String>,
    pub max_cycles: i64,
    pub now: i64,
}

#[async_trait]
pub trait Store: Send + Sync {
    fn backend(&self) -> &'static str;

    fn metrics(&self) -> DbMetricsSnapshot;

    // --- Tasks ---

    /// Upserts targets into a group; existing rows keep their progress.
    async fn import_targets(
        &self,
        group_id: &str,
        targets: &[String],
        total_cycles: i64,
        now: i64,
    ) -> Result<u64>;

    /// Selects one eligible task and moves it to `in_progress` in a single
    /// statement. Concurrent claimers never receive the same row.
    async fn claim_task(&self, request: &ClaimRequest) -> Result<Option<Task>>;

    async fn get_task(&self, task_id: i64) -> Result<Option<Task>>;

    async fn count_attempts(
        &self,
        task_id: i64,
        run_id: &str,
        status: Option<AttemptStatus>,
    ) -> Result<i64>;

    async fn list_attempts(&self, task_id: i64) -> Result<Vec<Attempt>>;

    /// Appends the attempt, applies the task transition and bumps message,
    /// hourly and daily counters in one transaction. Returns the updated task,
    /// or [`QueueError::NotHeld`](crate::error::QueueError::NotHeld) with
    /// nothing written when the attempt's profile no longer holds the task.
    async fn record_attempt(&self, outcome: &AttemptOutcome) -> Result<Task>;

    /// Returns a task held by `profile_id` to `pending` at `next_available_at`
    /// without touching counters.
    async fn reschedule_task(
        &self,
        task_id: i64,
        profile_id: &str,
        next_available_at: i64,
        now: i64,
    ) -> Result<bool>;

    /// Returns a task held by `profile_id` to `pending` immediately.
    async fn release_task(&self, task_id: i64, profile_id: &str, now: i64) -> Result<bool>;

    /// Resets `in_progress` tasks last updated before `cutoff`.
    async fn reclaim_stale(&self, cutoff: i64, group_id: Option<&str>, now: i64) -> Result<u64>;

    async fn unblock_tasks(&self, block_reason: &str, now: i64) -> Result<u64>;

    async fn queue_stats(&self, group_id: Option<&str>) -> Result<QueueStats>;

    // --- Messages ---

    async fn import_messages(&self, group_id: &str, texts: &[String]) -> Result<u64>;

    async fn active_messages(&self, group_id: &str) -> Result<Vec<String>>;

    // --- Profiles ---

    async fn upsert_profile(&self, profile_id: &str, name: &str, now: i64) -> Result<()>;

    async fn get_profile(&self, profile_id: &str) -> Result<Option<Profile>>;

    /// Active, unblocked, logged-in profiles ordered by id.
    async fn active_profiles(&self) -> Result<Vec<Profile>>;

    async fn block_profile(&self, profile_id: &str) -> Result<()>;

    async fn mark_profile_logged_out(&self, profile_id: &str) -> Result<()>;

    async fn daily_stats(&self, profile_id: &str, day: &str) -> Result<Option<DailyStats>>;

    // --- Proxies ---

    /// Inserts unseen proxy URLs as healthy and unassigned.
    async fn sync_proxies(&self, urls: &[String]) -> Result<u64>;

    async fn list_proxies(&self) -> Result<Vec<ProxyAssignment>>;

    async fn proxy_for_profile(&self, profile_id: &str) -> Result<Option<ProxyAssignment>>;

    /// URLs of healthy, unblocked, unassigned proxies.
    async fn available_proxies(&self) -> Result<Vec<String>>;

    /// Binds `proxy_url` to `profile_id` if it is still free and usable,
    /// releasing whatever the profile held before. Returns false if lost.
    async fn assign_proxy(&self, proxy_url: &str, profile_id: &str, now: i64) -> Result<bool>;

    async fn mark_proxy_unhealthy(&self, proxy_url: &str, now: i64) -> Result<()>;

    async fn mark_proxy_blocked(&self, proxy_url: &str) -> Result<()>;

    async fn reset_unhealthy_proxies(&self, cutoff: i64) -> Result<u64>;

    async fn record_proxy_attempt(
        &self,
        proxy_url: &str,
        profile_id: &str,
        outcome: ProxyOutcome,
        now: i64,
    ) -> Result<()>;

    async fn proxy_stats(&self, proxy_url: &str, profile_id: &str) -> Result<Option<ProxyStats>>;

    async fn clear_proxy_stats(&self, proxy_url: &str, profile_id: &str) -> Result<()>;

    async fn close(&self);
}

/// Opens the backend named by the URL scheme and initializes its schema.
pub async fn connect(config: &DatabaseConfig) -> Result<Arc<dyn Store>> {
    let url = config.url.as_str();
    if let Some(path) = url.strip_prefix("sqlite://") {
        let store = SqliteStore::open(path, config.max_connections).await?;
        return Ok(Arc::new(store));
    }
    #[cfg(feature = "postgres")]
    if url.starts_with("postgres://") || url.starts_with("postgresql://") {
        let store = PgStore::connect(url, config.max_connections).await?;
        return Ok(Arc::new(store));
    }
    Err(DatabaseError::UnsupportedUrl {
        url: url.to_string(),
    })
    .context("Failed to open store")
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum QueryKind {
    Select,
    Write,
}

#[derive(Debug, Default)]
pub struct DbMetrics {
    pub total_queries: AtomicU64,
    pub total_errors: AtomicU64,
    pub total_writes: AtomicU64,
    pub total_selects: AtomicU64,
    pub avg_query_time_ms: AtomicU64,
    pub query_count_for_avg: AtomicU64,
}

impl DbMetrics {
    /// Counts the query, logs a failure and attaches `op` as context.
    pub(crate) fn track<T>(
        &self,
        op: &str,
        kind: QueryKind,
        start: Instant,
        result: std::result::Result<T, sqlx::Error>,
    ) -> Result<T> {
        match kind {
            QueryKind::Select => self.total_selects.fetch_add(1, Ordering::SeqCst),
            QueryKind::Write => self.total_writes.fetch_add(1, Ordering::SeqCst),
        };
        self.total_queries.fetch_add(1, Ordering::SeqCst);
        self.record_query_time(start, result.is_ok());

        match result {
            Ok(value) => Ok(value),
            Err(e) => {
                self.total_errors.fetch_add(1, Ordering::SeqCst);
                error!("Failed to {}: {}", op, e);
                Err(e).with_context(|| format!("Failed to {}", op))
            }
        }
    }

    fn record_query_time(&self, start: Instant, success: bool) {
        if !success {
            return;
        }
        let elapsed_ms = start.elapsed().as_millis() as u64;
        let count = self.query_count_for_avg.load(Ordering::SeqCst);
        let current_avg = self.avg_query_time_ms.load(Ordering::SeqCst);

        let new_count = count + 1;
        let new_avg = if count == 0 {
            elapsed_ms
        } else {
            (current_avg * count + elapsed_ms) / new_count
        };
        self.query_count_for_avg.store(new_count, Ordering::SeqCst);
        self.avg_query_time_ms.store(new_avg, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> DbMetricsSnapshot {
        DbMetricsSnapshot {
            total_queries: self.total_queries.load(Ordering::SeqCst),
            total_errors: self.total_errors.load(Ordering::SeqCst),
            total_writes: self.total_writes.load(Ordering::SeqCst),
            total_selects: self.total_selects.load(Ordering::SeqCst),
            avg_query_time_ms: self.avg_query_time_ms.load(Ordering::SeqCst),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DbMetricsSnapshot {
    pub total_queries: u64,
    pub total_errors: u64,
    pub total_writes: u64,
    pub total_selects: u64,
    pub avg_query_time_ms: u64,
}

impl DbMetricsSnapshot {
    pub fn error_rate(&self) -> f64 {
        if self.total_queries == 0 {
            0.0
        } else {
            self.total_errors as f64 / self.total_queries as f64 * 100.0
        }
    }
}

/// Calendar day (UTC) used as the daily stats key.
pub(crate) fn day_key(now: i64) -> String {
    chrono::DateTime::from_timestamp(now, 0)
        .map(|dt| dt.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "1970-01-01".to_string())
}

/// Adds a leading `@` to bare usernames; links and phone numbers pass through.
pub(crate) fn normalize_target(raw: &str) -> Option<String> {
    let target = raw.trim();
    if target.is_empty() || target.starts_with('#') {
        return None;
    }
    if target.starts_with('@')
        || target.starts_with('+')
        || target.starts_with("http://")
        || target.starts_with("https://")
    {
        return Some(target.to_string());
    }
    Some(format!("@{}", target))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_target() {
        assert_eq!(normalize_target(" alice "), Some("@alice".to_string()));
        assert_eq!(normalize_target("@bob"), Some("@bob".to_string()));
        assert_eq!(
            normalize_target("https://t.me/carol"),
            Some("https://t.me/carol".to_string())
        );
        assert_eq!(normalize_target("   "), None);
        assert_eq!(normalize_target("# comment"), None);
    }

    #[test]
    fn test_day_key() {
        assert_eq!(day_key(0), "1970-01-01");
        assert_eq!(day_key(1_700_000_000), "2023-11-14");
    }

    #[test]
    fn test_metrics_error_rate() {
        let metrics = DbMetrics::default();
        let ok: std::result::Result<(), sqlx::Error> = Ok(());
        assert!(metrics
            .track("select", QueryKind::Select, Instant::now(), ok)
            .is_ok());
        let err: std::result::Result<(), sqlx::Error> = Err(sqlx::Error::RowNotFound);
        assert!(metrics
            .track("write", QueryKind::Write, Instant::now(), err)
            .is_err());

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_queries, 2);
        assert_eq!(snapshot.total_errors, 1);
        assert!((snapshot.error_rate() - 50.0).abs() < f64::EPSILON);
    }
}
