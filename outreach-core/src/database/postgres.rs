use anyhow::Result;
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Executor, Postgres};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

use super::rows::{
    AttemptRow, DailyStatsRow, ProfileRow, ProxyRow, ProxyStatsRow, QueueStatsRow, TaskRow,
    TransitionColumns, ATTEMPT_COLUMNS, PROFILE_COLUMNS, PROXY_COLUMNS, PROXY_STATS_COLUMNS,
    TASK_COLUMNS,
};
use super::{day_key, normalize_target, ClaimRequest, DbMetrics, DbMetricsSnapshot, QueryKind, Store};
use crate::error::{DatabaseError, QueueError};
use crate::models::{
    Attempt, AttemptOutcome, AttemptStatus, DailyStats, Profile, ProxyAssignment, ProxyOutcome,
    ProxyStats, QueueStats, Task,
};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS profiles (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    is_active BOOLEAN NOT NULL DEFAULT TRUE,
    is_blocked BOOLEAN NOT NULL DEFAULT FALSE,
    is_logged_out BOOLEAN NOT NULL DEFAULT FALSE,
    messages_sent_current_hour BIGINT NOT NULL DEFAULT 0,
    hour_reset_time BIGINT,
    created_at BIGINT NOT NULL
);
CREATE TABLE IF NOT EXISTS tasks (
    id BIGSERIAL PRIMARY KEY,
    group_id TEXT NOT NULL,
    target TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    is_blocked BOOLEAN NOT NULL DEFAULT FALSE,
    block_reason TEXT,
    completed_cycles BIGINT NOT NULL DEFAULT 0,
    total_cycles BIGINT NOT NULL DEFAULT 1,
    success_count BIGINT NOT NULL DEFAULT 0,
    failed_count BIGINT NOT NULL DEFAULT 0,
    next_available_at BIGINT,
    last_attempt_at BIGINT,
    assigned_profile_id TEXT,
    created_at BIGINT NOT NULL,
    updated_at BIGINT NOT NULL,
    UNIQUE (group_id, target),
    CHECK (completed_cycles <= total_cycles)
);
CREATE TABLE IF NOT EXISTS task_attempts (
    id BIGSERIAL PRIMARY KEY,
    task_id BIGINT NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
    profile_id TEXT NOT NULL,
    run_id TEXT,
    cycle_number BIGINT NOT NULL,
    status TEXT NOT NULL,
    error_type TEXT,
    error_message TEXT,
    message_text TEXT,
    created_at BIGINT NOT NULL
);
CREATE TABLE IF NOT EXISTS messages (
    id BIGSERIAL PRIMARY KEY,
    group_id TEXT NOT NULL,
    text TEXT NOT NULL,
    is_active BOOLEAN NOT NULL DEFAULT TRUE,
    usage_count BIGINT NOT NULL DEFAULT 0,
    UNIQUE (group_id, text)
);
CREATE TABLE IF NOT EXISTS profile_daily_stats (
    profile_id TEXT NOT NULL,
    day TEXT NOT NULL,
    messages_sent BIGINT NOT NULL DEFAULT 0,
    successful_sends BIGINT NOT NULL DEFAULT 0,
    failed_sends BIGINT NOT NULL DEFAULT 0,
    PRIMARY KEY (profile_id, day)
);
CREATE TABLE IF NOT EXISTS proxy_assignments (
    proxy_url TEXT PRIMARY KEY,
    profile_id TEXT,
    is_healthy BOOLEAN NOT NULL DEFAULT TRUE,
    is_blocked BOOLEAN NOT NULL DEFAULT FALSE,
    assigned_at BIGINT,
    last_rotation_at BIGINT
);
CREATE TABLE IF NOT EXISTS proxy_stats (
    proxy_url TEXT NOT NULL,
    profile_id TEXT NOT NULL,
    total_attempts BIGINT NOT NULL DEFAULT 0,
    successful_sends BIGINT NOT NULL DEFAULT 0,
    chat_not_found BIGINT NOT NULL DEFAULT 0,
    other_errors BIGINT NOT NULL DEFAULT 0,
    updated_at BIGINT NOT NULL,
    PRIMARY KEY (proxy_url, profile_id)
);
CREATE INDEX IF NOT EXISTS idx_tasks_claim ON tasks(group_id, status, is_blocked, next_available_at);
CREATE INDEX IF NOT EXISTS idx_tasks_block_reason ON tasks(block_reason);
CREATE INDEX IF NOT EXISTS idx_attempts_task_run ON task_attempts(task_id, run_id, status);
CREATE UNIQUE INDEX IF NOT EXISTS idx_proxy_profile ON proxy_assignments(profile_id) WHERE profile_id IS NOT NULL;
";

/// Postgres backend. Claims lock the candidate row with `SKIP LOCKED`, so
/// competing workers move on to the next row instead of waiting.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
    metrics: Arc<DbMetrics>,
}

impl PgStore {
    pub const DEFAULT_TIMEOUT_MS: u64 = 30000;

    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .acquire_timeout(Duration::from_millis(Self::DEFAULT_TIMEOUT_MS))
            .connect(url)
            .await
            .map_err(|e| DatabaseError::ConnectionFailed {
                url: redact(url),
                msg: e.to_string(),
            })?;

        pool.execute(SCHEMA)
            .await
            .map_err(|e| DatabaseError::MigrationFailed { msg: e.to_string() })?;
        info!("Postgres schema initialized.");

        Ok(Self {
            pool,
            metrics: Arc::new(DbMetrics::default()),
        })
    }

    async fn apply_outcome(
        &self,
        outcome: &AttemptOutcome,
    ) -> std::result::Result<Option<TaskRow>, sqlx::Error> {
        let attempt = &outcome.attempt;
        let cols = TransitionColumns::from(&outcome.transition);
        let success = outcome.is_success();
        let (success_inc, failed_inc) = if success { (1i64, 0i64) } else { (0, 1) };

        let mut tx = self.pool.begin().await?;

        let row: Option<TaskRow> = sqlx::query_as(&format!(
            "UPDATE tasks SET
                success_count = success_count + $1,
                failed_count = failed_count + $2,
                completed_cycles = LEAST(completed_cycles + 1, total_cycles),
                status = $3,
                is_blocked = $4,
                block_reason = $5,
                next_available_at = $6,
                assigned_profile_id = NULL,
                last_attempt_at = $7,
                updated_at = $7
             WHERE id = $8 AND status = 'in_progress' AND assigned_profile_id = $9
             RETURNING {}",
            TASK_COLUMNS
        ))
        .bind(success_inc)
        .bind(failed_inc)
        .bind(cols.status)
        .bind(cols.is_blocked)
        .bind(&cols.block_reason)
        .bind(cols.next_available_at)
        .bind(outcome.now)
        .bind(attempt.task_id)
        .bind(&attempt.profile_id)
        .fetch_optional(&mut *tx)
        .await?;

        if row.is_none() {
            return Ok(None);
        }

        sqlx::query(
            "INSERT INTO task_attempts
                (task_id, profile_id, run_id, cycle_number, status, error_type, error_message, message_text, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(attempt.task_id)
        .bind(&attempt.profile_id)
        .bind(&attempt.run_id)
        .bind(attempt.cycle_number)
        .bind(attempt.status.as_str())
        .bind(&attempt.error_type)
        .bind(&attempt.error_message)
        .bind(&attempt.message_text)
        .bind(outcome.now)
        .execute(&mut *tx)
        .await?;

        if success {
            sqlx::query(
                "UPDATE profiles SET
                    messages_sent_current_hour = CASE
                        WHEN hour_reset_time IS NULL OR hour_reset_time + 3600 <= $1 THEN 1
                        ELSE messages_sent_current_hour + 1 END,
                    hour_reset_time = CASE
                        WHEN hour_reset_time IS NULL OR hour_reset_time + 3600 <= $1 THEN $1
                        ELSE hour_reset_time END
                 WHERE id = $2",
            )
            .bind(outcome.now)
            .bind(&attempt.profile_id)
            .execute(&mut *tx)
            .await?;

            if let Some(text) = &attempt.message_text {
                sqlx::query(
                    "UPDATE messages SET usage_count = usage_count + 1 WHERE group_id = $1 AND text = $2",
                )
                .bind(&outcome.group_id)
                .bind(text)
                .execute(&mut *tx)
                .await?;
            }
        }

        sqlx::query(
            "INSERT INTO profile_daily_stats (profile_id, day, messages_sent, successful_sends, failed_sends)
             VALUES ($1, $2, $3, $3, $4)
             ON CONFLICT (profile_id, day) DO UPDATE SET
                messages_sent = profile_daily_stats.messages_sent + EXCLUDED.messages_sent,
                successful_sends = profile_daily_stats.successful_sends + EXCLUDED.successful_sends,
                failed_sends = profile_daily_stats.failed_sends + EXCLUDED.failed_sends",
        )
        .bind(&attempt.profile_id)
        .bind(day_key(outcome.now))
        .bind(success_inc)
        .bind(failed_inc)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(row)
    }

    async fn insert_targets(
        &self,
        group_id: &str,
        targets: &[String],
        total_cycles: i64,
        now: i64,
    ) -> std::result::Result<u64, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;
        for target in targets.iter().filter_map(|t| normalize_target(t)) {
            inserted += sqlx::query(
                "INSERT INTO tasks (group_id, target, status, total_cycles, created_at, updated_at)
                 VALUES ($1, $2, 'pending', $3, $4, $4)
                 ON CONFLICT (group_id, target) DO NOTHING",
            )
            .bind(group_id)
            .bind(&target)
            .bind(total_cycles)
            .bind(now)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        }
        tx.commit().await?;
        Ok(inserted)
    }

    async fn insert_messages(
        &self,
        group_id: &str,
        texts: &[String],
    ) -> std::result::Result<u64, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;
        for text in texts.iter().map(|t| t.trim()).filter(|t| !t.is_empty()) {
            inserted += sqlx::query(
                "INSERT INTO messages (group_id, text) VALUES ($1, $2)
                 ON CONFLICT (group_id, text) DO NOTHING",
            )
            .bind(group_id)
            .bind(text)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        }
        tx.commit().await?;
        Ok(inserted)
    }

    async fn insert_proxies(&self, urls: &[String]) -> std::result::Result<u64, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;
        for url in urls {
            inserted += sqlx::query(
                "INSERT INTO proxy_assignments (proxy_url) VALUES ($1)
                 ON CONFLICT (proxy_url) DO NOTHING",
            )
            .bind(url)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        }
        tx.commit().await?;
        Ok(inserted)
    }

    async fn swap_proxy(
        &self,
        proxy_url: &str,
        profile_id: &str,
        now: i64,
    ) -> std::result::Result<bool, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "UPDATE proxy_assignments SET profile_id = NULL, assigned_at = NULL
             WHERE profile_id = $1 AND proxy_url <> $2",
        )
        .bind(profile_id)
        .bind(proxy_url)
        .execute(&mut *tx)
        .await?;

        let claimed = sqlx::query(
            "UPDATE proxy_assignments SET profile_id = $1, assigned_at = $3
             WHERE proxy_url = $2
               AND (profile_id IS NULL OR profile_id = $1)
               AND is_healthy AND NOT is_blocked",
        )
        .bind(profile_id)
        .bind(proxy_url)
        .bind(now)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if claimed == 0 {
            tx.rollback().await?;
            return Ok(false);
        }
        tx.commit().await?;
        Ok(true)
    }
}

/// Drops credentials from a connection URL before it is logged.
fn redact(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(mut parsed) => {
            let _ = parsed.set_password(None);
            parsed.to_string()
        }
        Err(_) => "<invalid url>".to_string(),
    }
}

#[async_trait]
impl Store for PgStore {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    fn metrics(&self) -> DbMetricsSnapshot {
        self.metrics.snapshot()
    }

    async fn import_targets(
        &self,
        group_id: &str,
        targets: &[String],
        total_cycles: i64,
        now: i64,
    ) -> Result<u64> {
        let start = Instant::now();
        let result = self
            .insert_targets(group_id, targets, total_cycles.max(1), now)
            .await;
        self.metrics
            .track("import targets", QueryKind::Write, start, result)
    }

    async fn claim_task(&self, request: &ClaimRequest) -> Result<Option<Task>> {
        let start = Instant::now();
        let result = sqlx::query_as::<Postgres, TaskRow>(&format!(
            "UPDATE tasks
             SET status = 'in_progress', assigned_profile_id = $1, updated_at = $2
             WHERE id = (
                 SELECT t.id FROM tasks t
                 WHERE t.group_id = $3
                   AND t.status = 'pending'
                   AND NOT t.is_blocked
                   AND (t.next_available_at IS NULL OR t.next_available_at <= $2)
                   AND (
                       ($4::TEXT IS NULL AND t.completed_cycles < t.total_cycles)
                       OR ($4::TEXT IS NOT NULL AND (
                           SELECT COUNT(*) FROM task_attempts a
                           WHERE a.task_id = t.id AND a.run_id = $4 AND a.status = 'success'
                       ) < $5)
                   )
                 ORDER BY t.last_attempt_at ASC NULLS FIRST, t.completed_cycles ASC, t.id ASC
                 LIMIT 1
                 FOR UPDATE SKIP LOCKED
             )
             RETURNING {}",
            TASK_COLUMNS
        ))
        .bind(&request.profile_id)
        .bind(request.now)
        .bind(&request.group_id)
        .bind(&request.run_id)
        .bind(request.max_cycles)
        .fetch_optional(&self.pool)
        .await;

        self.metrics
            .track("claim task", QueryKind::Write, start, result)?
            .map(Task::try_from)
            .transpose()
    }

    async fn get_task(&self, task_id: i64) -> Result<Option<Task>> {
        let start = Instant::now();
        let result = sqlx::query_as::<Postgres, TaskRow>(&format!(
            "SELECT {} FROM tasks WHERE id = $1",
            TASK_COLUMNS
        ))
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await;

        self.metrics
            .track("get task", QueryKind::Select, start, result)?
            .map(Task::try_from)
            .transpose()
    }

    async fn count_attempts(
        &self,
        task_id: i64,
        run_id: &str,
        status: Option<AttemptStatus>,
    ) -> Result<i64> {
        let start = Instant::now();
        let result = sqlx::query_scalar::<Postgres, i64>(
            "SELECT COUNT(*) FROM task_attempts
             WHERE task_id = $1 AND run_id = $2 AND ($3::TEXT IS NULL OR status = $3)",
        )
        .bind(task_id)
        .bind(run_id)
        .bind(status.map(|s| s.as_str()))
        .fetch_one(&self.pool)
        .await;

        self.metrics
            .track("count attempts", QueryKind::Select, start, result)
    }

    async fn list_attempts(&self, task_id: i64) -> Result<Vec<Attempt>> {
        let start = Instant::now();
        let result = sqlx::query_as::<Postgres, AttemptRow>(&format!(
            "SELECT {} FROM task_attempts WHERE task_id = $1 ORDER BY id",
            ATTEMPT_COLUMNS
        ))
        .bind(task_id)
        .fetch_all(&self.pool)
        .await;

        self.metrics
            .track("list attempts", QueryKind::Select, start, result)?
            .into_iter()
            .map(Attempt::try_from)
            .collect()
    }

    async fn record_attempt(&self, outcome: &AttemptOutcome) -> Result<Task> {
        let start = Instant::now();
        let result = self.apply_outcome(outcome).await;
        let row = self
            .metrics
            .track("record attempt", QueryKind::Write, start, result)?
            .ok_or_else(|| QueueError::NotHeld {
                task_id: outcome.attempt.task_id,
                profile_id: outcome.attempt.profile_id.clone(),
            })?;
        Task::try_from(row)
    }

    async fn reschedule_task(
        &self,
        task_id: i64,
        profile_id: &str,
        next_available_at: i64,
        now: i64,
    ) -> Result<bool> {
        let start = Instant::now();
        let result = sqlx::query(
            "UPDATE tasks
             SET status = 'pending', assigned_profile_id = NULL, next_available_at = $1, updated_at = $2
             WHERE id = $3 AND status = 'in_progress' AND assigned_profile_id = $4",
        )
        .bind(next_available_at)
        .bind(now)
        .bind(task_id)
        .bind(profile_id)
        .execute(&self.pool)
        .await;

        let done = self
            .metrics
            .track("reschedule task", QueryKind::Write, start, result)?;
        Ok(done.rows_affected() > 0)
    }

    async fn release_task(&self, task_id: i64, profile_id: &str, now: i64) -> Result<bool> {
        let start = Instant::now();
        let result = sqlx::query(
            "UPDATE tasks
             SET status = 'pending', assigned_profile_id = NULL, updated_at = $1
             WHERE id = $2 AND status = 'in_progress' AND assigned_profile_id = $3",
        )
        .bind(now)
        .bind(task_id)
        .bind(profile_id)
        .execute(&self.pool)
        .await;

        let done = self
            .metrics
            .track("release task", QueryKind::Write, start, result)?;
        Ok(done.rows_affected() > 0)
    }

    async fn reclaim_stale(&self, cutoff: i64, group_id: Option<&str>, now: i64) -> Result<u64> {
        let start = Instant::now();
        let result = sqlx::query(
            "UPDATE tasks
             SET status = 'pending', assigned_profile_id = NULL, updated_at = $1
             WHERE status = 'in_progress' AND updated_at < $2
               AND ($3::TEXT IS NULL OR group_id = $3)",
        )
        .bind(now)
        .bind(cutoff)
        .bind(group_id)
        .execute(&self.pool)
        .await;

        let done = self
            .metrics
            .track("reclaim stale tasks", QueryKind::Write, start, result)?;
        Ok(done.rows_affected())
    }

    async fn unblock_tasks(&self, block_reason: &str, now: i64) -> Result<u64> {
        let start = Instant::now();
        let result = sqlx::query(
            "UPDATE tasks
             SET is_blocked = FALSE, status = 'pending', block_reason = NULL, next_available_at = NULL,
                 completed_cycles = LEAST(completed_cycles, total_cycles - 1), updated_at = $1
             WHERE is_blocked AND block_reason = $2",
        )
        .bind(now)
        .bind(block_reason)
        .execute(&self.pool)
        .await;

        let done = self
            .metrics
            .track("unblock tasks", QueryKind::Write, start, result)?;
        Ok(done.rows_affected())
    }

    async fn queue_stats(&self, group_id: Option<&str>) -> Result<QueueStats> {
        let start = Instant::now();
        let result = sqlx::query_as::<Postgres, QueueStatsRow>(
            "SELECT
                COUNT(*) AS total,
                COUNT(*) FILTER (WHERE status = 'pending') AS pending,
                COUNT(*) FILTER (WHERE status = 'in_progress') AS in_progress,
                COUNT(*) FILTER (WHERE status = 'completed') AS completed,
                COUNT(*) FILTER (WHERE status = 'blocked') AS blocked,
                COALESCE(SUM(success_count), 0)::BIGINT AS total_success,
                COALESCE(SUM(failed_count), 0)::BIGINT AS total_failed
             FROM tasks WHERE ($1::TEXT IS NULL OR group_id = $1)",
        )
        .bind(group_id)
        .fetch_one(&self.pool)
        .await;

        Ok(self
            .metrics
            .track("load queue stats", QueryKind::Select, start, result)?
            .into())
    }

    async fn import_messages(&self, group_id: &str, texts: &[String]) -> Result<u64> {
        let start = Instant::now();
        let result = self.insert_messages(group_id, texts).await;
        self.metrics
            .track("import messages", QueryKind::Write, start, result)
    }

    async fn active_messages(&self, group_id: &str) -> Result<Vec<String>> {
        let start = Instant::now();
        let result = sqlx::query_scalar::<Postgres, String>(
            "SELECT text FROM messages WHERE group_id = $1 AND is_active ORDER BY id",
        )
        .bind(group_id)
        .fetch_all(&self.pool)
        .await;

        self.metrics
            .track("load messages", QueryKind::Select, start, result)
    }

    async fn upsert_profile(&self, profile_id: &str, name: &str, now: i64) -> Result<()> {
        let start = Instant::now();
        let result = sqlx::query(
            "INSERT INTO profiles (id, name, created_at) VALUES ($1, $2, $3)
             ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name",
        )
        .bind(profile_id)
        .bind(name)
        .bind(now)
        .execute(&self.pool)
        .await;

        self.metrics
            .track("upsert profile", QueryKind::Write, start, result)?;
        Ok(())
    }

    async fn get_profile(&self, profile_id: &str) -> Result<Option<Profile>> {
        let start = Instant::now();
        let result = sqlx::query_as::<Postgres, ProfileRow>(&format!(
            "SELECT {} FROM profiles WHERE id = $1",
            PROFILE_COLUMNS
        ))
        .bind(profile_id)
        .fetch_optional(&self.pool)
        .await;

        Ok(self
            .metrics
            .track("get profile", QueryKind::Select, start, result)?
            .map(Profile::from))
    }

    async fn active_profiles(&self) -> Result<Vec<Profile>> {
        let start = Instant::now();
        let result = sqlx::query_as::<Postgres, ProfileRow>(&format!(
            "SELECT {} FROM profiles
             WHERE is_active AND NOT is_blocked AND NOT is_logged_out
             ORDER BY id",
            PROFILE_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await;

        Ok(self
            .metrics
            .track("list active profiles", QueryKind::Select, start, result)?
            .into_iter()
            .map(Profile::from)
            .collect())
    }

    async fn block_profile(&self, profile_id: &str) -> Result<()> {
        let start = Instant::now();
        let result =
            sqlx::query("UPDATE profiles SET is_blocked = TRUE, is_active = FALSE WHERE id = $1")
                .bind(profile_id)
                .execute(&self.pool)
                .await;

        self.metrics
            .track("block profile", QueryKind::Write, start, result)?;
        Ok(())
    }

    async fn mark_profile_logged_out(&self, profile_id: &str) -> Result<()> {
        let start = Instant::now();
        let result = sqlx::query(
            "UPDATE profiles SET is_logged_out = TRUE, is_active = FALSE WHERE id = $1",
        )
        .bind(profile_id)
        .execute(&self.pool)
        .await;

        self.metrics
            .track("mark profile logged out", QueryKind::Write, start, result)?;
        Ok(())
    }

    async fn daily_stats(&self, profile_id: &str, day: &str) -> Result<Option<DailyStats>> {
        let start = Instant::now();
        let result = sqlx::query_as::<Postgres, DailyStatsRow>(
            "SELECT profile_id, day, messages_sent, successful_sends, failed_sends
             FROM profile_daily_stats WHERE profile_id = $1 AND day = $2",
        )
        .bind(profile_id)
        .bind(day)
        .fetch_optional(&self.pool)
        .await;

        Ok(self
            .metrics
            .track("load daily stats", QueryKind::Select, start, result)?
            .map(DailyStats::from))
    }

    async fn sync_proxies(&self, urls: &[String]) -> Result<u64> {
        let start = Instant::now();
        let result = self.insert_proxies(urls).await;
        self.metrics
            .track("sync proxies", QueryKind::Write, start, result)
    }

    async fn list_proxies(&self) -> Result<Vec<ProxyAssignment>> {
        let start = Instant::now();
        let result = sqlx::query_as::<Postgres, ProxyRow>(&format!(
            "SELECT {} FROM proxy_assignments ORDER BY proxy_url",
            PROXY_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await;

        Ok(self
            .metrics
            .track("list proxies", QueryKind::Select, start, result)?
            .into_iter()
            .map(ProxyAssignment::from)
            .collect())
    }

    async fn proxy_for_profile(&self, profile_id: &str) -> Result<Option<ProxyAssignment>> {
        let start = Instant::now();
        let result = sqlx::query_as::<Postgres, ProxyRow>(&format!(
            "SELECT {} FROM proxy_assignments WHERE profile_id = $1",
            PROXY_COLUMNS
        ))
        .bind(profile_id)
        .fetch_optional(&self.pool)
        .await;

        Ok(self
            .metrics
            .track("load profile proxy", QueryKind::Select, start, result)?
            .map(ProxyAssignment::from))
    }

    async fn available_proxies(&self) -> Result<Vec<String>> {
        let start = Instant::now();
        let result = sqlx::query_scalar::<Postgres, String>(
            "SELECT proxy_url FROM proxy_assignments
             WHERE is_healthy AND NOT is_blocked AND profile_id IS NULL
             ORDER BY proxy_url",
        )
        .fetch_all(&self.pool)
        .await;

        self.metrics
            .track("list available proxies", QueryKind::Select, start, result)
    }

    async fn assign_proxy(&self, proxy_url: &str, profile_id: &str, now: i64) -> Result<bool> {
        let start = Instant::now();
        let result = self.swap_proxy(proxy_url, profile_id, now).await;
        self.metrics
            .track("assign proxy", QueryKind::Write, start, result)
    }

    async fn mark_proxy_unhealthy(&self, proxy_url: &str, now: i64) -> Result<()> {
        let start = Instant::now();
        let result = sqlx::query(
            "UPDATE proxy_assignments SET is_healthy = FALSE, last_rotation_at = $1
             WHERE proxy_url = $2",
        )
        .bind(now)
        .bind(proxy_url)
        .execute(&self.pool)
        .await;

        self.metrics
            .track("mark proxy unhealthy", QueryKind::Write, start, result)?;
        Ok(())
    }

    async fn mark_proxy_blocked(&self, proxy_url: &str) -> Result<()> {
        let start = Instant::now();
        let result = sqlx::query(
            "UPDATE proxy_assignments SET is_blocked = TRUE, profile_id = NULL, assigned_at = NULL
             WHERE proxy_url = $1",
        )
        .bind(proxy_url)
        .execute(&self.pool)
        .await;

        self.metrics
            .track("mark proxy blocked", QueryKind::Write, start, result)?;
        Ok(())
    }

    async fn reset_unhealthy_proxies(&self, cutoff: i64) -> Result<u64> {
        let start = Instant::now();
        let result = sqlx::query(
            "UPDATE proxy_assignments SET is_healthy = TRUE
             WHERE NOT is_healthy AND (last_rotation_at IS NULL OR last_rotation_at < $1)",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await;

        let done = self
            .metrics
            .track("reset unhealthy proxies", QueryKind::Write, start, result)?;
        Ok(done.rows_affected())
    }

    async fn record_proxy_attempt(
        &self,
        proxy_url: &str,
        profile_id: &str,
        outcome: ProxyOutcome,
        now: i64,
    ) -> Result<()> {
        let (success, not_found, other) = match outcome {
            ProxyOutcome::Success => (1i64, 0i64, 0i64),
            ProxyOutcome::ChatNotFound => (0, 1, 0),
            ProxyOutcome::OtherError => (0, 0, 1),
        };
        let start = Instant::now();
        let result = sqlx::query(
            "INSERT INTO proxy_stats
                (proxy_url, profile_id, total_attempts, successful_sends, chat_not_found, other_errors, updated_at)
             VALUES ($1, $2, 1, $3, $4, $5, $6)
             ON CONFLICT (proxy_url, profile_id) DO UPDATE SET
                total_attempts = proxy_stats.total_attempts + 1,
                successful_sends = proxy_stats.successful_sends + EXCLUDED.successful_sends,
                chat_not_found = proxy_stats.chat_not_found + EXCLUDED.chat_not_found,
                other_errors = proxy_stats.other_errors + EXCLUDED.other_errors,
                updated_at = EXCLUDED.updated_at",
        )
        .bind(proxy_url)
        .bind(profile_id)
        .bind(success)
        .bind(not_found)
        .bind(other)
        .bind(now)
        .execute(&self.pool)
        .await;

        self.metrics
            .track("record proxy attempt", QueryKind::Write, start, result)?;
        Ok(())
    }

    async fn proxy_stats(&self, proxy_url: &str, profile_id: &str) -> Result<Option<ProxyStats>> {
        let start = Instant::now();
        let result = sqlx::query_as::<Postgres, ProxyStatsRow>(&format!(
            "SELECT {} FROM proxy_stats WHERE proxy_url = $1 AND profile_id = $2",
            PROXY_STATS_COLUMNS
        ))
        .bind(proxy_url)
        .bind(profile_id)
        .fetch_optional(&self.pool)
        .await;

        Ok(self
            .metrics
            .track("load proxy stats", QueryKind::Select, start, result)?
            .map(ProxyStats::from))
    }

    async fn clear_proxy_stats(&self, proxy_url: &str, profile_id: &str) -> Result<()> {
        let start = Instant::now();
        let result =
            sqlx::query("DELETE FROM proxy_stats WHERE proxy_url = $1 AND profile_id = $2")
                .bind(proxy_url)
                .bind(profile_id)
                .execute(&self.pool)
                .await;

        self.metrics
            .track("clear proxy stats", QueryKind::Write, start, result)?;
        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
        info!("Database pool closed.");
    }
}
