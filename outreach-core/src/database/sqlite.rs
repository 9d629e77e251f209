use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Sqlite;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

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

/// SQLite backend. Writers serialize on the database lock, which makes the
/// single-statement claim exclusive across every connection and process.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    metrics: Arc<DbMetrics>,
}

impl SqliteStore {
    pub const DEFAULT_MAX_CONNECTIONS: u32 = 20;
    pub const DEFAULT_TIMEOUT_MS: u64 = 30000;
    pub const BUSY_TIMEOUT_MS: u64 = 5000;

    pub async fn open(db_path: &str, max_connections: u32) -> Result<Self> {
        if !Path::new(db_path).exists() {
            if let Some(parent) = Path::new(db_path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)
                        .with_context(|| format!("Failed to create {}", parent.display()))?;
                }
            }
            std::fs::File::create(db_path).map_err(|e| DatabaseError::ConnectionFailed {
                url: db_path.to_string(),
                msg: e.to_string(),
            })?;
            info!("Created new database file: {}", db_path);
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .acquire_timeout(Duration::from_millis(Self::DEFAULT_TIMEOUT_MS))
            .after_connect(|conn, _meta| {
                Box::pin(async move {
                    sqlx::query("PRAGMA journal_mode=WAL;")
                        .execute(&mut *conn)
                        .await?;
                    sqlx::query("PRAGMA synchronous=NORMAL;")
                        .execute(&mut *conn)
                        .await?;
                    sqlx::query(&format!("PRAGMA busy_timeout={};", Self::BUSY_TIMEOUT_MS))
                        .execute(&mut *conn)
                        .await?;
                    Ok(())
                })
            })
            .connect(&format!("sqlite://{}", db_path))
            .await
            .map_err(|e| DatabaseError::ConnectionFailed {
                url: db_path.to_string(),
                msg: e.to_string(),
            })?;

        let store = Self {
            pool,
            metrics: Arc::new(DbMetrics::default()),
        };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS profiles (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 1,
                is_blocked INTEGER NOT NULL DEFAULT 0,
                is_logged_out INTEGER NOT NULL DEFAULT 0,
                messages_sent_current_hour INTEGER NOT NULL DEFAULT 0,
                hour_reset_time INTEGER,
                created_at INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS tasks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                group_id TEXT NOT NULL,
                target TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                is_blocked INTEGER NOT NULL DEFAULT 0,
                block_reason TEXT,
                completed_cycles INTEGER NOT NULL DEFAULT 0,
                total_cycles INTEGER NOT NULL DEFAULT 1,
                success_count INTEGER NOT NULL DEFAULT 0,
                failed_count INTEGER NOT NULL DEFAULT 0,
                next_available_at INTEGER,
                last_attempt_at INTEGER,
                assigned_profile_id TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                UNIQUE (group_id, target),
                CHECK (completed_cycles <= total_cycles)
            );
            CREATE TABLE IF NOT EXISTS task_attempts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                task_id INTEGER NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
                profile_id TEXT NOT NULL,
                run_id TEXT,
                cycle_number INTEGER NOT NULL,
                status TEXT NOT NULL,
                error_type TEXT,
                error_message TEXT,
                message_text TEXT,
                created_at INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                group_id TEXT NOT NULL,
                text TEXT NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 1,
                usage_count INTEGER NOT NULL DEFAULT 0,
                UNIQUE (group_id, text)
            );
            CREATE TABLE IF NOT EXISTS profile_daily_stats (
                profile_id TEXT NOT NULL,
                day TEXT NOT NULL,
                messages_sent INTEGER NOT NULL DEFAULT 0,
                successful_sends INTEGER NOT NULL DEFAULT 0,
                failed_sends INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (profile_id, day)
            );
            CREATE TABLE IF NOT EXISTS proxy_assignments (
                proxy_url TEXT PRIMARY KEY,
                profile_id TEXT,
                is_healthy INTEGER NOT NULL DEFAULT 1,
                is_blocked INTEGER NOT NULL DEFAULT 0,
                assigned_at INTEGER,
                last_rotation_at INTEGER
            );
            CREATE TABLE IF NOT EXISTS proxy_stats (
                proxy_url TEXT NOT NULL,
                profile_id TEXT NOT NULL,
                total_attempts INTEGER NOT NULL DEFAULT 0,
                successful_sends INTEGER NOT NULL DEFAULT 0,
                chat_not_found INTEGER NOT NULL DEFAULT 0,
                other_errors INTEGER NOT NULL DEFAULT 0,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (proxy_url, profile_id)
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| DatabaseError::MigrationFailed { msg: e.to_string() })?;

        self.create_indexes().await;

        info!("Database schema initialized with indexes.");
        Ok(())
    }

    async fn create_indexes(&self) {
        let indexes = [
            "CREATE INDEX IF NOT EXISTS idx_tasks_claim ON tasks(group_id, status, is_blocked, next_available_at);",
            "CREATE INDEX IF NOT EXISTS idx_tasks_block_reason ON tasks(block_reason);",
            "CREATE INDEX IF NOT EXISTS idx_attempts_task_run ON task_attempts(task_id, run_id, status);",
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_proxy_profile ON proxy_assignments(profile_id) WHERE profile_id IS NOT NULL;",
        ];

        for idx_sql in indexes {
            if let Err(e) = sqlx::query(idx_sql).execute(&self.pool).await {
                debug!("Index creation skipped (may exist): {}", e);
            }
        }
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
                success_count = success_count + ?1,
                failed_count = failed_count + ?2,
                completed_cycles = MIN(completed_cycles + 1, total_cycles),
                status = ?3,
                is_blocked = ?4,
                block_reason = ?5,
                next_available_at = ?6,
                assigned_profile_id = NULL,
                last_attempt_at = ?7,
                updated_at = ?7
             WHERE id = ?8 AND status = 'in_progress' AND assigned_profile_id = ?9
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
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
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
                        WHEN hour_reset_time IS NULL OR hour_reset_time + 3600 <= ?1 THEN 1
                        ELSE messages_sent_current_hour + 1 END,
                    hour_reset_time = CASE
                        WHEN hour_reset_time IS NULL OR hour_reset_time + 3600 <= ?1 THEN ?1
                        ELSE hour_reset_time END
                 WHERE id = ?2",
            )
            .bind(outcome.now)
            .bind(&attempt.profile_id)
            .execute(&mut *tx)
            .await?;

            if let Some(text) = &attempt.message_text {
                sqlx::query(
                    "UPDATE messages SET usage_count = usage_count + 1 WHERE group_id = ? AND text = ?",
                )
                .bind(&outcome.group_id)
                .bind(text)
                .execute(&mut *tx)
                .await?;
            }
        }

        sqlx::query(
            "INSERT INTO profile_daily_stats (profile_id, day, messages_sent, successful_sends, failed_sends)
             VALUES (?1, ?2, ?3, ?3, ?4)
             ON CONFLICT(profile_id, day) DO UPDATE SET
                messages_sent = messages_sent + excluded.messages_sent,
                successful_sends = successful_sends + excluded.successful_sends,
                failed_sends = failed_sends + excluded.failed_sends",
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
            let result = sqlx::query(
                "INSERT INTO tasks (group_id, target, status, total_cycles, created_at, updated_at)
                 VALUES (?1, ?2, 'pending', ?3, ?4, ?4)
                 ON CONFLICT(group_id, target) DO NOTHING",
            )
            .bind(group_id)
            .bind(&target)
            .bind(total_cycles)
            .bind(now)
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected();
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
            let result = sqlx::query(
                "INSERT INTO messages (group_id, text) VALUES (?, ?)
                 ON CONFLICT(group_id, text) DO NOTHING",
            )
            .bind(group_id)
            .bind(text)
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected();
        }
        tx.commit().await?;
        Ok(inserted)
    }

    async fn insert_proxies(&self, urls: &[String]) -> std::result::Result<u64, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;
        for url in urls {
            let result = sqlx::query(
                "INSERT INTO proxy_assignments (proxy_url) VALUES (?)
                 ON CONFLICT(proxy_url) DO NOTHING",
            )
            .bind(url)
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected();
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
             WHERE profile_id = ?1 AND proxy_url <> ?2",
        )
        .bind(profile_id)
        .bind(proxy_url)
        .execute(&mut *tx)
        .await?;

        let claimed = sqlx::query(
            "UPDATE proxy_assignments SET profile_id = ?1, assigned_at = ?3
             WHERE proxy_url = ?2
               AND (profile_id IS NULL OR profile_id = ?1)
               AND is_healthy = 1 AND is_blocked = 0",
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

#[async_trait]
impl Store for SqliteStore {
    fn backend(&self) -> &'static str {
        "sqlite"
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
        let result = sqlx::query_as::<Sqlite, TaskRow>(&format!(
            "UPDATE tasks
             SET status = 'in_progress', assigned_profile_id = ?1, updated_at = ?2
             WHERE id = (
                 SELECT t.id FROM tasks t
                 WHERE t.group_id = ?3
                   AND t.status = 'pending'
                   AND t.is_blocked = 0
                   AND (t.next_available_at IS NULL OR t.next_available_at <= ?2)
                   AND (
                       (?4 IS NULL AND t.completed_cycles < t.total_cycles)
                       OR (?4 IS NOT NULL AND (
                           SELECT COUNT(*) FROM task_attempts a
                           WHERE a.task_id = t.id AND a.run_id = ?4 AND a.status = 'success'
                       ) < ?5)
                   )
                 ORDER BY t.last_attempt_at IS NOT NULL, t.last_attempt_at, t.completed_cycles, t.id
                 LIMIT 1
             )
             AND status = 'pending'
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
        let result = sqlx::query_as::<Sqlite, TaskRow>(&format!(
            "SELECT {} FROM tasks WHERE id = ?",
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
        let result = sqlx::query_scalar::<Sqlite, i64>(
            "SELECT COUNT(*) FROM task_attempts
             WHERE task_id = ?1 AND run_id = ?2 AND (?3 IS NULL OR status = ?3)",
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
        let result = sqlx::query_as::<Sqlite, AttemptRow>(&format!(
            "SELECT {} FROM task_attempts WHERE task_id = ? ORDER BY id",
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
             SET status = 'pending', assigned_profile_id = NULL, next_available_at = ?, updated_at = ?
             WHERE id = ? AND status = 'in_progress' AND assigned_profile_id = ?",
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
             SET status = 'pending', assigned_profile_id = NULL, updated_at = ?
             WHERE id = ? AND status = 'in_progress' AND assigned_profile_id = ?",
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
             SET status = 'pending', assigned_profile_id = NULL, updated_at = ?1
             WHERE status = 'in_progress' AND updated_at < ?2 AND (?3 IS NULL OR group_id = ?3)",
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
             SET is_blocked = 0, status = 'pending', block_reason = NULL, next_available_at = NULL,
                 completed_cycles = MIN(completed_cycles, total_cycles - 1), updated_at = ?
             WHERE is_blocked = 1 AND block_reason = ?",
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
        let result = sqlx::query_as::<Sqlite, QueueStatsRow>(
            "SELECT
                COUNT(*) AS total,
                COALESCE(SUM(CASE WHEN status = 'pending' THEN 1 ELSE 0 END), 0) AS pending,
                COALESCE(SUM(CASE WHEN status = 'in_progress' THEN 1 ELSE 0 END), 0) AS in_progress,
                COALESCE(SUM(CASE WHEN status = 'completed' THEN 1 ELSE 0 END), 0) AS completed,
                COALESCE(SUM(CASE WHEN status = 'blocked' THEN 1 ELSE 0 END), 0) AS blocked,
                COALESCE(SUM(success_count), 0) AS total_success,
                COALESCE(SUM(failed_count), 0) AS total_failed
             FROM tasks WHERE (?1 IS NULL OR group_id = ?1)",
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
        let result = sqlx::query_scalar::<Sqlite, String>(
            "SELECT text FROM messages WHERE group_id = ? AND is_active = 1 ORDER BY id",
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
            "INSERT INTO profiles (id, name, created_at) VALUES (?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET name = excluded.name",
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
        let result = sqlx::query_as::<Sqlite, ProfileRow>(&format!(
            "SELECT {} FROM profiles WHERE id = ?",
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
        let result = sqlx::query_as::<Sqlite, ProfileRow>(&format!(
            "SELECT {} FROM profiles
             WHERE is_active = 1 AND is_blocked = 0 AND is_logged_out = 0
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
        let result = sqlx::query("UPDATE profiles SET is_blocked = 1, is_active = 0 WHERE id = ?")
            .bind(profile_id)
            .execute(&self.pool)
            .await;

        self.metrics
            .track("block profile", QueryKind::Write, start, result)?;
        Ok(())
    }

    async fn mark_profile_logged_out(&self, profile_id: &str) -> Result<()> {
        let start = Instant::now();
        let result =
            sqlx::query("UPDATE profiles SET is_logged_out = 1, is_active = 0 WHERE id = ?")
                .bind(profile_id)
                .execute(&self.pool)
                .await;

        self.metrics
            .track("mark profile logged out", QueryKind::Write, start, result)?;
        Ok(())
    }

    async fn daily_stats(&self, profile_id: &str, day: &str) -> Result<Option<DailyStats>> {
        let start = Instant::now();
        let result = sqlx::query_as::<Sqlite, DailyStatsRow>(
            "SELECT profile_id, day, messages_sent, successful_sends, failed_sends
             FROM profile_daily_stats WHERE profile_id = ? AND day = ?",
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
        let result = sqlx::query_as::<Sqlite, ProxyRow>(&format!(
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
        let result = sqlx::query_as::<Sqlite, ProxyRow>(&format!(
            "SELECT {} FROM proxy_assignments WHERE profile_id = ?",
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
        let result = sqlx::query_scalar::<Sqlite, String>(
            "SELECT proxy_url FROM proxy_assignments
             WHERE is_healthy = 1 AND is_blocked = 0 AND profile_id IS NULL
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
            "UPDATE proxy_assignments SET is_healthy = 0, last_rotation_at = ? WHERE proxy_url = ?",
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
            "UPDATE proxy_assignments SET is_blocked = 1, profile_id = NULL, assigned_at = NULL
             WHERE proxy_url = ?",
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
            "UPDATE proxy_assignments SET is_healthy = 1
             WHERE is_healthy = 0 AND (last_rotation_at IS NULL OR last_rotation_at < ?)",
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
             VALUES (?, ?, 1, ?, ?, ?, ?)
             ON CONFLICT(proxy_url, profile_id) DO UPDATE SET
                total_attempts = total_attempts + 1,
                successful_sends = successful_sends + excluded.successful_sends,
                chat_not_found = chat_not_found + excluded.chat_not_found,
                other_errors = other_errors + excluded.other_errors,
                updated_at = excluded.updated_at",
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
        let result = sqlx::query_as::<Sqlite, ProxyStatsRow>(&format!(
            "SELECT {} FROM proxy_stats WHERE proxy_url = ? AND profile_id = ?",
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
        let result = sqlx::query("DELETE FROM proxy_stats WHERE proxy_url = ? AND profile_id = ?")
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
