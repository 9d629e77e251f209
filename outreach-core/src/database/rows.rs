//! Raw rows shared by the backends; string enums are parsed on conversion.

use anyhow::{anyhow, Result};

use crate::models::{
    Attempt, AttemptStatus, DailyStats, Profile, ProxyAssignment, ProxyStats, Task, TaskStatus,
};

pub(crate) const TASK_COLUMNS: &str = "id, group_id, target, status, is_blocked, block_reason, \
     completed_cycles, total_cycles, success_count, failed_count, next_available_at, \
     last_attempt_at, assigned_profile_id, created_at, updated_at";

pub(crate) const ATTEMPT_COLUMNS: &str = "id, task_id, profile_id, run_id, cycle_number, status, \
     error_type, error_message, message_text, created_at";

pub(crate) const PROFILE_COLUMNS: &str = "id, name, is_active, is_blocked, is_logged_out, \
     messages_sent_current_hour, hour_reset_time, created_at";

pub(crate) const PROXY_COLUMNS: &str =
    "proxy_url, profile_id, is_healthy, is_blocked, assigned_at, last_rotation_at";

pub(crate) const PROXY_STATS_COLUMNS: &str =
    "proxy_url, profile_id, total_attempts, successful_sends, chat_not_found, other_errors";

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct TaskRow {
    pub id: i64,
    pub group_id: String,
    pub target: String,
    pub status: String,
    pub is_blocked: bool,
    pub block_reason: Option<String>,
    pub completed_cycles: i64,
    pub total_cycles: i64,
    pub success_count: i64,
    pub failed_count: i64,
    pub next_available_at: Option<i64>,
    pub last_attempt_at: Option<i64>,
    pub assigned_profile_id: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl TryFrom<TaskRow> for Task {
    type Error = anyhow::Error;

    fn try_from(row: TaskRow) -> Result<Self> {
        let status = row.status.parse::<TaskStatus>().map_err(|e| anyhow!(e))?;
        Ok(Task {
            id: row.id,
            group_id: row.group_id,
            target: row.target,
            status,
            is_blocked: row.is_blocked,
            block_reason: row.block_reason,
            completed_cycles: row.completed_cycles,
            total_cycles: row.total_cycles,
            success_count: row.success_count,
            failed_count: row.failed_count,
            next_available_at: row.next_available_at,
            last_attempt_at: row.last_attempt_at,
            assigned_profile_id: row.assigned_profile_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct AttemptRow {
    pub id: i64,
    pub task_id: i64,
    pub profile_id: String,
    pub run_id: Option<String>,
    pub cycle_number: i64,
    pub status: String,
    pub error_type: Option<String>,
    pub error_message: Option<String>,
    pub message_text: Option<String>,
    pub created_at: i64,
}

impl TryFrom<AttemptRow> for Attempt {
    type Error = anyhow::Error;

    fn try_from(row: AttemptRow) -> Result<Self> {
        let status = match row.status.as_str() {
            "success" => AttemptStatus::Success,
            "failed" => AttemptStatus::Failed,
            other => return Err(anyhow!("unknown attempt status '{}'", other)),
        };
        Ok(Attempt {
            id: row.id,
            task_id: row.task_id,
            profile_id: row.profile_id,
            run_id: row.run_id,
            cycle_number: row.cycle_number,
            status,
            error_type: row.error_type,
            error_message: row.error_message,
            message_text: row.message_text,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ProfileRow {
    pub id: String,
    pub name: String,
    pub is_active: bool,
    pub is_blocked: bool,
    pub is_logged_out: bool,
    pub messages_sent_current_hour: i64,
    pub hour_reset_time: Option<i64>,
    pub created_at: i64,
}

impl From<ProfileRow> for Profile {
    fn from(row: ProfileRow) -> Self {
        Profile {
            id: row.id,
            name: row.name,
            is_active: row.is_active,
            is_blocked: row.is_blocked,
            is_logged_out: row.is_logged_out,
            messages_sent_current_hour: row.messages_sent_current_hour,
            hour_reset_time: row.hour_reset_time,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ProxyRow {
    pub proxy_url: String,
    pub profile_id: Option<String>,
    pub is_healthy: bool,
    pub is_blocked: bool,
    pub assigned_at: Option<i64>,
    pub last_rotation_at: Option<i64>,
}

impl From<ProxyRow> for ProxyAssignment {
    fn from(row: ProxyRow) -> Self {
        ProxyAssignment {
            proxy_url: row.proxy_url,
            profile_id: row.profile_id,
            is_healthy: row.is_healthy,
            is_blocked: row.is_blocked,
            assigned_at: row.assigned_at,
            last_rotation_at: row.last_rotation_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ProxyStatsRow {
    pub proxy_url: String,
    pub profile_id: String,
    pub total_attempts: i64,
    pub successful_sends: i64,
    pub chat_not_found: i64,
    pub other_errors: i64,
}

impl From<ProxyStatsRow> for ProxyStats {
    fn from(row: ProxyStatsRow) -> Self {
        ProxyStats {
            proxy_url: row.proxy_url,
            profile_id: row.profile_id,
            total_attempts: row.total_attempts,
            successful_sends: row.successful_sends,
            chat_not_found: row.chat_not_found,
            other_errors: row.other_errors,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct DailyStatsRow {
    pub profile_id: String,
    pub day: String,
    pub messages_sent: i64,
    pub successful_sends: i64,
    pub failed_sends: i64,
}

impl From<DailyStatsRow> for DailyStats {
    fn from(row: DailyStatsRow) -> Self {
        DailyStats {
            profile_id: row.profile_id,
            day: row.day,
            messages_sent: row.messages_sent,
            successful_sends: row.successful_sends,
            failed_sends: row.failed_sends,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct QueueStatsRow {
    pub total: i64,
    pub pending: i64,
    pub in_progress: i64,
    pub completed: i64,
    pub blocked: i64,
    pub total_success: i64,
    pub total_failed: i64,
}

impl From<QueueStatsRow> for crate::models::QueueStats {
    fn from(row: QueueStatsRow) -> Self {
        crate::models::QueueStats {
            total: row.total,
            pending: row.pending,
            in_progress: row.in_progress,
            completed: row.completed,
            blocked: row.blocked,
            total_success: row.total_success,
            total_failed: row.total_failed,
        }
    }
}

/// Column values a transition writes onto the task row.
pub(crate) struct TransitionColumns {
    pub status: &'static str,
    pub is_blocked: bool,
    pub block_reason: Option<String>,
    pub next_available_at: Option<i64>,
}

impl From<&crate::models::TaskTransition> for TransitionColumns {
    fn from(transition: &crate::models::TaskTransition) -> Self {
        use crate::models::TaskTransition;
        match transition {
            TaskTransition::Complete => TransitionColumns {
                status: TaskStatus::Completed.as_str(),
                is_blocked: false,
                block_reason: None,
                next_available_at: None,
            },
            TaskTransition::Reschedule { next_available_at } => TransitionColumns {
                status: TaskStatus::Pending.as_str(),
                is_blocked: false,
                block_reason: None,
                next_available_at: Some(*next_available_at),
            },
            TaskTransition::Block { reason } => TransitionColumns {
                status: TaskStatus::Blocked.as_str(),
                is_blocked: true,
                block_reason: Some(reason.clone()),
                next_available_at: None,
            },
        }
    }
}
