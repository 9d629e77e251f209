//! # Domain Models
//!
//! Plain data types shared by the queue, the proxy pool and the store
//! backends. Timestamps are Unix seconds (UTC).

use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Length of the rolling send-cap window.
pub const HOUR_SECS: i64 = 3600;

/// Block reason used when a target cannot be resolved.
pub const CHAT_NOT_FOUND: &str = "chat_not_found";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Blocked,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Blocked => "blocked",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "in_progress" => Ok(TaskStatus::InProgress),
            "completed" => Ok(TaskStatus::Completed),
            "blocked" => Ok(TaskStatus::Blocked),
            other => Err(format!("unknown task status '{}'", other)),
        }
    }
}

/// A target to contact, owned by one group.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Task {
    pub id: i64,
    pub group_id: String,
    pub target: String,
    pub status: TaskStatus,
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

impl Task {
    pub fn cycles_exhausted(&self) -> bool {
        self.completed_cycles >= self.total_cycles
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    Success,
    Failed,
}

impl AttemptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptStatus::Success => "success",
            AttemptStatus::Failed => "failed",
        }
    }
}

/// Append-only record of one processing try, as read back from the store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Attempt {
    pub id: i64,
    pub task_id: i64,
    pub profile_id: String,
    pub run_id: Option<String>,
    pub cycle_number: i64,
    pub status: AttemptStatus,
    pub error_type: Option<String>,
    pub error_message: Option<String>,
    pub message_text: Option<String>,
    pub created_at: i64,
}

/// Attempt data written together with a task transition.
#[derive(Debug, Clone)]
pub struct NewAttempt {
    pub task_id: i64,
    pub profile_id: String,
    pub run_id: Option<String>,
    pub cycle_number: i64,
    pub status: AttemptStatus,
    pub error_type: Option<String>,
    pub error_message: Option<String>,
    pub message_text: Option<String>,
}

/// Where a task goes after an attempt has been recorded.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskTransition {
    Complete,
    Reschedule { next_available_at: i64 },
    Block { reason: String },
}

/// Everything the store applies atomically for one finished attempt.
#[derive(Debug, Clone)]
pub struct AttemptOutcome {
    pub group_id: String,
    pub attempt: NewAttempt,
    pub transition: TaskTransition,
    pub now: i64,
}

impl AttemptOutcome {
    pub fn is_success(&self) -> bool {
        self.attempt.status == AttemptStatus::Success
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Profile {
    pub id: String,
    pub name: String,
    pub is_active: bool,
    pub is_blocked: bool,
    pub is_logged_out: bool,
    pub messages_sent_current_hour: i64,
    pub hour_reset_time: Option<i64>,
    pub created_at: i64,
}

impl Profile {
    /// Sends counted against the cap at `now`; zero once the window has lapsed.
    pub fn sent_in_window(&self, now: i64) -> i64 {
        match self.hour_reset_time {
            Some(reset) if reset + HOUR_SECS > now => self.messages_sent_current_hour,
            _ => 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProxyAssignment {
    pub proxy_url: String,
    pub profile_id: Option<String>,
    pub is_healthy: bool,
    pub is_blocked: bool,
    pub assigned_at: Option<i64>,
    pub last_rotation_at: Option<i64>,
}

impl ProxyAssignment {
    pub fn is_usable(&self) -> bool {
        self.is_healthy && !self.is_blocked
    }
}

/// Outcome bucket tracked per (proxy, profile).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyOutcome {
    Success,
    ChatNotFound,
    OtherError,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProxyStats {
    pub proxy_url: String,
    pub profile_id: String,
    pub total_attempts: i64,
    pub successful_sends: i64,
    pub chat_not_found: i64,
    pub other_errors: i64,
}

impl ProxyStats {
    pub fn chat_not_found_rate(&self) -> f64 {
        if self.total_attempts == 0 {
            return 0.0;
        }
        self.chat_not_found as f64 / self.total_attempts as f64 * 100.0
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_attempts == 0 {
            return 0.0;
        }
        self.successful_sends as f64 / self.total_attempts as f64 * 100.0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueueStats {
    pub total: i64,
    pub pending: i64,
    pub in_progress: i64,
    pub completed: i64,
    pub blocked: i64,
    pub total_success: i64,
    pub total_failed: i64,
}

impl QueueStats {
    pub fn completion_rate(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.completed as f64 / self.total as f64 * 100.0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DailyStats {
    pub profile_id: String,
    pub day: String,
    pub messages_sent: i64,
    pub successful_sends: i64,
    pub failed_sends: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(sent: i64, reset: Option<i64>) -> Profile {
        Profile {
            id: "p1".to_string(),
            name: "p1".to_string(),
            is_active: true,
            is_blocked: false,
            is_logged_out: false,
            messages_sent_current_hour: sent,
            hour_reset_time: reset,
            created_at: 0,
        }
    }

    #[test]
    fn test_sent_in_window_expires_after_an_hour() {
        let p = profile(12, Some(1_000));
        assert_eq!(p.sent_in_window(1_000 + HOUR_SECS - 1), 12);
        assert_eq!(p.sent_in_window(1_000 + HOUR_SECS), 0);
        assert_eq!(profile(5, None).sent_in_window(10), 0);
    }

    #[test]
    fn test_proxy_stats_rates() {
        let stats = ProxyStats {
            total_attempts: 12,
            successful_sends: 6,
            chat_not_found: 6,
            ..Default::default()
        };
        assert!((stats.chat_not_found_rate() - 50.0).abs() < f64::EPSILON);
        assert!((stats.success_rate() - 50.0).abs() < f64::EPSILON);
        assert_eq!(ProxyStats::default().chat_not_found_rate(), 0.0);
    }

    #[test]
    fn test_task_status_round_trips_through_str() {
        for status in [
            TaskStatus::Pending,
            TaskStatus::InProgress,
            TaskStatus::Completed,
            TaskStatus::Blocked,
        ] {
            assert_eq!(status.as_str().parse::<TaskStatus>(), Ok(status));
        }
        assert!("done".parse::<TaskStatus>().is_err());
    }
}
