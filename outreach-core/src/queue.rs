//! # Task Queue
//!
//! Claims tasks for workers and records what happened to them. All
//! exclusivity comes from the store's single-statement claim; everything here
//! decides *what* to write and hands it to the store as one unit.

use anyhow::Result;
use rand::seq::SliceRandom;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::LimitsConfig;
use crate::database::{ClaimRequest, Store};
use crate::error::QueueError;
use crate::models::{
    AttemptOutcome, AttemptStatus, NewAttempt, QueueStats, Task, TaskTransition, HOUR_SECS,
};
use crate::utils::clock::Clock;
use crate::utils::rate_limiter::RateLimiter;

/// A failed attempt as reported by the worker's outcome handling.
#[derive(Debug, Clone)]
pub struct FailureReport {
    pub task_id: i64,
    pub profile_id: String,
    pub run_id: Option<String>,
    pub error_type: String,
    pub error_message: Option<String>,
    pub should_block: bool,
    pub block_reason: Option<String>,
}

pub struct TaskQueue {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    limits: LimitsConfig,
    limiter: RateLimiter,
}

impl TaskQueue {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>, limits: LimitsConfig) -> Self {
        let limiter = RateLimiter::from_limits(&limits);
        Self {
            store,
            clock,
            limits,
            limiter,
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn limits(&self) -> &LimitsConfig {
        &self.limits
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Next task for `profile_id`, or `None` when the profile is at its
    /// hourly cap or nothing in the group is eligible.
    pub async fn claim(
        &self,
        group_id: &str,
        profile_id: &str,
        run_id: Option<&str>,
    ) -> Result<Option<Task>> {
        let now = self.clock.now();

        match self.store.get_profile(profile_id).await? {
            Some(profile) if !self.limiter.has_capacity(&profile, now) => {
                debug!(
                    profile_id,
                    sent = profile.sent_in_window(now),
                    cap = self.limiter.max_messages_per_hour(),
                    "Hourly cap reached"
                );
                return Ok(None);
            }
            Some(_) => {}
            None => warn!(profile_id, "Claiming for unregistered profile"),
        }

        let request = ClaimRequest {
            group_id: group_id.to_string(),
            profile_id: profile_id.to_string(),
            run_id: run_id.map(str::to_string),
            max_cycles: self.limits.max_cycles as i64,
            now,
        };
        let task = self.store.claim_task(&request).await?;
        if let Some(task) = &task {
            debug!(task_id = task.id, target = %task.target, profile_id, "Claimed task");
        }
        Ok(task)
    }

    /// Time until the profile's hourly window reopens, if it is at its cap.
    pub async fn cap_wait(&self, profile_id: &str) -> Result<Option<Duration>> {
        let now = self.clock.now();
        let Some(profile) = self.store.get_profile(profile_id).await? else {
            return Ok(None);
        };
        if self.limiter.has_capacity(&profile, now) {
            return Ok(None);
        }
        let reopens_at = profile.hour_reset_time.unwrap_or(now) + HOUR_SECS;
        Ok(Some(Duration::from_secs((reopens_at - now).max(1) as u64)))
    }

    pub async fn mark_success(
        &self,
        task_id: i64,
        profile_id: &str,
        message_text: &str,
        run_id: Option<&str>,
    ) -> Result<Task> {
        let task = self.load(task_id).await?;
        let now = self.clock.now();

        let (cycle_number, reached_max) = match run_id {
            Some(run) => {
                let done = self
                    .store
                    .count_attempts(task_id, run, Some(AttemptStatus::Success))
                    .await?
                    + 1;
                (done, done >= self.limits.max_cycles as i64)
            }
            None => {
                let done = task.completed_cycles + 1;
                (done, done >= task.total_cycles)
            }
        };

        let transition = if reached_max {
            TaskTransition::Complete
        } else {
            let delay = self.limiter.jitter(self.limits.cycle_delay_minutes * 60);
            TaskTransition::Reschedule {
                next_available_at: now + delay.as_secs() as i64,
            }
        };

        let outcome = AttemptOutcome {
            group_id: task.group_id.clone(),
            attempt: NewAttempt {
                task_id,
                profile_id: profile_id.to_string(),
                run_id: run_id.map(str::to_string),
                cycle_number,
                status: AttemptStatus::Success,
                error_type: None,
                error_message: None,
                message_text: Some(message_text.to_string()),
            },
            transition,
            now,
        };
        let updated = self.store.record_attempt(&outcome).await?;
        debug!(
            task_id,
            cycle = cycle_number,
            status = %updated.status,
            "Recorded successful attempt"
        );
        Ok(updated)
    }

    pub async fn mark_failed(&self, failure: FailureReport) -> Result<Task> {
        let task = self.load(failure.task_id).await?;
        let now = self.clock.now();

        let cycle_number = match &failure.run_id {
            Some(run) => self.store.count_attempts(task.id, run, None).await? + 1,
            None => task.completed_cycles + 1,
        };

        let transition = if failure.should_block {
            TaskTransition::Block {
                reason: failure
                    .block_reason
                    .clone()
                    .unwrap_or_else(|| failure.error_type.clone()),
            }
        } else if failure.run_id.is_none() && task.completed_cycles + 1 >= task.total_cycles {
            TaskTransition::Complete
        } else {
            TaskTransition::Reschedule {
                next_available_at: now + self.limits.failure_backoff_secs as i64,
            }
        };

        if let TaskTransition::Block { reason } = &transition {
            warn!(task_id = task.id, target = %task.target, reason = %reason, "Task blocked");
        }

        let outcome = AttemptOutcome {
            group_id: task.group_id.clone(),
            attempt: NewAttempt {
                task_id: task.id,
                profile_id: failure.profile_id,
                run_id: failure.run_id,
                cycle_number,
                status: AttemptStatus::Failed,
                error_type: Some(failure.error_type),
                error_message: failure.error_message,
                message_text: None,
            },
            transition,
            now,
        };
        self.store.record_attempt(&outcome).await
    }

    /// Slow-mode reschedule: no attempt is recorded and no counter moves.
    /// `false` when `profile_id` no longer holds the task.
    pub async fn defer(&self, task_id: i64, profile_id: &str, wait_seconds: u64) -> Result<bool> {
        let now = self.clock.now();
        let at = now + wait_seconds as i64 + self.limits.slow_mode_buffer_secs as i64;
        let deferred = self
            .store
            .reschedule_task(task_id, profile_id, at, now)
            .await?;
        if deferred {
            debug!(task_id, wait_seconds, "Deferred task for slow mode");
        }
        Ok(deferred)
    }

    /// Hands back a claimed task that was never processed.
    pub async fn release(&self, task_id: i64, profile_id: &str) -> Result<bool> {
        self.store
            .release_task(task_id, profile_id, self.clock.now())
            .await
    }

    pub async fn reclaim_stale(&self, timeout_minutes: u64, group_id: Option<&str>) -> Result<u64> {
        let now = self.clock.now();
        let cutoff = now - (timeout_minutes as i64) * 60;
        let reclaimed = self.store.reclaim_stale(cutoff, group_id, now).await?;
        if reclaimed > 0 {
            info!(
                reclaimed,
                group = group_id.unwrap_or("*"),
                "Reset stale in-progress tasks"
            );
        }
        Ok(reclaimed)
    }

    pub fn calculate_delay(&self) -> Duration {
        self.limiter.calculate_delay()
    }

    pub async fn random_message(&self, group_id: &str) -> Result<String> {
        let messages = self.store.active_messages(group_id).await?;
        let picked = messages
            .choose(&mut rand::thread_rng())
            .cloned()
            .ok_or_else(|| QueueError::NoMessages {
                group: group_id.to_string(),
            })?;
        Ok(picked)
    }

    pub async fn stats(&self, group_id: Option<&str>) -> Result<QueueStats> {
        self.store.queue_stats(group_id).await
    }

    pub async fn import_targets(
        &self,
        group_id: &str,
        targets: &[String],
        total_cycles: Option<u32>,
    ) -> Result<u64> {
        let cycles = total_cycles.unwrap_or(self.limits.max_cycles).max(1) as i64;
        self.store
            .import_targets(group_id, targets, cycles, self.clock.now())
            .await
    }

    pub async fn import_messages(&self, group_id: &str, texts: &[String]) -> Result<u64> {
        self.store.import_messages(group_id, texts).await
    }

    async fn load(&self, task_id: i64) -> Result<Task> {
        Ok(self
            .store
            .get_task(task_id)
            .await?
            .ok_or(QueueError::TaskNotFound { task_id })?)
    }
}
