//! # Worker
//!
//! One profile's send loop: open the browser session, then claim, send,
//! record and pace until the group runs dry or shutdown is requested.
//!
//! The process exit code tells the supervisor whether to restart:
//! see [`WorkerExit`].

use anyhow::Result;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::config::RetryConfig;
use crate::error::{QueueError, SessionError};
use crate::metrics::MetricsCollector;
use crate::models::{Profile, ProxyOutcome, Task, CHAT_NOT_FOUND};
use crate::proxy::ProxyPool;
use crate::queue::{FailureReport, TaskQueue};
use crate::traits::{AccountState, BrowserSession, SendOutcome, SendReport, Sender};
use crate::utils::logger::SEND_RESULT_TARGET;

/// Block reason once counted failures reach the configured limit.
pub const MAX_ATTEMPTS_EXCEEDED: &str = "max_attempts_exceeded";

/// How a worker process ended, mapped onto its exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// Nothing left to do, or shutdown was requested.
    Finished,
    /// Unexpected failure; the supervisor may restart.
    Error,
    /// Account frozen or banned. Never restarted.
    Banned,
    /// Login session gone. Never restarted.
    SessionExpired,
}

impl WorkerExit {
    pub fn code(self) -> i32 {
        match self {
            WorkerExit::Finished => 0,
            WorkerExit::Error => 1,
            WorkerExit::Banned => 3,
            WorkerExit::SessionExpired => 4,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(WorkerExit::Finished),
            1 => Some(WorkerExit::Error),
            3 => Some(WorkerExit::Banned),
            4 => Some(WorkerExit::SessionExpired),
            _ => None,
        }
    }

    /// Exits the supervisor must never restart.
    pub fn is_terminal(self) -> bool {
        !matches!(self, WorkerExit::Error)
    }
}

/// Collaborators shared by every worker in a process.
#[derive(Clone)]
pub struct WorkerDeps {
    pub queue: Arc<TaskQueue>,
    pub proxies: Arc<ProxyPool>,
    pub sender: Arc<dyn Sender>,
    pub session: Arc<dyn BrowserSession>,
    pub accounts: Arc<dyn AccountState>,
    pub retry: RetryConfig,
}

enum Step {
    Continue { succeeded: bool },
    Stop(WorkerExit),
}

pub struct Worker {
    deps: WorkerDeps,
    profile: Profile,
    group_id: String,
    run_id: Option<String>,
    proxy: Option<String>,
    metrics: MetricsCollector,
}

impl Worker {
    pub fn new(deps: WorkerDeps, profile: Profile, group_id: &str, run_id: Option<String>) -> Self {
        Self {
            deps,
            profile,
            group_id: group_id.to_string(),
            run_id,
            proxy: None,
            metrics: MetricsCollector::new(),
        }
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    /// Runs until the queue is drained, a terminal account state is hit or
    /// `token` is cancelled. Errors map to [`WorkerExit::Error`].
    pub async fn run(&mut self, token: CancellationToken) -> WorkerExit {
        let span = info_span!("worker", profile_id = %self.profile.id, group = %self.group_id);
        let exit = async {
            info!("Worker starting");
            let exit = match self.run_inner(&token).await {
                Ok(exit) => exit,
                Err(e) => {
                    error!("Worker failed: {:#}", e);
                    WorkerExit::Error
                }
            };
            self.deps.session.close().await;

            let snapshot = self.metrics.snapshot();
            info!(
                exit_code = exit.code(),
                sends = snapshot.sends.total,
                success = snapshot.sends.success,
                failed = snapshot.sends.failed,
                "Worker stopped"
            );
            exit
        }
        .instrument(span)
        .await;
        exit
    }

    async fn run_inner(&mut self, token: &CancellationToken) -> Result<WorkerExit> {
        self.proxy = self.deps.proxies.get_or_assign(&self.profile.id).await?;
        if let Some(exit) = self.open_session().await? {
            return Ok(exit);
        }

        loop {
            if token.is_cancelled() {
                info!("Shutdown requested");
                return Ok(WorkerExit::Finished);
            }

            let claimed = self
                .deps
                .queue
                .claim(&self.group_id, &self.profile.id, self.run_id.as_deref())
                .await?;
            let Some(task) = claimed else {
                if let Some(wait) = self.deps.queue.cap_wait(&self.profile.id).await? {
                    info!(wait_secs = wait.as_secs(), "Hourly cap reached, waiting");
                    if !pause(token, wait).await {
                        return Ok(WorkerExit::Finished);
                    }
                    continue;
                }
                info!("No more tasks available");
                return Ok(WorkerExit::Finished);
            };

            let step = match self.process(&task).await {
                Ok(step) => step,
                Err(e) => {
                    self.release(&task).await;
                    return Err(e);
                }
            };

            let delay = match step {
                Step::Stop(exit) => return Ok(exit),
                Step::Continue { succeeded: true } => self.deps.queue.calculate_delay(),
                Step::Continue { succeeded: false } => {
                    Duration::from_secs(self.deps.retry.failure_pause_secs)
                }
            };
            debug!(delay_ms = delay.as_millis() as u64, "Pacing");
            if !pause(token, delay).await {
                info!("Shutdown requested");
                return Ok(WorkerExit::Finished);
            }
        }
    }

    /// `Some(exit)` when the session cannot be used and the worker must stop.
    async fn open_session(&mut self) -> Result<Option<WorkerExit>> {
        match self
            .deps
            .session
            .open(&self.profile, self.proxy.as_deref())
            .await
        {
            Ok(()) => {
                info!(proxy = self.proxy.as_deref().unwrap_or("-"), "Session ready");
                Ok(None)
            }
            Err(SessionError::Expired { .. }) => {
                warn!("Session expired");
                self.deps.accounts.mark_logged_out(&self.profile.id).await?;
                Ok(Some(WorkerExit::SessionExpired))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn process(&mut self, task: &Task) -> Result<Step> {
        let message = self.deps.queue.random_message(&self.group_id).await?;

        let started = Instant::now();
        let report = self.deps.sender.send(task, &message).await;
        self.metrics.record_send(&report.outcome, started.elapsed());
        self.log_result(task, &report);

        let queue = &self.deps.queue;
        let succeeded = match &report.outcome {
            SendOutcome::Success => {
                let recorded = queue
                    .mark_success(task.id, &self.profile.id, &message, self.run_id.as_deref())
                    .await;
                still_held(task, recorded)?;
                true
            }
            SendOutcome::SlowMode { wait_seconds } => {
                if !queue.defer(task.id, &self.profile.id, *wait_seconds).await? {
                    warn!(task_id = task.id, "Task reclaimed before deferral, skipping");
                }
                return Ok(Step::Continue { succeeded: false });
            }
            SendOutcome::AccountFrozen => {
                error!("Account frozen, stopping worker");
                self.deps.accounts.mark_blocked(&self.profile.id).await?;
                self.release(task).await;
                return Ok(Step::Stop(WorkerExit::Banned));
            }
            outcome => {
                let (should_block, block_reason) = self.block_decision(task, outcome);
                let recorded = queue
                    .mark_failed(FailureReport {
                        task_id: task.id,
                        profile_id: self.profile.id.clone(),
                        run_id: self.run_id.clone(),
                        error_type: outcome.error_type().unwrap_or("exception").to_string(),
                        error_message: report.detail.clone(),
                        should_block,
                        block_reason,
                    })
                    .await;
                still_held(task, recorded)?;
                false
            }
        };

        if let Some(outcome) = report.outcome.proxy_outcome() {
            if let Some(exit) = self.track_proxy(outcome).await? {
                return Ok(Step::Stop(exit));
            }
        }
        Ok(Step::Continue { succeeded })
    }

    fn block_decision(&self, task: &Task, outcome: &SendOutcome) -> (bool, Option<String>) {
        match outcome {
            SendOutcome::ChatNotFound => (true, Some(CHAT_NOT_FOUND.to_string())),
            SendOutcome::Timeout | SendOutcome::Exception => {
                let failures = task.failed_count + 1;
                if failures >= self.deps.retry.max_attempts_before_block as i64 {
                    (true, Some(MAX_ATTEMPTS_EXCEEDED.to_string()))
                } else {
                    (false, None)
                }
            }
            _ => (false, None),
        }
    }

    /// Records the outcome against the current proxy and reopens the session
    /// if the health check rotated it.
    async fn track_proxy(&mut self, outcome: ProxyOutcome) -> Result<Option<WorkerExit>> {
        let Some(proxy) = self.proxy.clone() else {
            return Ok(None);
        };
        let proxies = &self.deps.proxies;
        proxies.record_attempt(&proxy, &self.profile.id, outcome).await?;

        let Some(rotated) = proxies.check_and_rotate(&proxy, &self.profile.id).await? else {
            return Ok(None);
        };
        self.proxy = Some(rotated);
        self.deps.session.close().await;
        self.open_session().await
    }

    async fn release(&self, task: &Task) {
        match self.deps.queue.release(task.id, &self.profile.id).await {
            Ok(true) => info!(task_id = task.id, "Released held task"),
            Ok(false) => {}
            Err(e) => error!(task_id = task.id, "Failed to release task: {:#}", e),
        }
    }

    fn log_result(&self, task: &Task, report: &SendReport) {
        match &report.outcome {
            SendOutcome::Success => info!(
                target: SEND_RESULT_TARGET,
                task_id = task.id,
                "SUCCESS {}",
                task.target
            ),
            SendOutcome::SlowMode { wait_seconds } => info!(
                target: SEND_RESULT_TARGET,
                task_id = task.id,
                wait_seconds,
                "DEFERRED {} (slow mode)",
                task.target
            ),
            outcome => info!(
                target: SEND_RESULT_TARGET,
                task_id = task.id,
                error = outcome.error_type().unwrap_or("unknown"),
                detail = report.detail.as_deref().unwrap_or(""),
                "FAILED {}",
                task.target
            ),
        }
    }
}

/// Passes through a recorded outcome. A task reclaimed by another worker
/// while this one was sending is logged and dropped.
fn still_held(task: &Task, recorded: Result<Task>) -> Result<()> {
    match recorded {
        Ok(_) => Ok(()),
        Err(e) => match e.downcast_ref::<QueueError>() {
            Some(QueueError::NotHeld { .. }) => {
                warn!(task_id = task.id, "Task reclaimed by another worker, outcome dropped");
                Ok(())
            }
            _ => Err(e),
        },
    }
}

/// Sleeps for `duration`; false if `token` fired first.
async fn pause(token: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        _ = token.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}
