//! # Worker Supervisor
//!
//! Runs one OS process per profile and decides, on every exit, whether to
//! bring it back. Each child is owned by a watcher task that reports its exit
//! over a channel; the dispatcher loop itself never blocks on a child.
//!
//! Exit codes follow [`WorkerExit`]: `0`, `3` and `4` are final, anything
//! else (including death by signal) is restarted with exponential backoff
//! until the per-profile budget runs out.

use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};

use crate::config::SupervisorConfig;
use crate::error::SupervisorError;
use crate::utils::retry::Backoff;
use crate::worker::WorkerExit;

#[derive(Debug, Clone)]
pub struct RestartPolicy {
    pub max_attempts: u32,
    pub backoff: Backoff,
    /// Stable running time after which the restart count starts over.
    pub cooldown: Duration,
}

impl RestartPolicy {
    pub fn from_config(config: &SupervisorConfig) -> Self {
        Self {
            max_attempts: config.max_restart_attempts,
            backoff: Backoff::new(
                Duration::from_secs(config.restart_base_delay_secs),
                Duration::from_secs(config.restart_max_delay_secs),
            ),
            cooldown: Duration::from_secs(config.restart_cooldown_secs),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestartDecision {
    Restart { delay: Duration, attempt: u32 },
    /// Exit code the worker uses to say it must not come back.
    Terminal(WorkerExit),
    BudgetExhausted,
    Stopping,
}

/// Restart bookkeeping for one profile.
#[derive(Debug, Clone)]
pub struct RestartTracker {
    policy: RestartPolicy,
    restart_count: u32,
    last_restart: Option<Instant>,
}

impl RestartTracker {
    pub fn new(policy: RestartPolicy) -> Self {
        Self {
            policy,
            restart_count: 0,
            last_restart: None,
        }
    }

    pub fn restart_count(&self) -> u32 {
        self.restart_count
    }

    /// `exit_code` is `None` when the process was killed by a signal.
    pub fn decide(&mut self, exit_code: Option<i32>, now: Instant, stopping: bool) -> RestartDecision {
        if stopping {
            return RestartDecision::Stopping;
        }
        if let Some(exit) = exit_code.and_then(WorkerExit::from_code) {
            if exit.is_terminal() {
                return RestartDecision::Terminal(exit);
            }
        }

        if let Some(last) = self.last_restart {
            if now.saturating_duration_since(last) > self.policy.cooldown {
                self.restart_count = 0;
            }
        }
        if self.restart_count >= self.policy.max_attempts {
            return RestartDecision::BudgetExhausted;
        }

        let delay = self.policy.backoff.delay(self.restart_count);
        self.restart_count += 1;
        self.last_restart = Some(now);
        RestartDecision::Restart {
            delay,
            attempt: self.restart_count,
        }
    }
}

/// Starts the worker process for one profile.
pub trait WorkerLauncher: Send + Sync {
    fn launch(&self, profile_id: &str) -> Result<Child, SupervisorError>;
}

/// Re-executes a binary's hidden `worker` subcommand for each profile.
pub struct CommandLauncher {
    program: PathBuf,
    leading_args: Vec<String>,
    group_id: String,
    run_id: Option<String>,
}

impl CommandLauncher {
    /// `leading_args` go before the subcommand, e.g. `--config <path>`.
    pub fn new(
        program: PathBuf,
        leading_args: Vec<String>,
        group_id: &str,
        run_id: Option<String>,
    ) -> Self {
        Self {
            program,
            leading_args,
            group_id: group_id.to_string(),
            run_id,
        }
    }

    pub fn args(&self, profile_id: &str) -> Vec<String> {
        let mut args = self.leading_args.clone();
        args.extend([
            "worker".to_string(),
            "--profile-id".to_string(),
            profile_id.to_string(),
            "--group".to_string(),
            self.group_id.clone(),
        ]);
        if let Some(run_id) = &self.run_id {
            args.extend(["--run-id".to_string(), run_id.clone()]);
        }
        args
    }
}

impl WorkerLauncher for CommandLauncher {
    fn launch(&self, profile_id: &str) -> Result<Child, SupervisorError> {
        Command::new(&self.program)
            .args(self.args(profile_id))
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| SupervisorError::SpawnFailed {
                profile_id: profile_id.to_string(),
                source,
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileState {
    Starting,
    Running,
    Restarting,
    Stopped,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProfileReport {
    pub profile_id: String,
    pub state: ProfileState,
    pub restart_count: u32,
    pub last_exit_code: Option<i32>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SupervisorReport {
    pub profiles: Vec<ProfileReport>,
}

impl SupervisorReport {
    pub fn get(&self, profile_id: &str) -> Option<&ProfileReport> {
        self.profiles.iter().find(|p| p.profile_id == profile_id)
    }
}

#[derive(Debug)]
enum WorkerEvent {
    Exited {
        profile_id: String,
        code: Option<i32>,
    },
    RestartDue {
        profile_id: String,
    },
}

struct Entry {
    state: ProfileState,
    tracker: RestartTracker,
    last_exit_code: Option<i32>,
}

pub struct Supervisor {
    launcher: Arc<dyn WorkerLauncher>,
    policy: RestartPolicy,
    grace: Duration,
}

impl Supervisor {
    pub fn new(launcher: Arc<dyn WorkerLauncher>, config: &SupervisorConfig) -> Self {
        Self {
            launcher,
            policy: RestartPolicy::from_config(config),
            grace: config.grace_period(),
        }
    }

    pub fn with_policy(mut self, policy: RestartPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Supervises `profile_ids` until every one of them has stopped.
    /// Cancelling `stop` terminates live workers and suppresses restarts.
    pub async fn run(
        &self,
        profile_ids: Vec<String>,
        stop: CancellationToken,
    ) -> Result<SupervisorReport, SupervisorError> {
        if profile_ids.is_empty() {
            return Err(SupervisorError::NoProfiles);
        }
        let span = info_span!("supervisor", workers = profile_ids.len());
        self.dispatch(profile_ids, stop).instrument(span).await
    }

    async fn dispatch(
        &self,
        profile_ids: Vec<String>,
        stop: CancellationToken,
    ) -> Result<SupervisorReport, SupervisorError> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut tasks = JoinSet::new();
        let mut entries: BTreeMap<String, Entry> = profile_ids
            .iter()
            .map(|id| {
                (
                    id.clone(),
                    Entry {
                        state: ProfileState::Starting,
                        tracker: RestartTracker::new(self.policy.clone()),
                        last_exit_code: None,
                    },
                )
            })
            .collect();

        info!("Starting {} workers", profile_ids.len());
        for profile_id in &profile_ids {
            self.start(profile_id, &mut entries, &mut tasks, &tx, &stop);
        }

        let mut stopping = false;
        while entries.values().any(|e| e.state != ProfileState::Stopped) {
            tokio::select! {
                Some(event) = rx.recv() => match event {
                    WorkerEvent::Exited { profile_id, code } => {
                        self.on_exit(&profile_id, code, &mut entries, &mut tasks, &tx, &stop);
                    }
                    WorkerEvent::RestartDue { profile_id } => {
                        if stop.is_cancelled() {
                            set_state(&mut entries, &profile_id, ProfileState::Stopped);
                        } else {
                            info!(profile_id = %profile_id, "Restarting worker");
                            self.start(&profile_id, &mut entries, &mut tasks, &tx, &stop);
                        }
                    }
                },
                _ = stop.cancelled(), if !stopping => {
                    stopping = true;
                    info!("Stop requested, terminating workers");
                    for entry in entries.values_mut() {
                        if entry.state == ProfileState::Restarting {
                            entry.state = ProfileState::Stopped;
                        }
                    }
                }
                else => break,
            }
        }

        tasks.shutdown().await;

        let report = SupervisorReport {
            profiles: entries
                .into_iter()
                .map(|(profile_id, entry)| ProfileReport {
                    profile_id,
                    state: entry.state,
                    restart_count: entry.tracker.restart_count(),
                    last_exit_code: entry.last_exit_code,
                })
                .collect(),
        };
        info!("All workers stopped");
        Ok(report)
    }

    fn start(
        &self,
        profile_id: &str,
        entries: &mut BTreeMap<String, Entry>,
        tasks: &mut JoinSet<()>,
        tx: &mpsc::UnboundedSender<WorkerEvent>,
        stop: &CancellationToken,
    ) {
        match self.launcher.launch(profile_id) {
            Ok(child) => {
                info!(profile_id, pid = child.id().unwrap_or(0), "Worker started");
                set_state(entries, profile_id, ProfileState::Running);
                let span = info_span!("watch", profile_id);
                tasks.spawn(
                    watch(
                        profile_id.to_string(),
                        child,
                        stop.clone(),
                        self.grace,
                        tx.clone(),
                    )
                    .instrument(span),
                );
            }
            Err(e) => {
                error!(profile_id, "{}", e);
                self.on_exit(profile_id, Some(WorkerExit::Error.code()), entries, tasks, tx, stop);
            }
        }
    }

    fn on_exit(
        &self,
        profile_id: &str,
        code: Option<i32>,
        entries: &mut BTreeMap<String, Entry>,
        tasks: &mut JoinSet<()>,
        tx: &mpsc::UnboundedSender<WorkerEvent>,
        stop: &CancellationToken,
    ) {
        let Some(entry) = entries.get_mut(profile_id) else {
            return;
        };
        entry.last_exit_code = code;

        match entry.tracker.decide(code, Instant::now(), stop.is_cancelled()) {
            RestartDecision::Restart { delay, attempt } => {
                warn!(
                    profile_id,
                    exit_code = ?code,
                    attempt,
                    max = self.policy.max_attempts,
                    delay_secs = delay.as_secs(),
                    "Worker exited, scheduling restart"
                );
                entry.state = ProfileState::Restarting;
                let tx = tx.clone();
                let stop = stop.clone();
                let profile_id = profile_id.to_string();
                tasks.spawn(async move {
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = stop.cancelled() => {}
                    }
                    let _ = tx.send(WorkerEvent::RestartDue { profile_id });
                });
            }
            RestartDecision::Terminal(exit) => {
                match exit {
                    WorkerExit::Finished => info!(profile_id, "Worker finished"),
                    WorkerExit::Banned => error!(profile_id, "Profile banned, not restarting"),
                    WorkerExit::SessionExpired => {
                        error!(profile_id, "Session expired, not restarting")
                    }
                    WorkerExit::Error => {}
                }
                entry.state = ProfileState::Stopped;
            }
            RestartDecision::BudgetExhausted => {
                error!(
                    profile_id,
                    exit_code = ?code,
                    restarts = entry.tracker.restart_count(),
                    "Restart budget exhausted, giving up"
                );
                entry.state = ProfileState::Stopped;
            }
            RestartDecision::Stopping => {
                info!(profile_id, exit_code = ?code, "Worker stopped");
                entry.state = ProfileState::Stopped;
            }
        }
    }
}

fn set_state(entries: &mut BTreeMap<String, Entry>, profile_id: &str, state: ProfileState) {
    if let Some(entry) = entries.get_mut(profile_id) {
        entry.state = state;
    }
}

/// Owns one child until it exits, terminating it if `stop` fires first.
async fn watch(
    profile_id: String,
    mut child: Child,
    stop: CancellationToken,
    grace: Duration,
    tx: mpsc::UnboundedSender<WorkerEvent>,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        _ = stop.cancelled() => terminate(&profile_id, &mut child, grace).await,
    };
    let code = match status {
        Ok(status) => status.code(),
        Err(e) => {
            error!("Failed to wait on worker: {}", e);
            None
        }
    };
    let _ = tx.send(WorkerEvent::Exited { profile_id, code });
}

/// SIGTERM, then kill once `grace` has passed.
async fn terminate(
    profile_id: &str,
    child: &mut Child,
    grace: Duration,
) -> std::io::Result<ExitStatus> {
    if let Err(e) = send_terminate(profile_id, child) {
        warn!("{}", e);
    }
    match tokio::time::timeout(grace, child.wait()).await {
        Ok(status) => status,
        Err(_) => {
            warn!(grace_secs = grace.as_secs(), "Worker ignored SIGTERM, killing");
            child.kill().await?;
            child.wait().await
        }
    }
}

#[cfg(unix)]
fn send_terminate(profile_id: &str, child: &Child) -> Result<(), SupervisorError> {
    let Some(pid) = child.id() else {
        return Ok(());
    };
    // SAFETY: `pid` belongs to a child we own and have not reaped yet.
    let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
    if rc != 0 {
        return Err(SupervisorError::SignalFailed {
            profile_id: profile_id.to_string(),
            msg: std::io::Error::last_os_error().to_string(),
        });
    }
    Ok(())
}

#[cfg(not(unix))]
fn send_terminate(profile_id: &str, child: &mut Child) -> Result<(), SupervisorError> {
    child
        .start_kill()
        .map_err(|e| SupervisorError::SignalFailed {
            profile_id: profile_id.to_string(),
            msg: e.to_string(),
        })
}
