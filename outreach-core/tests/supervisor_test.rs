#![cfg(unix)]

use outreach_core::{
    Backoff, ProfileState, RestartPolicy, Supervisor, SupervisorConfig, SupervisorError,
    WorkerLauncher,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

/// Runs a fixed `sh -c` script per profile and counts launches.
struct ShellLauncher {
    scripts: HashMap<String, String>,
    launches: AtomicUsize,
}

impl ShellLauncher {
    fn new(scripts: &[(&str, &str)]) -> Arc<Self> {
        Arc::new(Self {
            scripts: scripts
                .iter()
                .map(|(p, s)| (p.to_string(), s.to_string()))
                .collect(),
            launches: AtomicUsize::new(0),
        })
    }

    fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }
}

impl WorkerLauncher for ShellLauncher {
    fn launch(&self, profile_id: &str) -> Result<Child, SupervisorError> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        let script = self
            .scripts
            .get(profile_id)
            .cloned()
            .unwrap_or_else(|| "exit 0".to_string());
        Command::new("sh")
            .arg("-c")
            .arg(script)
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| SupervisorError::SpawnFailed {
                profile_id: profile_id.to_string(),
                source,
            })
    }
}

fn fast_policy(max_attempts: u32) -> RestartPolicy {
    RestartPolicy {
        max_attempts,
        backoff: Backoff::new(Duration::from_millis(10), Duration::from_millis(40)),
        cooldown: Duration::from_secs(3600),
    }
}

fn config() -> SupervisorConfig {
    SupervisorConfig {
        shutdown_grace_secs: 1,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_banned_exit_is_never_restarted() {
    let launcher = ShellLauncher::new(&[("banned", "exit 3")]);
    let supervisor = Supervisor::new(launcher.clone(), &config()).with_policy(fast_policy(5));

    let report = supervisor
        .run(vec!["banned".to_string()], CancellationToken::new())
        .await
        .unwrap();

    let profile = report.get("banned").unwrap();
    assert_eq!(profile.state, ProfileState::Stopped);
    assert_eq!(profile.last_exit_code, Some(3));
    assert_eq!(profile.restart_count, 0);
    assert_eq!(launcher.launches(), 1);
}

#[tokio::test]
async fn test_crash_is_restarted_until_budget_runs_out() {
    let launcher = ShellLauncher::new(&[("crashy", "exit 1"), ("clean", "exit 0")]);
    let supervisor = Supervisor::new(launcher.clone(), &config()).with_policy(fast_policy(2));

    let report = supervisor
        .run(
            vec!["crashy".to_string(), "clean".to_string()],
            CancellationToken::new(),
        )
        .await
        .unwrap();

    let crashy = report.get("crashy").unwrap();
    assert_eq!(crashy.restart_count, 2);
    assert_eq!(crashy.last_exit_code, Some(1));
    assert_eq!(crashy.state, ProfileState::Stopped);

    let clean = report.get("clean").unwrap();
    assert_eq!(clean.restart_count, 0);
    assert_eq!(clean.last_exit_code, Some(0));

    // crashy: 1 + 2 restarts, clean: 1
    assert_eq!(launcher.launches(), 4);
}

#[tokio::test]
async fn test_session_expired_exit_is_terminal() {
    let launcher = ShellLauncher::new(&[("expired", "exit 4")]);
    let supervisor = Supervisor::new(launcher.clone(), &config()).with_policy(fast_policy(5));

    let report = supervisor
        .run(vec!["expired".to_string()], CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.get("expired").unwrap().last_exit_code, Some(4));
    assert_eq!(launcher.launches(), 1);
}

#[tokio::test]
async fn test_stop_terminates_running_workers() {
    let launcher = ShellLauncher::new(&[
        ("sleepy", "sleep 30"),
        ("stubborn", "trap '' TERM; while true; do sleep 0.1; done"),
    ]);
    let supervisor = Supervisor::new(launcher.clone(), &config()).with_policy(fast_policy(5));

    let stop = CancellationToken::new();
    let trigger = stop.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        trigger.cancel();
    });

    let report = tokio::time::timeout(
        Duration::from_secs(10),
        supervisor.run(vec!["sleepy".to_string(), "stubborn".to_string()], stop),
    )
    .await
    .expect("supervisor should stop within the grace period")
    .unwrap();

    for profile in &report.profiles {
        assert_eq!(profile.state, ProfileState::Stopped);
        assert_eq!(profile.restart_count, 0);
        // killed by a signal
        assert_eq!(profile.last_exit_code, None);
    }
    assert_eq!(launcher.launches(), 2);
}

#[tokio::test]
async fn test_no_profiles_is_an_error() {
    let launcher = ShellLauncher::new(&[]);
    let supervisor = Supervisor::new(launcher, &config());
    let result = supervisor.run(Vec::new(), CancellationToken::new()).await;
    assert!(matches!(result, Err(SupervisorError::NoProfiles)));
}
