#![cfg(unix)]

use outreach::{DriverAdapter, DriverConfig};
use outreach_core::{BrowserSession, Profile, SendOutcome, Sender, SessionError, Task, TaskStatus};

fn driver(script: &str, timeout_secs: u64) -> DriverAdapter {
    DriverAdapter::new(&DriverConfig {
        program: "sh".to_string(),
        args: vec!["-c".to_string(), script.to_string()],
        timeout_secs,
    })
}

fn profile() -> Profile {
    Profile {
        id: "p1".to_string(),
        name: "Profile One".to_string(),
        is_active: true,
        is_blocked: false,
        is_logged_out: false,
        messages_sent_current_hour: 0,
        hour_reset_time: None,
        created_at: 0,
    }
}

fn task() -> Task {
    Task {
        id: 1,
        group_id: "g1".to_string(),
        target: "@chat".to_string(),
        status: TaskStatus::InProgress,
        is_blocked: false,
        block_reason: None,
        completed_cycles: 0,
        total_cycles: 1,
        success_count: 0,
        failed_count: 0,
        next_available_at: None,
        last_attempt_at: None,
        assigned_profile_id: Some("p1".to_string()),
        created_at: 0,
        updated_at: 0,
    }
}

/// Answers by action, echoing what it was asked so tests can inspect it.
const ROUTER: &str = r#"
req=$(cat)
case "$req" in
  *'"action":"open"'*) echo '{"status":"ready"}' ;;
  *'"target":"@ghost"'*) echo '{"outcome":"chat_not_found","detail":"no such chat"}' ;;
  *'"proxy":"http://10.0.0.1:8080"'*) echo '{"outcome":"success"}' ;;
  *'"action":"send"'*) echo '{"outcome":"exception","detail":"no proxy"}' ;;
  *) echo '{}' ;;
esac
"#;

#[tokio::test]
async fn test_open_then_send_carries_proxy() {
    let driver = driver(ROUTER, 10);
    driver
        .open(&profile(), Some("http://10.0.0.1:8080"))
        .await
        .unwrap();

    let report = driver.send(&task(), "hello").await;
    assert_eq!(report.outcome, SendOutcome::Success);

    let mut ghost = task();
    ghost.target = "@ghost".to_string();
    let report = driver.send(&ghost, "hello").await;
    assert_eq!(report.outcome, SendOutcome::ChatNotFound);
    assert_eq!(report.detail.as_deref(), Some("no such chat"));
}

#[tokio::test]
async fn test_send_without_proxy_session() {
    let driver = driver(ROUTER, 10);
    driver.open(&profile(), None).await.unwrap();
    let report = driver.send(&task(), "hello").await;
    assert_eq!(report.outcome, SendOutcome::Exception);
}

#[tokio::test]
async fn test_slow_reply_is_a_timeout() {
    let driver = driver("cat >/dev/null; sleep 5; echo '{\"outcome\":\"success\"}'", 1);
    let started = std::time::Instant::now();
    let report = driver.send(&task(), "hello").await;
    assert_eq!(report.outcome, SendOutcome::Timeout);
    assert!(started.elapsed() < std::time::Duration::from_secs(4));
}

#[tokio::test]
async fn test_silent_crash_is_an_exception() {
    let driver = driver("cat >/dev/null; exit 2", 10);
    let report = driver.send(&task(), "hello").await;
    assert_eq!(report.outcome, SendOutcome::Exception);
    assert!(report.detail.unwrap().contains("no output"));
}

#[tokio::test]
async fn test_missing_program_is_an_exception() {
    let driver = DriverAdapter::new(&DriverConfig {
        program: "/nonexistent/outreach-driver".to_string(),
        args: Vec::new(),
        timeout_secs: 5,
    });
    let report = driver.send(&task(), "hello").await;
    assert_eq!(report.outcome, SendOutcome::Exception);
}

#[tokio::test]
async fn test_open_reports_expired_session() {
    let driver = driver("cat >/dev/null; echo '{\"status\":\"session_expired\"}'", 10);
    let result = driver.open(&profile(), None).await;
    assert!(matches!(result, Err(SessionError::Expired { profile_id }) if profile_id == "p1"));
}

#[tokio::test]
async fn test_open_reports_driver_error() {
    let driver = driver(
        "cat >/dev/null; echo '{\"status\":\"error\",\"detail\":\"browser crashed\"}'",
        10,
    );
    match driver.open(&profile(), None).await {
        Err(SessionError::Failed { reason, .. }) => assert_eq!(reason, "browser crashed"),
        other => panic!("unexpected open result: {:?}", other),
    }
}
