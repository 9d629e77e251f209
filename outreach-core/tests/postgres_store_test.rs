//! Runs the queue scenarios against a live Postgres. Needs `--features postgres`
//! and `DATABASE_URL`; skipped otherwise.
#![cfg(feature = "postgres")]

use outreach_core::{
    connect, Clock, DatabaseConfig, FailureReport, LimitsConfig, ManualClock, QueueError, Store,
    TaskQueue, TaskStatus,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

const T0: i64 = 1_700_000_000;

struct PgHarness {
    store: Arc<dyn Store>,
    clock: Arc<ManualClock>,
    /// Unique per test so runs against a shared database do not collide.
    group: String,
}

impl PgHarness {
    async fn new(tag: &str) -> Option<Self> {
        let url = match std::env::var("DATABASE_URL") {
            Ok(url) if url.starts_with("postgres") => url,
            _ => {
                eprintln!("DATABASE_URL not set to a postgres URL, skipping {}", tag);
                return None;
            }
        };
        let store = connect(&DatabaseConfig {
            url,
            max_connections: 8,
        })
        .await
        .unwrap();
        assert_eq!(store.backend(), "postgres");

        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        Some(Self {
            store,
            clock: Arc::new(ManualClock::new(T0)),
            group: format!("{}-{}-{}", tag, std::process::id(), nanos),
        })
    }

    fn queue(&self) -> Arc<TaskQueue> {
        let clock: Arc<dyn Clock> = self.clock.clone();
        Arc::new(TaskQueue::new(
            self.store.clone(),
            clock,
            LimitsConfig::default(),
        ))
    }

    fn profile(&self, name: &str) -> String {
        format!("{}-{}", self.group, name)
    }

    async fn import(&self, queue: &TaskQueue, targets: &[&str], cycles: u32) -> u64 {
        let targets: Vec<String> = targets.iter().map(|t| t.to_string()).collect();
        queue
            .import_targets(&self.group, &targets, Some(cycles))
            .await
            .unwrap()
    }
}

fn failure(task_id: i64, profile: &str, error_type: &str) -> FailureReport {
    FailureReport {
        task_id,
        profile_id: profile.to_string(),
        run_id: None,
        error_type: error_type.to_string(),
        error_message: None,
        should_block: false,
        block_reason: None,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_pg_concurrent_claims_are_distinct() {
    let Some(h) = PgHarness::new("claims").await else {
        return;
    };
    let queue = h.queue();
    h.import(&queue, &["a", "b", "c"], 1).await;

    let mut handles = Vec::new();
    for i in 0..8 {
        let queue = Arc::clone(&queue);
        let group = h.group.clone();
        let profile = h.profile(&format!("p{}", i));
        handles.push(tokio::spawn(async move {
            queue.claim(&group, &profile, None).await.unwrap()
        }));
    }

    let mut ids = HashSet::new();
    for handle in handles {
        if let Some(task) = handle.await.unwrap() {
            assert_eq!(task.status, TaskStatus::InProgress);
            assert!(ids.insert(task.id), "task {} handed out twice", task.id);
        }
    }
    assert_eq!(ids.len(), 3);
}

#[tokio::test]
async fn test_pg_task_completes_after_all_cycles() {
    let Some(h) = PgHarness::new("cycles").await else {
        return;
    };
    let p1 = h.profile("p1");
    h.store.upsert_profile(&p1, &p1, T0).await.unwrap();
    let queue = h.queue();
    h.import(&queue, &["alice"], 2).await;

    let task = queue.claim(&h.group, &p1, None).await.unwrap().unwrap();
    let first = queue.mark_success(task.id, &p1, "hi", None).await.unwrap();
    assert_eq!(first.status, TaskStatus::Pending);
    assert_eq!(first.completed_cycles, 1);

    h.clock.advance(2 * 3600);
    let task = queue.claim(&h.group, &p1, None).await.unwrap().unwrap();
    let second = queue.mark_success(task.id, &p1, "hi", None).await.unwrap();
    assert_eq!(second.status, TaskStatus::Completed);

    h.clock.advance(24 * 3600);
    assert!(queue.claim(&h.group, &p1, None).await.unwrap().is_none());
    let cycles: Vec<i64> = h
        .store
        .list_attempts(task.id)
        .await
        .unwrap()
        .iter()
        .map(|a| a.cycle_number)
        .collect();
    assert_eq!(cycles, vec![1, 2]);
}

#[tokio::test]
async fn test_pg_blocked_task_is_never_claimed() {
    let Some(h) = PgHarness::new("blocked").await else {
        return;
    };
    let (p1, p2) = (h.profile("p1"), h.profile("p2"));
    let queue = h.queue();
    h.import(&queue, &["ghost"], 1).await;

    let task = queue.claim(&h.group, &p1, None).await.unwrap().unwrap();
    let blocked = queue
        .mark_failed(FailureReport {
            should_block: true,
            block_reason: Some("chat_not_found".to_string()),
            ..failure(task.id, &p1, "chat_not_found")
        })
        .await
        .unwrap();
    assert_eq!(blocked.status, TaskStatus::Blocked);

    h.clock.advance(7 * 24 * 3600);
    assert!(queue.claim(&h.group, &p2, None).await.unwrap().is_none());
}

#[tokio::test]
async fn test_pg_reclaim_stale_and_late_report() {
    let Some(h) = PgHarness::new("stale").await else {
        return;
    };
    let (a, b) = (h.profile("a"), h.profile("b"));
    let queue = h.queue();
    h.import(&queue, &["alice", "bob"], 1).await;

    let stuck = queue.claim(&h.group, &a, None).await.unwrap().unwrap();
    h.clock.advance(31 * 60);
    let fresh = queue.claim(&h.group, &b, None).await.unwrap().unwrap();
    assert_ne!(fresh.id, stuck.id);

    assert_eq!(queue.reclaim_stale(30, Some(&h.group)).await.unwrap(), 1);
    let retaken = queue.claim(&h.group, &b, None).await.unwrap().unwrap();
    assert_eq!(retaken.id, stuck.id);

    let err = queue
        .mark_failed(failure(stuck.id, &a, "need_join"))
        .await
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<QueueError>(),
        Some(QueueError::NotHeld { .. })
    ));
    assert!(!queue.defer(stuck.id, &a, 60).await.unwrap());

    let held = h.store.get_task(stuck.id).await.unwrap().unwrap();
    assert_eq!(held.status, TaskStatus::InProgress);
    assert_eq!(held.assigned_profile_id.as_deref(), Some(b.as_str()));
    assert!(h.store.list_attempts(stuck.id).await.unwrap().is_empty());
}
