mod common;

use common::{Harness, GROUP, T0};
use outreach_core::{
    Clock, FailureReport, LimitsConfig, QueueError, Store, TaskQueue, TaskStatus,
};
use std::collections::HashSet;
use std::sync::Arc;

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
async fn test_concurrent_claim_hands_task_to_one_worker() {
    let h = Harness::new().await;
    let queue = h.queue(LimitsConfig::default());
    h.import(&queue, &["only_target"], 1).await;

    let mut handles = Vec::new();
    for i in 0..8 {
        let queue = Arc::clone(&queue);
        handles.push(tokio::spawn(async move {
            queue.claim(GROUP, &format!("p{}", i), None).await.unwrap()
        }));
    }

    let mut winners = 0;
    for handle in handles {
        if handle.await.unwrap().is_some() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_claims_are_distinct() {
    let h = Harness::new().await;
    let queue = h.queue(LimitsConfig::default());
    h.import(&queue, &["a", "b", "c", "d", "e"], 1).await;

    let mut handles = Vec::new();
    for i in 0..10 {
        let queue = Arc::clone(&queue);
        handles.push(tokio::spawn(async move {
            queue.claim(GROUP, &format!("p{}", i), None).await.unwrap()
        }));
    }

    let mut ids = HashSet::new();
    let mut claimed = 0;
    for handle in handles {
        if let Some(task) = handle.await.unwrap() {
            claimed += 1;
            assert_eq!(task.status, TaskStatus::InProgress);
            assert!(ids.insert(task.id), "task {} handed out twice", task.id);
        }
    }
    assert_eq!(claimed, 5);
}

#[tokio::test]
async fn test_task_completes_after_all_cycles() {
    let h = Harness::new().await;
    h.add_profile("p1").await;
    let queue = h.queue(LimitsConfig::default());
    h.import(&queue, &["alice"], 3).await;

    for cycle in 1..=3 {
        let task = queue
            .claim(GROUP, "p1", None)
            .await
            .unwrap()
            .expect("task should be claimable");
        assert_eq!(task.target, "@alice");

        let updated = queue.mark_success(task.id, "p1", "hi", None).await.unwrap();
        assert_eq!(updated.completed_cycles, cycle);
        assert_eq!(updated.success_count, cycle);
        assert!(updated.assigned_profile_id.is_none());

        if cycle < 3 {
            assert_eq!(updated.status, TaskStatus::Pending);
            let next = updated.next_available_at.unwrap();
            // 20 minutes with 20% jitter
            assert!(next >= h.clock.now() + 960 && next <= h.clock.now() + 1440);
            assert!(queue.claim(GROUP, "p1", None).await.unwrap().is_none());
            h.clock.advance(2 * 3600);
        } else {
            assert_eq!(updated.status, TaskStatus::Completed);
        }
    }

    h.clock.advance(24 * 3600);
    assert!(queue.claim(GROUP, "p1", None).await.unwrap().is_none());

    let attempts = h.store.list_attempts(1).await.unwrap();
    let cycles: Vec<i64> = attempts.iter().map(|a| a.cycle_number).collect();
    assert_eq!(cycles, vec![1, 2, 3]);
}

#[tokio::test]
async fn test_blocked_task_is_never_claimed_until_unblocked() {
    let h = Harness::new().await;
    let queue = h.queue(LimitsConfig::default());
    h.import(&queue, &["ghost"], 1).await;

    let task = queue.claim(GROUP, "p1", None).await.unwrap().unwrap();
    let blocked = queue
        .mark_failed(FailureReport {
            should_block: true,
            block_reason: Some("chat_not_found".to_string()),
            ..failure(task.id, "p1", "chat_not_found")
        })
        .await
        .unwrap();
    assert_eq!(blocked.status, TaskStatus::Blocked);
    assert!(blocked.is_blocked);

    h.clock.advance(7 * 24 * 3600);
    assert!(queue.claim(GROUP, "p2", None).await.unwrap().is_none());

    let unblocked = h
        .store
        .unblock_tasks("chat_not_found", h.clock.now())
        .await
        .unwrap();
    assert_eq!(unblocked, 1);
    let again = queue.claim(GROUP, "p2", None).await.unwrap().unwrap();
    assert_eq!(again.id, task.id);
    assert!(!again.is_blocked);
}

#[tokio::test]
async fn test_reclaim_stale_only_touches_in_progress() {
    let h = Harness::new().await;
    let queue = h.queue(LimitsConfig::default());
    h.import(&queue, &["a", "b", "c", "d"], 1).await;

    let stuck = queue.claim(GROUP, "p1", None).await.unwrap().unwrap();
    let done = queue.claim(GROUP, "p1", None).await.unwrap().unwrap();
    queue.mark_success(done.id, "p1", "hi", None).await.unwrap();
    let dead = queue.claim(GROUP, "p1", None).await.unwrap().unwrap();
    queue
        .mark_failed(FailureReport {
            should_block: true,
            block_reason: Some("chat_not_found".to_string()),
            ..failure(dead.id, "p1", "chat_not_found")
        })
        .await
        .unwrap();

    h.clock.advance(31 * 60);
    let fresh = queue.claim(GROUP, "p2", None).await.unwrap().unwrap();
    assert_eq!(fresh.target, "@d");

    assert_eq!(queue.reclaim_stale(30, Some(GROUP)).await.unwrap(), 1);

    let stuck = h.store.get_task(stuck.id).await.unwrap().unwrap();
    assert_eq!(stuck.status, TaskStatus::Pending);
    assert!(stuck.assigned_profile_id.is_none());
    let status = |id| {
        let store = h.store.clone();
        async move { store.get_task(id).await.unwrap().unwrap().status }
    };
    assert_eq!(status(done.id).await, TaskStatus::Completed);
    assert_eq!(status(dead.id).await, TaskStatus::Blocked);
    assert_eq!(status(fresh.id).await, TaskStatus::InProgress);
}

#[tokio::test]
async fn test_late_report_after_reclaim_leaves_new_holder_alone() {
    let h = Harness::new().await;
    let queue = h.queue(LimitsConfig::default());
    h.import(&queue, &["alice"], 2).await;

    let task = queue.claim(GROUP, "a", None).await.unwrap().unwrap();
    h.clock.advance(31 * 60);
    assert_eq!(queue.reclaim_stale(30, Some(GROUP)).await.unwrap(), 1);
    let taken = queue.claim(GROUP, "b", None).await.unwrap().unwrap();
    assert_eq!(taken.id, task.id);

    let err = queue
        .mark_failed(failure(task.id, "a", "need_join"))
        .await
        .unwrap_err();
    assert_eq!(
        err.downcast_ref::<QueueError>(),
        Some(&QueueError::NotHeld {
            task_id: task.id,
            profile_id: "a".to_string(),
        })
    );
    assert!(queue.mark_success(task.id, "a", "hi", None).await.is_err());
    assert!(!queue.defer(task.id, "a", 60).await.unwrap());

    let held = h.store.get_task(task.id).await.unwrap().unwrap();
    assert_eq!(held.status, TaskStatus::InProgress);
    assert_eq!(held.assigned_profile_id.as_deref(), Some("b"));
    assert_eq!(held.completed_cycles, 0);
    assert_eq!(held.failed_count, 0);
    assert_eq!(held.success_count, 0);
    assert!(h.store.list_attempts(task.id).await.unwrap().is_empty());

    h.clock.advance(301);
    assert!(queue.claim(GROUP, "c", None).await.unwrap().is_none());

    let done = queue.mark_success(task.id, "b", "hi", None).await.unwrap();
    assert_eq!(done.completed_cycles, 1);
    assert_eq!(h.store.list_attempts(task.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_hourly_cap_stops_claims_until_window_passes() {
    let h = Harness::new().await;
    h.add_profile("p1").await;
    let queue = h.queue(LimitsConfig {
        max_messages_per_hour: 2,
        ..Default::default()
    });
    h.import(&queue, &["a", "b", "c"], 1).await;

    for _ in 0..2 {
        let task = queue.claim(GROUP, "p1", None).await.unwrap().unwrap();
        queue.mark_success(task.id, "p1", "hi", None).await.unwrap();
        h.clock.advance(60);
    }

    assert!(queue.claim(GROUP, "p1", None).await.unwrap().is_none());
    let wait = queue.cap_wait("p1").await.unwrap().unwrap();
    assert_eq!(wait.as_secs(), 3600 - 120);

    h.clock.set(T0 + 3600);
    assert!(queue.cap_wait("p1").await.unwrap().is_none());
    let task = queue.claim(GROUP, "p1", None).await.unwrap().unwrap();
    assert_eq!(task.target, "@c");

    let profile = h.store.get_profile("p1").await.unwrap().unwrap();
    assert_eq!(profile.messages_sent_current_hour, 2);
}

#[tokio::test]
async fn test_session_mode_counts_only_run_successes() {
    let h = Harness::new().await;
    let queue = h.queue(LimitsConfig {
        max_cycles: 2,
        ..Default::default()
    });
    h.import(&queue, &["alice"], 1).await;
    let run = Some("run-1");

    let task = queue.claim(GROUP, "p1", run).await.unwrap().unwrap();
    queue
        .mark_failed(FailureReport {
            run_id: Some("run-1".to_string()),
            ..failure(task.id, "p1", "need_join")
        })
        .await
        .unwrap();

    h.clock.advance(3600);
    let task = queue.claim(GROUP, "p1", run).await.unwrap().unwrap();
    let first = queue.mark_success(task.id, "p1", "hi", run).await.unwrap();
    assert_eq!(first.status, TaskStatus::Pending);

    h.clock.advance(3600);
    let task = queue.claim(GROUP, "p1", run).await.unwrap().unwrap();
    let second = queue.mark_success(task.id, "p1", "hi", run).await.unwrap();
    assert_eq!(second.status, TaskStatus::Completed);

    let attempts = h.store.list_attempts(task.id).await.unwrap();
    let cycles: Vec<i64> = attempts.iter().map(|a| a.cycle_number).collect();
    assert_eq!(cycles, vec![1, 1, 2]);
}

#[tokio::test]
async fn test_failure_backs_off_then_retries() {
    let h = Harness::new().await;
    let queue = h.queue(LimitsConfig::default());
    h.import(&queue, &["alice"], 2).await;

    let task = queue.claim(GROUP, "p1", None).await.unwrap().unwrap();
    let failed = queue
        .mark_failed(failure(task.id, "p1", "premium_required"))
        .await
        .unwrap();
    assert_eq!(failed.status, TaskStatus::Pending);
    assert_eq!(failed.failed_count, 1);
    assert_eq!(failed.next_available_at, Some(T0 + 300));

    h.clock.advance(299);
    assert!(queue.claim(GROUP, "p2", None).await.unwrap().is_none());
    h.clock.advance(1);
    let retried = queue.claim(GROUP, "p2", None).await.unwrap().unwrap();
    assert_eq!(retried.id, task.id);

    let last = queue
        .mark_failed(failure(task.id, "p2", "premium_required"))
        .await
        .unwrap();
    assert_eq!(last.status, TaskStatus::Completed);
    assert_eq!(last.failed_count, 2);
}

#[tokio::test]
async fn test_slow_mode_defers_without_counting() {
    let h = Harness::new().await;
    let queue = h.queue(LimitsConfig::default());
    h.import(&queue, &["alice"], 1).await;

    let task = queue.claim(GROUP, "p1", None).await.unwrap().unwrap();
    assert!(!queue.defer(task.id, "p2", 60).await.unwrap());
    assert!(queue.defer(task.id, "p1", 60).await.unwrap());

    let deferred = h.store.get_task(task.id).await.unwrap().unwrap();
    assert_eq!(deferred.status, TaskStatus::Pending);
    assert_eq!(deferred.next_available_at, Some(T0 + 65));
    assert_eq!(deferred.failed_count, 0);
    assert_eq!(deferred.completed_cycles, 0);
    assert!(h.store.list_attempts(task.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_release_returns_task_immediately() {
    let h = Harness::new().await;
    let queue = h.queue(LimitsConfig::default());
    h.import(&queue, &["alice"], 1).await;

    let task = queue.claim(GROUP, "p1", None).await.unwrap().unwrap();
    assert!(!queue.release(task.id, "someone_else").await.unwrap());
    assert!(queue.release(task.id, "p1").await.unwrap());
    assert!(queue.claim(GROUP, "p2", None).await.unwrap().is_some());
}

#[tokio::test]
async fn test_random_message_and_stats() {
    let h = Harness::new().await;
    let queue: Arc<TaskQueue> = h.queue(LimitsConfig::default());

    let err = queue.random_message(GROUP).await.unwrap_err();
    assert_eq!(
        err.downcast_ref::<QueueError>(),
        Some(&QueueError::NoMessages {
            group: GROUP.to_string()
        })
    );

    let texts = vec!["hello".to_string(), "hey".to_string(), "hello".to_string()];
    assert_eq!(queue.import_messages(GROUP, &texts).await.unwrap(), 2);
    let picked = queue.random_message(GROUP).await.unwrap();
    assert!(picked == "hello" || picked == "hey");

    assert_eq!(h.import(&queue, &["a", "@b", "", "a"], 1).await, 2);
    let task = queue.claim(GROUP, "p1", None).await.unwrap().unwrap();
    queue.mark_success(task.id, "p1", "hello", None).await.unwrap();

    let stats = queue.stats(Some(GROUP)).await.unwrap();
    assert_eq!(stats.total, 2);
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.pending, 1);
    assert_eq!(stats.total_success, 1);
    assert!((stats.completion_rate() - 50.0).abs() < f64::EPSILON);
}
