#![allow(dead_code)]

use outreach_core::{
    Clock, LimitsConfig, ManualClock, ProxyHealthConfig, ProxyPool, SqliteStore, Store, TaskQueue,
};
use std::sync::Arc;
use tempfile::TempDir;

pub const T0: i64 = 1_700_000_000;
pub const GROUP: &str = "g1";

/// A fresh SQLite store in a temp dir with a manual clock at `T0`.
pub struct Harness {
    _dir: TempDir,
    pub store: Arc<dyn Store>,
    pub clock: Arc<ManualClock>,
}

impl Harness {
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("outreach.db");
        let store = SqliteStore::open(path.to_str().unwrap(), 8).await.unwrap();
        Self {
            _dir: dir,
            store: Arc::new(store),
            clock: Arc::new(ManualClock::new(T0)),
        }
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    pub fn queue(&self, limits: LimitsConfig) -> Arc<TaskQueue> {
        Arc::new(TaskQueue::new(self.store.clone(), self.clock(), limits))
    }

    pub fn pool(&self, config: ProxyHealthConfig) -> Arc<ProxyPool> {
        Arc::new(ProxyPool::new(self.store.clone(), self.clock(), config))
    }

    pub async fn add_profile(&self, id: &str) {
        self.store.upsert_profile(id, id, T0).await.unwrap();
    }

    pub async fn import(&self, queue: &TaskQueue, targets: &[&str], cycles: u32) -> u64 {
        let targets: Vec<String> = targets.iter().map(|t| t.to_string()).collect();
        queue
            .import_targets(GROUP, &targets, Some(cycles))
            .await
            .unwrap()
    }
}
