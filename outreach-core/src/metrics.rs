//! Per-worker send counters with a JSON snapshot.

use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::traits::SendOutcome;

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub timestamp: String,
    pub uptime_secs: u64,
    pub sends: SendMetrics,
    pub performance: PerformanceMetrics,
    /// Attempts per outcome, keyed by error type (`success` for successes).
    pub outcomes: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SendMetrics {
    pub total: u64,
    pub success: u64,
    pub failed: u64,
    pub deferred: u64,
    pub success_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PerformanceMetrics {
    pub total_duration_ms: u64,
    pub avg_send_duration_ms: f64,
    pub min_send_duration_ms: u64,
    pub max_send_duration_ms: u64,
}

#[derive(Debug)]
pub struct MetricsCollector {
    sends_total: AtomicU64,
    sends_success: AtomicU64,
    sends_failed: AtomicU64,
    sends_deferred: AtomicU64,
    duration_sum_ms: AtomicU64,
    min_duration_ms: AtomicU64,
    max_duration_ms: AtomicU64,
    outcomes: Mutex<BTreeMap<String, u64>>,
    start_time: Instant,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self {
            sends_total: AtomicU64::new(0),
            sends_success: AtomicU64::new(0),
            sends_failed: AtomicU64::new(0),
            sends_deferred: AtomicU64::new(0),
            duration_sum_ms: AtomicU64::new(0),
            min_duration_ms: AtomicU64::new(u64::MAX),
            max_duration_ms: AtomicU64::new(0),
            outcomes: Mutex::new(BTreeMap::new()),
            start_time: Instant::now(),
        }
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Slow-mode deferrals count as neither success nor failure.
    pub fn record_send(&self, outcome: &SendOutcome, duration: Duration) {
        let duration_ms = duration.as_millis() as u64;
        self.sends_total.fetch_add(1, Ordering::SeqCst);
        self.duration_sum_ms.fetch_add(duration_ms, Ordering::SeqCst);
        self.min_duration_ms.fetch_min(duration_ms, Ordering::SeqCst);
        self.max_duration_ms.fetch_max(duration_ms, Ordering::SeqCst);

        match outcome {
            SendOutcome::Success => self.sends_success.fetch_add(1, Ordering::SeqCst),
            SendOutcome::SlowMode { .. } => self.sends_deferred.fetch_add(1, Ordering::SeqCst),
            _ => self.sends_failed.fetch_add(1, Ordering::SeqCst),
        };

        let key = outcome.error_type().unwrap_or("success");
        if let Ok(mut outcomes) = self.outcomes.lock() {
            *outcomes.entry(key.to_string()).or_insert(0) += 1;
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let total = self.sends_total.load(Ordering::SeqCst);
        let success = self.sends_success.load(Ordering::SeqCst);
        let total_duration = self.duration_sum_ms.load(Ordering::SeqCst);
        let min_duration = self.min_duration_ms.load(Ordering::SeqCst);

        MetricsSnapshot {
            timestamp: Utc::now().to_rfc3339(),
            uptime_secs: self.uptime().as_secs(),
            sends: SendMetrics {
                total,
                success,
                failed: self.sends_failed.load(Ordering::SeqCst),
                deferred: self.sends_deferred.load(Ordering::SeqCst),
                success_rate: if total > 0 {
                    success as f64 / total as f64 * 100.0
                } else {
                    0.0
                },
            },
            performance: PerformanceMetrics {
                total_duration_ms: total_duration,
                avg_send_duration_ms: if total > 0 {
                    total_duration as f64 / total as f64
                } else {
                    0.0
                },
                min_send_duration_ms: if min_duration == u64::MAX {
                    0
                } else {
                    min_duration
                },
                max_send_duration_ms: self.max_duration_ms.load(Ordering::SeqCst),
            },
            outcomes: self
                .outcomes
                .lock()
                .map(|o| o.clone())
                .unwrap_or_default(),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(&self.snapshot()).unwrap_or_else(|_| "{}".to_string())
    }

    pub fn to_compact_json(&self) -> String {
        serde_json::to_string(&self.snapshot()).unwrap_or_else(|_| "{}".to_string())
    }

    pub async fn export_to_file(&self, path: &str) -> std::io::Result<()> {
        tokio::fs::write(path, self.to_json()).await
    }

    pub fn sends_total(&self) -> u64 {
        self.sends_total.load(Ordering::SeqCst)
    }

    pub fn sends_success(&self) -> u64 {
        self.sends_success.load(Ordering::SeqCst)
    }

    pub fn sends_failed(&self) -> u64 {
        self.sends_failed.load(Ordering::SeqCst)
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }
}
