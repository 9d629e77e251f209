//! # Outreach Core - Task Distribution for Outbound Messaging
//!
//! Shared building blocks for the outreach dispatcher: a persistent task
//! queue with atomic claims, per-profile pacing, proxy health rotation and a
//! process supervisor for the per-profile workers.
//!
//! ## Modules
//!
//! - [`config`] - Limits, retry, proxy, supervisor, database and logging settings
//! - [`database`] - `Store` trait with SQLite and Postgres backends
//! - [`error`] - Typed error handling with thiserror
//! - [`models`] - Tasks, attempts, profiles and proxy records
//! - [`queue`] - Claim, record and reschedule tasks
//! - [`proxy`] - Sticky proxy assignment and health-based rotation
//! - [`accounts`] - Store-backed profile registry
//! - [`worker`] - One profile's send loop
//! - [`supervisor`] - One OS process per profile with restart policy
//! - [`traits`] - Sender, browser session and account state seams
//! - [`metrics`] - Per-worker send metrics

pub mod accounts;
pub mod config;
pub mod database;
pub mod error;
pub mod metrics;
pub mod models;
pub mod proxy;
pub mod queue;
pub mod supervisor;
pub mod traits;
pub(crate) mod utils;
pub mod worker;

pub use accounts::ProfileRegistry;
pub use config::{
    DatabaseConfig, DispatchConfig, LimitsConfig, LoggingConfig, ProxyHealthConfig, RetryConfig,
    SupervisorConfig,
};
pub use database::{connect, ClaimRequest, DbMetricsSnapshot, SqliteStore, Store};
pub use error::{
    ConfigError, CoreError, DatabaseError, QueueError, SessionError, SupervisorError,
};
pub use metrics::{MetricsCollector, MetricsSnapshot};
pub use models::{
    Attempt, AttemptStatus, DailyStats, Profile, ProxyAssignment, ProxyOutcome, ProxyStats,
    QueueStats, Task, TaskStatus,
};
pub use proxy::ProxyPool;
pub use queue::{FailureReport, TaskQueue};
pub use supervisor::{
    CommandLauncher, ProfileReport, ProfileState, RestartDecision, RestartPolicy, RestartTracker,
    Supervisor, SupervisorReport, WorkerLauncher,
};
pub use traits::{AccountState, BrowserSession, SendOutcome, SendReport, Sender};
pub use worker::{Worker, WorkerDeps, WorkerExit};

// Utils are pub(crate) - only export specific public utilities
pub use utils::{
    setup_logger, shutdown_signal, shutdown_token, with_retry, Backoff, Clock, ManualClock,
    ProxyEndpoint, ProxyManager, RateLimiter, RetryPolicy, SystemClock, SEND_RESULT_TARGET,
};
