//! # Core Error Types
//!
//! Centralized error definitions for the outreach-core crate.
//! All errors implement `std::error::Error` and `std::fmt::Display`.

use thiserror::Error;

/// Unified error type for outreach-core operations.
///
/// This enum wraps all specific error types and provides a unified
/// error interface for the application layer.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error(transparent)]
    Config(ConfigError),

    #[error("Database error: {0}")]
    Database(DatabaseError),

    #[error(transparent)]
    Queue(QueueError),

    #[error(transparent)]
    Supervisor(SupervisorError),

    #[error("Unknown error: {message}")]
    Unknown { message: String },
}

impl From<ConfigError> for CoreError {
    fn from(e: ConfigError) -> Self {
        CoreError::Config(e)
    }
}

impl From<DatabaseError> for CoreError {
    fn from(e: DatabaseError) -> Self {
        CoreError::Database(e)
    }
}

impl From<QueueError> for CoreError {
    fn from(e: QueueError) -> Self {
        CoreError::Queue(e)
    }
}

impl From<SupervisorError> for CoreError {
    fn from(e: SupervisorError) -> Self {
        CoreError::Supervisor(e)
    }
}

/// Configuration-related errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Missing required configuration field: '{field}'")]
    MissingField { field: String },

    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("File not found: {path}")]
    FileNotFound { path: String },

    #[error("Unknown group '{group}'")]
    UnknownGroup { group: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: &str, reason: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

/// Database operation errors
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Failed to connect to {url}: {msg}")]
    ConnectionFailed { url: String, msg: String },

    #[error("Unsupported database URL '{url}'")]
    UnsupportedUrl { url: String },

    #[error("Query '{operation}' failed: {msg}")]
    QueryFailed { operation: String, msg: String },

    #[error("Schema initialization failed: {msg}")]
    MigrationFailed { msg: String },

    #[error("Query returned no rows for key: {key}")]
    NotFound { key: String },
}

/// Task queue errors surfaced to workers
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueueError {
    #[error("Task {task_id} not found")]
    TaskNotFound { task_id: i64 },

    #[error("Task {task_id} is no longer held by profile {profile_id}")]
    NotHeld { task_id: i64, profile_id: String },

    #[error("Group '{group}' has no active messages")]
    NoMessages { group: String },
}

/// Failures opening a browser session for a profile
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    #[error("Session expired for profile {profile_id}")]
    Expired { profile_id: String },

    #[error("Failed to open session for profile {profile_id}: {reason}")]
    Failed { profile_id: String, reason: String },
}

/// Worker supervision errors
#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("Failed to spawn worker for profile {profile_id}: {source}")]
    SpawnFailed {
        profile_id: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to signal worker for profile {profile_id}: {msg}")]
    SignalFailed { profile_id: String, msg: String },

    #[error("No profiles to supervise")]
    NoProfiles,
}
