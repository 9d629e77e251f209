//! Narrow interfaces to the collaborators a worker drives. The core never
//! looks at how a send happens, only at the outcome it reports.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::SessionError;
use crate::models::{Profile, ProxyOutcome, Task};

/// Result of one send attempt as classified by the sender.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SendOutcome {
    Success,
    ChatNotFound,
    NeedJoin,
    PremiumRequired,
    UserBlocked,
    #[serde(alias = "paid_message_required")]
    PaidRequired,
    InputUnavailable,
    SlowMode { wait_seconds: u64 },
    Timeout,
    Exception,
    #[serde(alias = "banned")]
    AccountFrozen,
}

impl SendOutcome {
    /// Error classification stored on the attempt; `None` for success.
    pub fn error_type(&self) -> Option<&'static str> {
        match self {
            SendOutcome::Success => None,
            SendOutcome::ChatNotFound => Some("chat_not_found"),
            SendOutcome::NeedJoin => Some("need_join"),
            SendOutcome::PremiumRequired => Some("premium_required"),
            SendOutcome::UserBlocked => Some("user_blocked"),
            SendOutcome::PaidRequired => Some("paid_required"),
            SendOutcome::InputUnavailable => Some("input_unavailable"),
            SendOutcome::SlowMode { .. } => Some("slow_mode"),
            SendOutcome::Timeout => Some("timeout"),
            SendOutcome::Exception => Some("exception"),
            SendOutcome::AccountFrozen => Some("account_frozen"),
        }
    }

    /// Bucket for proxy health stats; `None` when the attempt is not counted.
    pub fn proxy_outcome(&self) -> Option<ProxyOutcome> {
        match self {
            SendOutcome::Success => Some(ProxyOutcome::Success),
            SendOutcome::ChatNotFound => Some(ProxyOutcome::ChatNotFound),
            SendOutcome::SlowMode { .. } | SendOutcome::AccountFrozen => None,
            _ => Some(ProxyOutcome::OtherError),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendReport {
    #[serde(flatten)]
    pub outcome: SendOutcome,
    #[serde(default)]
    pub detail: Option<String>,
}

impl SendReport {
    pub fn new(outcome: SendOutcome) -> Self {
        Self {
            outcome,
            detail: None,
        }
    }

    pub fn with_detail(outcome: SendOutcome, detail: impl Into<String>) -> Self {
        Self {
            outcome,
            detail: Some(detail.into()),
        }
    }
}

#[async_trait]
pub trait Sender: Send + Sync {
    /// Delivers `message` to the task's target. Runs to completion; callers
    /// never cancel an attempt in flight.
    async fn send(&self, task: &Task, message: &str) -> SendReport;
}

#[async_trait]
pub trait BrowserSession: Send + Sync {
    /// Prepares the profile's browser, routed through `proxy` when given.
    async fn open(&self, profile: &Profile, proxy: Option<&str>) -> Result<(), SessionError>;

    async fn close(&self) {}
}

/// Sink for terminal account states.
#[async_trait]
pub trait AccountState: Send + Sync {
    async fn mark_blocked(&self, profile_id: &str) -> Result<()>;

    async fn mark_logged_out(&self, profile_id: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_json_shape() {
        let report: SendReport =
            serde_json::from_str(r#"{"outcome":"slow_mode","wait_seconds":30}"#).unwrap();
        assert_eq!(report.outcome, SendOutcome::SlowMode { wait_seconds: 30 });
        assert_eq!(report.detail, None);

        let report: SendReport =
            serde_json::from_str(r#"{"outcome":"banned","detail":"frozen banner"}"#).unwrap();
        assert_eq!(report.outcome, SendOutcome::AccountFrozen);
        assert_eq!(report.detail.as_deref(), Some("frozen banner"));
    }

    #[test]
    fn test_slow_mode_is_not_a_proxy_sample() {
        assert_eq!(SendOutcome::SlowMode { wait_seconds: 5 }.proxy_outcome(), None);
        assert_eq!(
            SendOutcome::NeedJoin.proxy_outcome(),
            Some(ProxyOutcome::OtherError)
        );
        assert_eq!(SendOutcome::Success.error_type(), None);
    }
}
