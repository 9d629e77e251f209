//! # Utilities Module
//!
//! Internal utility modules for the outreach-core crate.
//! These modules are marked as `pub(crate)` to enforce API boundaries.

pub(crate) mod clock;
pub(crate) mod logger;
pub(crate) mod proxy_manager;
pub(crate) mod rate_limiter;
pub(crate) mod retry;
pub(crate) mod shutdown;

pub use clock::{Clock, ManualClock, SystemClock};
pub use logger::{setup_logger, SEND_RESULT_TARGET};
pub use proxy_manager::{ProxyEndpoint, ProxyManager};
pub use rate_limiter::RateLimiter;
pub use retry::{with_retry, Backoff, RetryPolicy};
pub use shutdown::{shutdown_signal, shutdown_token};
