use anyhow::Result;
use outreach_core::{shutdown_token, Worker, WorkerDeps, WorkerExit};
use std::sync::Arc;
use tracing::info;

use super::AppContext;
use crate::driver::DriverAdapter;

/// Runs one profile's send loop in this process and reports how it ended.
pub async fn run(
    ctx: &AppContext,
    profile_id: &str,
    group: &str,
    run_id: Option<String>,
) -> Result<WorkerExit> {
    let registry = Arc::new(ctx.profiles());
    let profile = registry.ensure(profile_id, None).await?;
    if profile.is_blocked {
        info!("Profile {} is blocked, not starting", profile_id);
        return Ok(WorkerExit::Banned);
    }
    if profile.is_logged_out {
        info!("Profile {} is logged out, not starting", profile_id);
        return Ok(WorkerExit::SessionExpired);
    }

    let driver = Arc::new(DriverAdapter::new(&ctx.config.driver));
    let deps = WorkerDeps {
        queue: Arc::new(ctx.queue()),
        proxies: Arc::new(ctx.proxy_pool()),
        sender: driver.clone(),
        session: driver,
        accounts: registry,
        retry: ctx.config.dispatch.retry.clone(),
    };

    let mut worker = Worker::new(deps, profile, group, run_id);
    Ok(worker.run(shutdown_token()).await)
}
