use anyhow::{Context, Result};
use colored::Colorize;
use outreach_core::{shutdown_token, CommandLauncher, Supervisor, SupervisorReport};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use super::AppContext;

#[derive(Debug, Clone)]
pub struct StartOptions {
    pub group: String,
    pub workers: Option<usize>,
    pub all_profiles: bool,
    pub session: bool,
}

/// Profiles to launch: the group's configured list (registered on first
/// sight) or every active profile, minus blocked and logged-out ones.
pub async fn select_profiles(ctx: &AppContext, opts: &StartOptions) -> Result<Vec<String>> {
    let registry = ctx.profiles();
    let candidates: Vec<String> = if opts.all_profiles {
        registry.active().await?.into_iter().map(|p| p.id).collect()
    } else {
        let listed = ctx.config.group_profiles(&opts.group);
        for id in &listed {
            registry.ensure(id, None).await?;
        }
        listed
    };

    let mut eligible = registry.eligible(&candidates).await?;
    if let Some(limit) = opts.workers {
        eligible.truncate(limit);
    }
    Ok(eligible)
}

pub fn new_run_id(now: i64) -> String {
    format!("run-{}-{:06x}", now, rand::random::<u32>() & 0xff_ffff)
}

pub async fn run(ctx: &AppContext, opts: StartOptions) -> Result<SupervisorReport> {
    let dispatch = &ctx.config.dispatch;
    let queue = ctx.queue();

    let reclaimed = queue
        .reclaim_stale(
            dispatch.supervisor.stale_task_timeout_minutes,
            Some(&opts.group),
        )
        .await?;
    if reclaimed > 0 {
        info!("Reclaimed {} stale tasks in group {}", reclaimed, opts.group);
    }

    let pool = Arc::new(ctx.proxy_pool());
    let pool_file = &dispatch.proxy.pool_file;
    if Path::new(pool_file).exists() {
        let added = pool.sync_from_file(pool_file).await?;
        info!("Proxy pool synced from {} ({} new)", pool_file, added);
    } else {
        warn!("Proxy file {} not found, workers run without proxies", pool_file);
    }
    pool.reset_unhealthy(dispatch.proxy.health_reset_hours).await?;

    let profiles = select_profiles(ctx, &opts).await?;
    if profiles.is_empty() {
        warn!("No eligible profiles for group {}", opts.group);
    }

    let run_id = opts.session.then(|| new_run_id(ctx.clock.now()));
    if let Some(run_id) = &run_id {
        info!("Session mode, run id {}", run_id);
    }

    let stats = queue.stats(Some(&opts.group)).await?;
    info!(
        "Starting {} workers for group {} ({} pending of {} tasks)",
        profiles.len(),
        opts.group,
        stats.pending,
        stats.total
    );

    let program = std::env::current_exe().context("Failed to resolve current executable")?;
    let launcher = CommandLauncher::new(
        program,
        vec!["--config".to_string(), ctx.config_path.clone()],
        &opts.group,
        run_id,
    );
    let supervisor = Supervisor::new(Arc::new(launcher), &dispatch.supervisor);

    let token = shutdown_token();
    let health = tokio::spawn(pool.clone().run_health_reset(token.clone()));

    let result = supervisor.run(profiles, token.clone()).await;
    token.cancel();
    let _ = health.await;
    let report = result?;

    print_report(&report);
    Ok(report)
}

fn print_report(report: &SupervisorReport) {
    println!("{}", "Supervisor finished".bold());
    for profile in &report.profiles {
        let code = match profile.last_exit_code {
            Some(0) => "0".green(),
            Some(code) => code.to_string().red(),
            None => "signal".yellow(),
        };
        println!(
            "  {:<24} exit {:<8} restarts {}",
            profile.profile_id, code, profile.restart_count
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_ids_are_unique_per_start() {
        let a = new_run_id(1_700_000_000);
        assert!(a.starts_with("run-1700000000-"));
        let ids: std::collections::HashSet<String> =
            (0..50).map(|_| new_run_id(1_700_000_000)).collect();
        assert!(ids.len() > 1);
    }
}
