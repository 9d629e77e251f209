//! Operator commands: status, imports, profiles, proxy pool and stale reclaim.

use anyhow::{bail, Result};
use colored::Colorize;
use tracing::info;

use super::{read_lines, AppContext};

pub async fn status(ctx: &AppContext, group: Option<&str>) -> Result<()> {
    let stats = ctx.queue().stats(group).await?;
    let title = match group {
        Some(group) => format!("Queue status for group {}", group),
        None => "Queue status (all groups)".to_string(),
    };
    println!("{}", title.bold());
    println!("  Total tasks:    {}", stats.total);
    println!("  Pending:        {}", stats.pending.to_string().cyan());
    println!("  In progress:    {}", stats.in_progress.to_string().yellow());
    println!("  Completed:      {}", stats.completed.to_string().green());
    println!("  Blocked:        {}", stats.blocked.to_string().red());
    println!(
        "  Sends:          {} ok / {} failed",
        stats.total_success, stats.total_failed
    );
    println!("  Completion:     {:.1}%", stats.completion_rate());

    let registry = ctx.profiles();
    let profiles = registry.active().await?;
    println!();
    println!("{}", format!("Active profiles ({})", profiles.len()).bold());
    let now = ctx.clock.now();
    for profile in &profiles {
        let today = registry.today(&profile.id).await?.unwrap_or_default();
        println!(
            "  {:<24} {:>3}/{} this hour  today: {} sent, {} ok, {} failed",
            profile.id,
            profile.sent_in_window(now),
            ctx.config.dispatch.limits.max_messages_per_hour,
            today.messages_sent,
            today.successful_sends,
            today.failed_sends
        );
    }

    let proxies = ctx.store.list_proxies().await?;
    let usable = proxies.iter().filter(|p| p.is_usable()).count();
    let assigned = proxies.iter().filter(|p| p.profile_id.is_some()).count();
    println!();
    println!(
        "{} {} total, {} usable, {} assigned",
        "Proxies:".bold(),
        proxies.len(),
        usable,
        assigned
    );

    let db = ctx.store.metrics();
    info!(
        queries = db.total_queries,
        errors = db.total_errors,
        avg_ms = db.avg_query_time_ms,
        "Database metrics"
    );
    Ok(())
}

pub async fn import_targets(
    ctx: &AppContext,
    group: &str,
    file: &str,
    cycles: Option<u32>,
) -> Result<u64> {
    let targets = read_lines(file)?;
    if targets.is_empty() {
        bail!("No targets found in {}", file);
    }
    let added = ctx.queue().import_targets(group, &targets, cycles).await?;
    println!(
        "Imported {} new targets into {} ({} duplicates skipped)",
        added.to_string().green(),
        group,
        targets.len() as u64 - added
    );
    Ok(added)
}

pub async fn import_messages(ctx: &AppContext, group: &str, file: &str) -> Result<u64> {
    let messages = read_lines(file)?;
    if messages.is_empty() {
        bail!("No messages found in {}", file);
    }
    let added = ctx.queue().import_messages(group, &messages).await?;
    println!("Imported {} messages into {}", added.to_string().green(), group);
    Ok(added)
}

pub async fn add_profile(ctx: &AppContext, id: &str, name: Option<&str>) -> Result<()> {
    let profile = ctx.profiles().ensure(id, name).await?;
    println!(
        "Profile {} ({}) active={} blocked={} logged_out={}",
        profile.id.bold(),
        profile.name,
        profile.is_active,
        profile.is_blocked,
        profile.is_logged_out
    );
    Ok(())
}

pub async fn proxies_sync(ctx: &AppContext, file: Option<&str>) -> Result<u64> {
    let path = file.unwrap_or(&ctx.config.dispatch.proxy.pool_file);
    let added = ctx.proxy_pool().sync_from_file(path).await?;
    println!("Synced proxies from {} ({} new)", path, added.to_string().green());
    Ok(added)
}

pub async fn proxies_list(ctx: &AppContext) -> Result<()> {
    let listing = ctx.proxy_pool().list().await?;
    println!("{}", format!("Proxies ({})", listing.len()).bold());
    for (proxy, stats) in listing {
        let health = if proxy.is_blocked {
            "blocked".red()
        } else if proxy.is_healthy {
            "healthy".green()
        } else {
            "unhealthy".yellow()
        };
        let owner = proxy.profile_id.as_deref().unwrap_or("-");
        match stats {
            Some(stats) => println!(
                "  {:<40} {:<9} {:<20} {} attempts, {:.1}% chat_not_found",
                proxy.proxy_url,
                health,
                owner,
                stats.total_attempts,
                stats.chat_not_found_rate()
            ),
            None => println!("  {:<40} {:<9} {}", proxy.proxy_url, health, owner),
        }
    }
    Ok(())
}

pub async fn proxies_reset_unhealthy(ctx: &AppContext, hours: Option<u64>) -> Result<u64> {
    let hours = hours.unwrap_or(ctx.config.dispatch.proxy.health_reset_hours);
    let reset = ctx.proxy_pool().reset_unhealthy(hours).await?;
    println!("Reset {} proxies unhealthy for over {}h", reset, hours);
    Ok(reset)
}

pub async fn reset_stale(ctx: &AppContext, group: &str, timeout: Option<u64>) -> Result<u64> {
    let minutes = timeout.unwrap_or(ctx.config.dispatch.supervisor.stale_task_timeout_minutes);
    let reclaimed = ctx.queue().reclaim_stale(minutes, Some(group)).await?;
    println!(
        "Returned {} tasks stuck in progress for over {} minutes to pending",
        reclaimed, minutes
    );
    Ok(reclaimed)
}
