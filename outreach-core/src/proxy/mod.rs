//! # Proxy Pool
//!
//! Sticky proxy assignment per profile plus the health monitor that rotates a
//! proxy once too many targets come back as unresolvable through it.
//!
//! A high chat-not-found rate on one egress IP usually means the IP is being
//! filtered, not that the targets are gone, so rotation optionally gives the
//! tasks blocked for that reason another chance.

use anyhow::Result;
use rand::seq::SliceRandom;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::ProxyHealthConfig;
use crate::database::Store;
use crate::models::{ProxyAssignment, ProxyOutcome, ProxyStats, CHAT_NOT_FOUND, HOUR_SECS};
use crate::utils::clock::Clock;
use crate::utils::proxy_manager::ProxyManager;

/// Candidates tried when another profile grabs a proxy first.
const MAX_ASSIGN_ATTEMPTS: usize = 3;

/// True once the sample is large enough and the chat-not-found share is
/// strictly above the threshold.
pub fn exceeds_threshold(stats: &ProxyStats, config: &ProxyHealthConfig) -> bool {
    stats.total_attempts >= config.min_attempts_for_check as i64
        && stats.chat_not_found_rate() > config.chat_not_found_threshold
}

pub struct ProxyPool {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    config: ProxyHealthConfig,
}

impl ProxyPool {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>, config: ProxyHealthConfig) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &ProxyHealthConfig {
        &self.config
    }

    pub async fn record_attempt(
        &self,
        proxy_url: &str,
        profile_id: &str,
        outcome: ProxyOutcome,
    ) -> Result<()> {
        self.store
            .record_proxy_attempt(proxy_url, profile_id, outcome, self.clock.now())
            .await
    }

    pub async fn should_rotate(&self, proxy_url: &str, profile_id: &str) -> Result<bool> {
        let Some(stats) = self.store.proxy_stats(proxy_url, profile_id).await? else {
            return Ok(false);
        };
        let rotate = exceeds_threshold(&stats, &self.config);
        if rotate {
            warn!(
                proxy = proxy_url,
                profile_id,
                attempts = stats.total_attempts,
                rate = format!("{:.1}%", stats.chat_not_found_rate()),
                "Chat-not-found rate above threshold"
            );
        }
        Ok(rotate)
    }

    /// Replaces the profile's proxy. `None` when the profile has no proxy to
    /// replace, or when no healthy, free proxy is left; the profile then keeps
    /// its current one.
    pub async fn rotate(&self, profile_id: &str) -> Result<Option<String>> {
        let now = self.clock.now();
        let Some(old) = self.store.proxy_for_profile(profile_id).await? else {
            debug!(profile_id, "No current proxy, nothing to rotate");
            return Ok(None);
        };
        self.store.mark_proxy_unhealthy(&old.proxy_url, now).await?;

        let Some(new_url) = self.assign_random(profile_id, now).await? else {
            warn!(profile_id, "No replacement proxy available");
            return Ok(None);
        };

        if self.config.unblock_tasks_on_rotate {
            let unblocked = self.store.unblock_tasks(CHAT_NOT_FOUND, now).await?;
            if unblocked > 0 {
                info!(unblocked, "Unblocked chat-not-found tasks after rotation");
            }
        }

        self.store
            .clear_proxy_stats(&old.proxy_url, profile_id)
            .await?;
        self.store.clear_proxy_stats(&new_url, profile_id).await?;

        info!(
            profile_id,
            from = %old.proxy_url,
            to = %new_url,
            "Rotated proxy"
        );
        Ok(Some(new_url))
    }

    pub async fn check_and_rotate(&self, proxy_url: &str, profile_id: &str) -> Result<Option<String>> {
        if self.should_rotate(proxy_url, profile_id).await? {
            self.rotate(profile_id).await
        } else {
            Ok(None)
        }
    }

    /// Proxy to route `profile_id` through: the current one if usable, else a
    /// fresh assignment, else the current one regardless of health.
    pub async fn get_or_assign(&self, profile_id: &str) -> Result<Option<String>> {
        let current = self.store.proxy_for_profile(profile_id).await?;
        if let Some(proxy) = current.as_ref().filter(|p| p.is_usable()) {
            return Ok(Some(proxy.proxy_url.clone()));
        }
        if let Some(url) = self.assign_random(profile_id, self.clock.now()).await? {
            info!(profile_id, proxy = %url, "Assigned proxy");
            return Ok(Some(url));
        }
        if let Some(proxy) = &current {
            warn!(profile_id, proxy = %proxy.proxy_url, "Keeping unhealthy proxy");
        }
        Ok(current.map(|p| p.proxy_url))
    }

    /// Gives proxies rotated out more than `hours` ago another chance.
    pub async fn reset_unhealthy(&self, hours: u64) -> Result<u64> {
        let cutoff = self.clock.now() - hours as i64 * HOUR_SECS;
        let reset = self.store.reset_unhealthy_proxies(cutoff).await?;
        if reset > 0 {
            info!(reset, hours, "Reset unhealthy proxies");
        }
        Ok(reset)
    }

    /// Runs `reset_unhealthy` every `reset_interval_minutes` until cancelled.
    pub async fn run_health_reset(self: Arc<Self>, token: CancellationToken) {
        let period = Duration::from_secs(self.config.reset_interval_minutes.max(1) * 60);
        let mut interval = tokio::time::interval(period);
        async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {
                        if let Err(e) = self.reset_unhealthy(self.config.health_reset_hours).await {
                            warn!("Proxy health reset failed: {:#}", e);
                        }
                    }
                }
            }
            debug!("Proxy health reset loop stopped");
        }
        .instrument(info_span!("proxy_health"))
        .await
    }

    pub async fn sync(&self, urls: &[String]) -> Result<u64> {
        let added = self.store.sync_proxies(urls).await?;
        debug!(added, total = urls.len(), "Synced proxy pool");
        Ok(added)
    }

    pub async fn sync_from_file(&self, path: impl AsRef<Path>) -> Result<u64> {
        let urls = ProxyManager::load_urls(path)?;
        self.sync(&urls).await
    }

    pub async fn block(&self, proxy_url: &str) -> Result<()> {
        self.store.mark_proxy_blocked(proxy_url).await
    }

    /// Every proxy with the stats of its current assignment, if any.
    pub async fn list(&self) -> Result<Vec<(ProxyAssignment, Option<ProxyStats>)>> {
        let mut listing = Vec::new();
        for proxy in self.store.list_proxies().await? {
            let stats = match &proxy.profile_id {
                Some(profile) => self.store.proxy_stats(&proxy.proxy_url, profile).await?,
                None => None,
            };
            listing.push((proxy, stats));
        }
        Ok(listing)
    }

    /// Picks a random free proxy and binds it, retrying when another profile
    /// wins the same row.
    async fn assign_random(&self, profile_id: &str, now: i64) -> Result<Option<String>> {
        let mut candidates = self.store.available_proxies().await?;
        candidates.shuffle(&mut rand::thread_rng());

        for (attempt, url) in candidates.into_iter().take(MAX_ASSIGN_ATTEMPTS).enumerate() {
            if self.store.assign_proxy(&url, profile_id, now).await? {
                return Ok(Some(url));
            }
            debug!(profile_id, proxy = %url, attempt = attempt + 1, "Proxy taken, trying another");
        }
        Ok(None)
    }
}
