//! Profile registry backed by the store.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

use crate::database::Store;
use crate::models::{DailyStats, Profile};
use crate::traits::AccountState;
use crate::utils::clock::Clock;

pub struct ProfileRegistry {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
}

impl ProfileRegistry {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Registers the profile if unknown; an existing row keeps its state and
    /// only takes the new name when one is given.
    pub async fn ensure(&self, profile_id: &str, name: Option<&str>) -> Result<Profile> {
        if name.is_none() {
            if let Some(existing) = self.store.get_profile(profile_id).await? {
                return Ok(existing);
            }
        }
        let now = self.clock.now();
        self.store
            .upsert_profile(profile_id, name.unwrap_or(profile_id), now)
            .await?;
        self.get(profile_id).await
    }

    pub async fn get(&self, profile_id: &str) -> Result<Profile> {
        self.store
            .get_profile(profile_id)
            .await?
            .ok_or_else(|| {
                crate::error::DatabaseError::NotFound {
                    key: format!("profile:{}", profile_id),
                }
                .into()
            })
    }

    /// Profiles a supervisor may start: active, unblocked and logged in.
    pub async fn active(&self) -> Result<Vec<Profile>> {
        self.store.active_profiles().await
    }

    /// Keeps the ids whose profile is still eligible, preserving order.
    pub async fn eligible(&self, profile_ids: &[String]) -> Result<Vec<String>> {
        let mut eligible = Vec::with_capacity(profile_ids.len());
        for id in profile_ids {
            match self.store.get_profile(id).await? {
                Some(p) if p.is_active && !p.is_blocked && !p.is_logged_out => {
                    eligible.push(id.clone())
                }
                Some(_) => info!(profile_id = %id, "Skipping blocked or logged-out profile"),
                None => warn!(profile_id = %id, "Skipping unknown profile"),
            }
        }
        Ok(eligible)
    }

    pub async fn today(&self, profile_id: &str) -> Result<Option<DailyStats>> {
        let day = crate::database::day_key(self.clock.now());
        self.store.daily_stats(profile_id, &day).await
    }
}

#[async_trait]
impl AccountState for ProfileRegistry {
    async fn mark_blocked(&self, profile_id: &str) -> Result<()> {
        warn!(profile_id, "Marking profile blocked");
        self.store.block_profile(profile_id).await
    }

    async fn mark_logged_out(&self, profile_id: &str) -> Result<()> {
        warn!(profile_id, "Marking profile logged out");
        self.store.mark_profile_logged_out(profile_id).await
    }
}
