//! # Send Pacing
//!
//! Per-message delay and the rolling hourly cap for one profile. The cap is
//! read from the shared profile counter; pacing itself is local to a worker.

use rand::Rng;
use std::time::Duration;

use crate::config::LimitsConfig;
use crate::models::Profile;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimiter {
    max_messages_per_hour: u32,
    jitter: f64,
}

impl RateLimiter {
    pub fn new(max_messages_per_hour: u32, jitter: f64) -> Self {
        Self {
            max_messages_per_hour: max_messages_per_hour.max(1),
            jitter: jitter.clamp(0.0, 1.0),
        }
    }

    pub fn from_limits(limits: &LimitsConfig) -> Self {
        Self::new(limits.max_messages_per_hour, limits.delay_randomness)
    }

    pub fn max_messages_per_hour(&self) -> u32 {
        self.max_messages_per_hour
    }

    /// Seconds between sends at exactly the hourly cap.
    pub fn base_delay_secs(&self) -> f64 {
        3600.0 / self.max_messages_per_hour as f64
    }

    /// Inclusive bounds of [`calculate_delay`](Self::calculate_delay), in seconds.
    pub fn delay_bounds(&self) -> (f64, f64) {
        let base = self.base_delay_secs();
        (base * (1.0 - self.jitter), base * (1.0 + self.jitter))
    }

    pub fn calculate_delay(&self) -> Duration {
        self.calculate_delay_with(&mut rand::thread_rng())
    }

    pub fn calculate_delay_with<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        Duration::from_secs_f64(self.jittered_secs(self.base_delay_secs(), rng))
    }

    /// `secs` scaled by a uniform factor in `[1 - jitter, 1 + jitter]`.
    pub fn jitter(&self, secs: u64) -> Duration {
        Duration::from_secs_f64(self.jittered_secs(secs as f64, &mut rand::thread_rng()))
    }

    fn jittered_secs<R: Rng + ?Sized>(&self, secs: f64, rng: &mut R) -> f64 {
        let factor = rng.gen_range((1.0 - self.jitter)..=(1.0 + self.jitter));
        secs * factor
    }

    pub fn has_capacity(&self, profile: &Profile, now: i64) -> bool {
        self.remaining(profile, now) > 0
    }

    pub fn remaining(&self, profile: &Profile, now: i64) -> u32 {
        let sent = profile.sent_in_window(now).max(0) as u64;
        (self.max_messages_per_hour as u64).saturating_sub(sent) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::HOUR_SECS;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn profile(sent: i64, reset: Option<i64>) -> Profile {
        Profile {
            id: "p1".to_string(),
            name: "p1".to_string(),
            is_active: true,
            is_blocked: false,
            is_logged_out: false,
            messages_sent_current_hour: sent,
            hour_reset_time: reset,
            created_at: 0,
        }
    }

    #[test]
    fn test_delay_stays_within_jitter_bounds() {
        let limiter = RateLimiter::new(30, 0.2);
        assert_eq!(limiter.delay_bounds(), (96.0, 144.0));

        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..1_000 {
            let delay = limiter.calculate_delay_with(&mut rng).as_secs_f64();
            assert!((96.0..=144.0).contains(&delay), "delay {} out of range", delay);
        }
    }

    #[test]
    fn test_zero_jitter_is_exact() {
        let limiter = RateLimiter::new(60, 0.0);
        assert_eq!(limiter.calculate_delay(), Duration::from_secs(60));
        assert_eq!(limiter.jitter(1200), Duration::from_secs(1200));
    }

    #[test]
    fn test_hourly_cap() {
        let limiter = RateLimiter::new(30, 0.2);
        let now = 10_000;

        assert!(limiter.has_capacity(&profile(29, Some(now - 10)), now));
        assert!(!limiter.has_capacity(&profile(30, Some(now - 10)), now));
        assert_eq!(limiter.remaining(&profile(12, Some(now - 10)), now), 18);
    }

    #[test]
    fn test_cap_frees_up_after_window() {
        let limiter = RateLimiter::new(30, 0.2);
        let full = profile(30, Some(0));

        assert!(!limiter.has_capacity(&full, HOUR_SECS - 1));
        assert!(limiter.has_capacity(&full, HOUR_SECS));
    }
}
