// Centralized configuration for Pagebound

use std::env;
use std::time::Duration;

/// Most points that can be earned through awards in one rolling day
pub const DAILY_POINTS_CAP: i64 = 25;

/// Daily claim payout for regular and premium members
pub const DAILY_CLAIM_POINTS: i64 = 3;
pub const PREMIUM_DAILY_CLAIM_POINTS: i64 = 6;

/// Price of one coupon spin
pub const SPIN_COST: i64 = 150;

/// Unused coupons a user may hold at once
pub const MAX_UNUSED_COUPONS: usize = 3;

/// Points granted by each membership reward
pub const MEMBERSHIP_REWARD_POINTS: i64 = 200;

/// Chapters a writer may publish per rolling day
pub const DAILY_CHAPTER_LIMIT: u32 = 7;

/// Reading activity entries kept per user
pub const READING_ACTIVITY_LIMIT: usize = 10;

/// Points a freshly registered profile starts with
pub const STARTING_POINTS: i64 = 50;

/// Monetization thresholds
pub mod monetization {
    pub const MIN_CHAPTERS: usize = 5;
    pub const MIN_LIKES_PER_CHAPTER: u32 = 50;
    pub const MIN_DAYS_PUBLISHED: i64 = 21;
    pub const MAX_ATTEMPTS: u32 = 2;
}

/// Runtime settings, read from the environment (and `.env`)
#[derive(Debug, Clone)]
pub struct Settings {
    pub firebase_key_path: String,
    pub uid: Option<String>,
    pub username: Option<String>,
    pub debounce: Duration,
    pub idle_timeout: Duration,
    pub poll_interval: Duration,
    pub flush_timeout: Duration,
    pub payment_ledger_path: String,
    pub offline: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            firebase_key_path: "firebase-key.json".to_string(),
            uid: None,
            username: None,
            debounce: Duration::from_millis(2000),
            idle_timeout: Duration::from_secs(5 * 60),
            poll_interval: Duration::from_secs(5),
            flush_timeout: Duration::from_secs(5),
            payment_ledger_path: "pending-payment.json".to_string(),
            offline: false,
        }
    }
}

impl Settings {
    /// Build settings from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            firebase_key_path: env::var("FIREBASE_KEY_PATH")
                .unwrap_or(defaults.firebase_key_path),
            uid: env::var("PAGEBOUND_UID").ok(),
            username: env::var("PAGEBOUND_USERNAME").ok(),
            debounce: env_millis("SYNC_DEBOUNCE_MS").unwrap_or(defaults.debounce),
            idle_timeout: env_secs("PRESENCE_IDLE_SECS").unwrap_or(defaults.idle_timeout),
            poll_interval: env_secs("SUBSCRIPTION_POLL_SECS").unwrap_or(defaults.poll_interval),
            flush_timeout: env_secs("FLUSH_TIMEOUT_SECS").unwrap_or(defaults.flush_timeout),
            payment_ledger_path: env::var("PAYMENT_LEDGER_PATH")
                .unwrap_or(defaults.payment_ledger_path),
            offline: env::var("PAGEBOUND_OFFLINE")
                .map(|v| matches!(v.as_str(), "1" | "true" | "yes"))
                .unwrap_or(false),
        }
    }
}

fn env_millis(key: &str) -> Option<Duration> {
    env::var(key).ok()?.parse().ok().map(Duration::from_millis)
}

fn env_secs(key: &str) -> Option<Duration> {
    env::var(key).ok()?.parse().ok().map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_timings() {
        let settings = Settings::default();
        assert_eq!(settings.debounce, Duration::from_secs(2));
        assert_eq!(settings.idle_timeout, Duration::from_secs(300));
        assert!(!settings.offline);
    }
}
