// Named rejection reasons surfaced to the view layer

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::utils::formatters::{format_number, format_price, format_wait};

/// Why a mutator declined to act. Every variant leaves local state untouched
/// unless documented otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    /// A claim was attempted before its window elapsed
    #[error("cooldown active until {available_at}")]
    CooldownActive { available_at: DateTime<Utc> },

    /// Not enough points for the requested action
    #[error("insufficient funds: {required} points required, {available} available")]
    InsufficientFunds { required: i64, available: i64 },

    /// Chapter publish cap reached for the current window
    #[error("daily limit of {limit} reached, resets at {resets_at}")]
    DailyLimitReached { limit: u32, resets_at: DateTime<Utc> },

    /// The remote store refused or never acknowledged a write
    #[error("remote write failed: {0}")]
    RemoteWriteFailed(String),

    /// Coupon slots are full and the caller has not confirmed evicting the oldest
    #[error("coupon slots full, confirm evicting coupon {oldest_id} (value {oldest_value})")]
    StaleEviction { oldest_id: String, oldest_value: u32 },

    #[error("no active session")]
    NoActiveSession,

    #[error("unknown book {0}")]
    UnknownBook(String),

    #[error("user {0} is blocked")]
    UserBlocked(String),
}

impl Rejection {
    /// Short message for display, with waits rendered relative to `now`
    pub fn user_message(&self, now: DateTime<Utc>) -> String {
        match self {
            Rejection::CooldownActive { available_at } => {
                format!("Already claimed. Come back in {}.", format_wait(*available_at - now))
            }
            Rejection::InsufficientFunds { required, available } => format!(
                "You need {} points but only have {}.",
                format_number(*required),
                format_number(*available)
            ),
            Rejection::DailyLimitReached { limit, resets_at } => format!(
                "You can publish {} chapters per day. Try again in {}.",
                limit,
                format_wait(*resets_at - now)
            ),
            Rejection::RemoteWriteFailed(_) => {
                "Could not save right now. Your changes are kept locally.".to_string()
            }
            Rejection::StaleEviction { oldest_value, .. } => format!(
                "All coupon slots are full. Spinning will discard your oldest coupon ({} off).",
                format_price(i64::from(*oldest_value) * 100)
            ),
            Rejection::NoActiveSession => "Please log in first.".to_string(),
            Rejection::UnknownBook(_) => "That book could not be found.".to_string(),
            Rejection::UserBlocked(name) => format!("You have blocked {}.", name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_cooldown_message() {
        let now = Utc::now();
        let rejection = Rejection::CooldownActive {
            available_at: now + Duration::minutes(90),
        };
        assert_eq!(rejection.user_message(now), "Already claimed. Come back in 1h 30m.");
    }

    #[test]
    fn test_funds_message() {
        let rejection = Rejection::InsufficientFunds {
            required: 150,
            available: 140,
        };
        assert_eq!(
            rejection.user_message(Utc::now()),
            "You need 150 points but only have 140."
        );
    }

    #[test]
    fn test_eviction_message_shows_price() {
        let rejection = Rejection::StaleEviction {
            oldest_id: "c1".to_string(),
            oldest_value: 5,
        };
        assert_eq!(
            rejection.user_message(Utc::now()),
            "All coupon slots are full. Spinning will discard your oldest coupon ($5.00 off)."
        );
    }
}
