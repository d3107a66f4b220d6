// User data model
// Matches the Firestore `users/{uid}` profile document

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::cart::CartItem;
use super::coupon::Coupon;
use super::library::UserMaps;
use super::timestamp::opt_instant;
use crate::utils::config::STARTING_POINTS;

/// Mutable fields of the authenticated user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct UserState {
    pub uid: String,
    pub username: String,
    pub display_name: String,

    // Economy counters
    pub points: i64,
    pub daily_earned_points: i64,
    #[serde(with = "opt_instant")]
    pub last_points_reset: Option<DateTime<Utc>>,
    pub daily_chapters_published: u32,
    #[serde(with = "opt_instant")]
    pub last_chapter_publish_reset: Option<DateTime<Utc>>,
    #[serde(with = "opt_instant")]
    pub last_claimed_points: Option<DateTime<Utc>>,

    // Membership
    pub is_premium: bool,
    #[serde(with = "opt_instant", alias = "premiumSince")]
    pub membership_start_date: Option<DateTime<Utc>>,
    #[serde(with = "opt_instant")]
    pub last_membership_reward_date: Option<DateTime<Utc>>,

    // Social counters
    pub admirers_count: u32,
    pub mutuals_count: u32,
    pub admiring_count: u32,

    pub strikes: u32,
    pub is_online: bool,
}

impl UserState {
    /// Fresh state for a newly registered profile
    pub fn new(uid: &str, username: &str, display_name: &str) -> Self {
        Self {
            uid: uid.to_string(),
            username: username.to_string(),
            display_name: display_name.to_string(),
            points: STARTING_POINTS,
            is_online: true,
            ..Default::default()
        }
    }
}

/// The full profile document as persisted remotely. Every batched write carries
/// one of these in its entirety.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ProfileDocument {
    #[serde(flatten)]
    pub user: UserState,
    #[serde(flatten)]
    pub maps: UserMaps,
    #[serde(default)]
    pub coupons: Vec<Coupon>,
    #[serde(default)]
    pub cart: Vec<CartItem>,
    #[serde(rename = "blockedUsers", default)]
    pub blocked_users: BTreeSet<String>,
}

impl ProfileDocument {
    /// Decode a stored profile, defaulting whatever is missing
    pub fn from_value(uid: &str, value: serde_json::Value) -> serde_json::Result<Self> {
        let mut doc: ProfileDocument = serde_json::from_value(value)?;
        if doc.user.uid.is_empty() {
            doc.user.uid = uid.to_string();
        }
        Ok(doc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults_when_fields_missing() {
        let doc = ProfileDocument::from_value("u1", json!({ "username": "mika" })).unwrap();
        assert_eq!(doc.user.uid, "u1");
        assert_eq!(doc.user.username, "mika");
        assert_eq!(doc.user.points, 0);
        assert!(doc.coupons.is_empty());
        assert!(doc.maps.owned_book_ids.is_empty());
    }

    #[test]
    fn test_legacy_premium_since() {
        let doc = ProfileDocument::from_value(
            "u1",
            json!({ "username": "mika", "isPremium": true, "premiumSince": "2026-01-01T00:00:00Z" }),
        )
        .unwrap();
        assert!(doc.user.is_premium);
        assert!(doc.user.membership_start_date.is_some());
    }

    #[test]
    fn test_new_profile_starting_points() {
        let user = UserState::new("u1", "mika", "Mika");
        assert_eq!(user.points, STARTING_POINTS);
        assert!(user.is_online);
    }
}
