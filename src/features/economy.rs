// Economy rule engine
// Stateless decisions over the user's counters; the caller supplies `now` and persists the result

use chrono::{DateTime, Utc};
use std::fmt;

use crate::error::Rejection;
use crate::models::book::Book;
use crate::models::coupon::{self, Coupon};
use crate::models::library::UserMaps;
use crate::models::user::UserState;
use crate::utils::config::{
    monetization, DAILY_CHAPTER_LIMIT, DAILY_CLAIM_POINTS, DAILY_POINTS_CAP, MAX_UNUSED_COUPONS,
    MEMBERSHIP_REWARD_POINTS, PREMIUM_DAILY_CLAIM_POINTS, SPIN_COST,
};
use crate::utils::window::{
    annual_membership_window, chapter_window, claim_window, has_elapsed, initial_membership_window,
    is_expired, next_available, points_window,
};

/// Credit earned points subject to the daily cap. Whatever exceeds the remaining
/// allowance is dropped; returns what was actually credited.
pub fn award_points(user: &mut UserState, amount: i64, now: DateTime<Utc>) -> i64 {
    if is_expired(user.last_points_reset, points_window(), now) {
        user.daily_earned_points = 0;
        user.last_points_reset = Some(now);
    }

    let remaining = (DAILY_POINTS_CAP - user.daily_earned_points).max(0);
    let credited = amount.min(remaining);
    if credited <= 0 {
        return 0;
    }

    user.points += credited;
    user.daily_earned_points += credited;
    credited
}

/// Daily claim: 3 points (6 for members), once per 24h
pub fn claim_daily_points(user: &mut UserState, now: DateTime<Utc>) -> Result<i64, Rejection> {
    if !is_expired(user.last_claimed_points, claim_window(), now) {
        return Err(Rejection::CooldownActive {
            available_at: next_available(user.last_claimed_points, claim_window()).unwrap_or(now),
        });
    }

    let amount = if user.is_premium {
        PREMIUM_DAILY_CLAIM_POINTS
    } else {
        DAILY_CLAIM_POINTS
    };
    let credited = award_points(user, amount, now);
    user.last_claimed_points = Some(now);
    Ok(credited)
}

/// Whether the user agreed to lose their oldest coupon
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionConsent {
    NotGiven,
    Confirmed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpinOutcome {
    pub coupon: Coupon,
    pub evicted: Vec<Coupon>,
}

/// Spend points on a coupon draw. `roll` is uniform in [0, 100).
pub fn spin_for_coupon(
    user: &mut UserState,
    coupons: &mut Vec<Coupon>,
    consent: EvictionConsent,
    roll: f64,
    coupon_id: String,
) -> Result<SpinOutcome, Rejection> {
    if user.points < SPIN_COST {
        return Err(Rejection::InsufficientFunds {
            required: SPIN_COST,
            available: user.points,
        });
    }

    let unused_count = coupon::unused(coupons).count();
    if unused_count >= MAX_UNUSED_COUPONS && consent != EvictionConsent::Confirmed {
        // Full slots: nothing changes until the user confirms
        let oldest = coupon::unused(coupons)
            .next()
            .cloned()
            .unwrap_or_else(|| Coupon::new("", 0));
        return Err(Rejection::StaleEviction {
            oldest_id: oldest.id,
            oldest_value: oldest.value,
        });
    }

    let mut evicted = Vec::new();
    while coupon::unused(coupons).count() >= MAX_UNUSED_COUPONS {
        match coupons.iter().position(|c| !c.used) {
            Some(index) => evicted.push(coupons.remove(index)),
            None => break,
        }
    }

    user.points -= SPIN_COST;
    let won = Coupon::new(coupon_id, Coupon::draw_value(roll));
    coupons.push(won.clone());

    Ok(SpinOutcome {
        coupon: won,
        evicted,
    })
}

/// Periodic membership reward: first after 25h of membership, then yearly.
/// Rewards are not subject to the daily earning cap.
pub fn membership_reward_tick(user: &mut UserState, now: DateTime<Utc>) -> Option<i64> {
    if !user.is_premium {
        return None;
    }

    let due = match user.last_membership_reward_date {
        None => has_elapsed(user.membership_start_date, initial_membership_window(), now),
        Some(last) => has_elapsed(Some(last), annual_membership_window(), now),
    };
    if !due {
        return None;
    }

    user.points += MEMBERSHIP_REWARD_POINTS;
    user.last_membership_reward_date = Some(now);
    Some(MEMBERSHIP_REWARD_POINTS)
}

/// Check the daily chapter cap without changing anything
pub fn can_publish_chapter(user: &UserState, now: DateTime<Utc>) -> Result<(), Rejection> {
    if is_expired(user.last_chapter_publish_reset, chapter_window(), now) {
        return Ok(());
    }
    if user.daily_chapters_published >= DAILY_CHAPTER_LIMIT {
        return Err(Rejection::DailyLimitReached {
            limit: DAILY_CHAPTER_LIMIT,
            resets_at: next_available(user.last_chapter_publish_reset, chapter_window())
                .unwrap_or(now),
        });
    }
    Ok(())
}

/// Count a successful publish, opening a new window if the old one expired
pub fn record_chapter_publish(user: &mut UserState, now: DateTime<Utc>) {
    if is_expired(user.last_chapter_publish_reset, chapter_window(), now) {
        user.daily_chapters_published = 0;
        user.last_chapter_publish_reset = Some(now);
    }
    user.daily_chapters_published += 1;
}

/// Buy a cosmetic item with points; owning it already costs nothing
pub fn unlock_item(
    user: &mut UserState,
    maps: &mut UserMaps,
    item_id: &str,
    cost: i64,
) -> Result<bool, Rejection> {
    if maps.unlocked_item_ids.contains(item_id) {
        return Ok(false);
    }
    if user.points < cost {
        return Err(Rejection::InsufficientFunds {
            required: cost,
            available: user.points,
        });
    }
    user.points -= cost;
    maps.unlocked_item_ids.insert(item_id.to_string());
    Ok(true)
}

/// Points bought with money bypass the earning cap
pub fn credit_purchased_points(user: &mut UserState, points: i64) {
    user.points += points.max(0);
}

/// Start (or keep) a membership. Renewals keep the original start date.
pub fn activate_membership(user: &mut UserState, now: DateTime<Utc>) {
    if !user.is_premium || user.membership_start_date.is_none() {
        user.membership_start_date = Some(now);
        user.last_membership_reward_date = None;
    }
    user.is_premium = true;
}

/// Mark an unused coupon as spent, returning its value
pub fn redeem_coupon(coupons: &mut [Coupon], coupon_id: &str) -> Option<u32> {
    let coupon = coupons.iter_mut().find(|c| c.id == coupon_id && !c.used)?;
    coupon.used = true;
    Some(coupon.value)
}

/// A monetization prerequisite the book does not meet yet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement {
    MarkComplete,
    MinChapters,
    MinLikesPerChapter,
    MinDaysPublished,
    NotMonetizedBefore,
    AttemptsRemaining,
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Requirement::MarkComplete => write!(f, "Mark as complete"),
            Requirement::MinChapters => {
                write!(f, "At least {} published chapters", monetization::MIN_CHAPTERS)
            }
            Requirement::MinLikesPerChapter => write!(
                f,
                "At least {} likes on every chapter",
                monetization::MIN_LIKES_PER_CHAPTER
            ),
            Requirement::MinDaysPublished => write!(
                f,
                "Published at least {} days ago",
                monetization::MIN_DAYS_PUBLISHED
            ),
            Requirement::NotMonetizedBefore => write!(f, "Not monetized before"),
            Requirement::AttemptsRemaining => write!(
                f,
                "Fewer than {} monetization attempts",
                monetization::MAX_ATTEMPTS
            ),
        }
    }
}

/// Advisory eligibility report; empty `unmet` means eligible
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Eligibility {
    pub unmet: Vec<Requirement>,
}

impl Eligibility {
    pub fn eligible(&self) -> bool {
        self.unmet.is_empty()
    }

    pub fn reasons(&self) -> Vec<String> {
        self.unmet.iter().map(|r| r.to_string()).collect()
    }
}

pub fn monetization_eligibility(book: &Book, now: DateTime<Utc>) -> Eligibility {
    let mut unmet = Vec::new();

    if !book.is_completed {
        unmet.push(Requirement::MarkComplete);
    }
    if book.published_chapters() < monetization::MIN_CHAPTERS {
        unmet.push(Requirement::MinChapters);
    }
    if book.min_likes_per_chapter() < monetization::MIN_LIKES_PER_CHAPTER {
        unmet.push(Requirement::MinLikesPerChapter);
    }
    let days_published = book
        .published_date
        .map(|published| (now - published).num_days())
        .unwrap_or(0);
    if days_published < monetization::MIN_DAYS_PUBLISHED {
        unmet.push(Requirement::MinDaysPublished);
    }
    if book.was_monetized_before {
        unmet.push(Requirement::NotMonetizedBefore);
    }
    if book.monetization_attempts >= monetization::MAX_ATTEMPTS {
        unmet.push(Requirement::AttemptsRemaining);
    }

    Eligibility { unmet }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::book::Chapter;
    use chrono::{Duration, TimeZone};
    use rand::{Rng, SeedableRng};

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 1, 9, 0, 0).unwrap()
    }

    fn user_with(points: i64) -> UserState {
        UserState {
            points,
            ..UserState::new("u1", "ana", "Ana")
        }
    }

    #[test]
    fn test_award_respects_daily_cap() {
        let mut user = user_with(0);
        let t0 = start();
        let mut total = 0;
        for i in 0..10 {
            total += award_points(&mut user, 4, t0 + Duration::hours(i));
        }
        assert_eq!(total, DAILY_POINTS_CAP);
        assert_eq!(user.points, DAILY_POINTS_CAP);

        // Still inside the window: nothing more
        assert_eq!(award_points(&mut user, 10, t0 + Duration::hours(23)), 0);
        assert_eq!(user.points, DAILY_POINTS_CAP);
    }

    #[test]
    fn test_award_partial_credit_at_margin() {
        let mut user = user_with(0);
        let t0 = start();
        assert_eq!(award_points(&mut user, 20, t0), 20);
        assert_eq!(award_points(&mut user, 20, t0), 5);
        assert_eq!(user.daily_earned_points, 25);
    }

    #[test]
    fn test_award_resets_once_after_window() {
        let mut user = user_with(0);
        let t0 = start();
        award_points(&mut user, 25, t0);

        let later = t0 + Duration::hours(24) + Duration::seconds(1);
        assert_eq!(award_points(&mut user, 10, later), 10);
        assert_eq!(user.last_points_reset, Some(later));

        // The new window is anchored at `later`, so no second reset an hour on
        assert_eq!(award_points(&mut user, 20, later + Duration::hours(1)), 15);
        assert_eq!(user.last_points_reset, Some(later));
        assert_eq!(user.points, 50);
    }

    #[test]
    fn test_award_ignores_non_positive() {
        let mut user = user_with(10);
        assert_eq!(award_points(&mut user, -5, start()), 0);
        assert_eq!(user.points, 10);
    }

    #[test]
    fn test_claim_twice_hits_cooldown() {
        let mut user = user_with(0);
        let t0 = start();
        assert_eq!(claim_daily_points(&mut user, t0), Ok(3));

        let second = claim_daily_points(&mut user, t0 + Duration::hours(5));
        assert_eq!(
            second,
            Err(Rejection::CooldownActive {
                available_at: t0 + Duration::hours(24)
            })
        );
        assert_eq!(user.points, 3);
    }

    #[test]
    fn test_premium_claim_doubles() {
        let mut user = user_with(0);
        user.is_premium = true;
        assert_eq!(claim_daily_points(&mut user, start()), Ok(6));
    }

    #[test]
    fn test_spin_insufficient_funds() {
        let mut user = user_with(140);
        let mut coupons = Vec::new();
        let result = spin_for_coupon(&mut user, &mut coupons, EvictionConsent::Confirmed, 10.0, "c".into());
        assert_eq!(
            result,
            Err(Rejection::InsufficientFunds {
                required: 150,
                available: 140
            })
        );
        assert_eq!(user.points, 140);
        assert!(coupons.is_empty());
    }

    #[test]
    fn test_spin_full_slots_without_consent_changes_nothing() {
        let mut user = user_with(500);
        let mut coupons = vec![Coupon::new("a", 1), Coupon::new("b", 3), Coupon::new("c", 5)];
        let before = coupons.clone();

        let result = spin_for_coupon(&mut user, &mut coupons, EvictionConsent::NotGiven, 50.0, "d".into());
        assert_eq!(
            result,
            Err(Rejection::StaleEviction {
                oldest_id: "a".to_string(),
                oldest_value: 1
            })
        );
        assert_eq!(coupons, before);
        assert_eq!(user.points, 500);
    }

    #[test]
    fn test_spin_with_consent_evicts_oldest_unused() {
        let mut user = user_with(500);
        let mut used = Coupon::new("old-used", 10);
        used.used = true;
        let mut coupons = vec![used, Coupon::new("a", 1), Coupon::new("b", 3), Coupon::new("c", 5)];

        let outcome =
            spin_for_coupon(&mut user, &mut coupons, EvictionConsent::Confirmed, 99.0, "d".into()).unwrap();
        assert_eq!(outcome.evicted, vec![Coupon::new("a", 1)]);
        assert_eq!(outcome.coupon, Coupon::new("d", 10));
        assert_eq!(coupon::unused(&coupons).count(), 3);
        assert_eq!(
            coupons.iter().map(|c| c.id.as_str()).collect::<Vec<_>>(),
            vec!["old-used", "b", "c", "d"]
        );
        assert_eq!(user.points, 350);
    }

    #[test]
    fn test_spin_distribution() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(0x5eed);
        let draws = 100_000;
        let mut counts = [0u32; 4];
        for _ in 0..draws {
            let index = match Coupon::draw_value(rng.random_range(0.0..100.0)) {
                1 => 0,
                3 => 1,
                5 => 2,
                _ => 3,
            };
            counts[index] += 1;
        }

        let expected = [0.84, 0.09, 0.05, 0.02];
        for (count, p) in counts.iter().zip(expected) {
            let observed = *count as f64 / draws as f64;
            // ~5 standard deviations at n = 100k
            assert!((observed - p).abs() < 0.006, "observed {} expected {}", observed, p);
        }
    }

    #[test]
    fn test_membership_rewards_cadence() {
        let t0 = start();
        let mut user = user_with(0);
        user.is_premium = true;
        user.membership_start_date = Some(t0);

        assert_eq!(membership_reward_tick(&mut user, t0 + Duration::hours(24)), None);
        let first = t0 + Duration::hours(25);
        assert_eq!(membership_reward_tick(&mut user, first), Some(MEMBERSHIP_REWARD_POINTS));
        assert_eq!(membership_reward_tick(&mut user, first + Duration::minutes(1)), None);
        assert_eq!(membership_reward_tick(&mut user, first + Duration::days(364)), None);
        assert_eq!(
            membership_reward_tick(&mut user, first + Duration::days(365)),
            Some(MEMBERSHIP_REWARD_POINTS)
        );
        assert_eq!(user.points, 2 * MEMBERSHIP_REWARD_POINTS);
    }

    #[test]
    fn test_membership_tick_ignores_non_members() {
        let mut user = user_with(0);
        user.membership_start_date = Some(start());
        assert_eq!(membership_reward_tick(&mut user, start() + Duration::days(30)), None);
    }

    #[test]
    fn test_seven_chapters_per_window() {
        let mut user = user_with(0);
        let t0 = start();
        for i in 0..7 {
            let now = t0 + Duration::minutes(i);
            assert!(can_publish_chapter(&user, now).is_ok());
            record_chapter_publish(&mut user, now);
        }

        let eighth = can_publish_chapter(&user, t0 + Duration::hours(2));
        assert_eq!(
            eighth,
            Err(Rejection::DailyLimitReached {
                limit: DAILY_CHAPTER_LIMIT,
                resets_at: t0 + Duration::hours(24)
            })
        );

        let next_day = t0 + Duration::hours(25);
        assert!(can_publish_chapter(&user, next_day).is_ok());
        record_chapter_publish(&mut user, next_day);
        assert_eq!(user.daily_chapters_published, 1);
        assert_eq!(user.last_chapter_publish_reset, Some(next_day));
    }

    #[test]
    fn test_unlock_item() {
        let mut user = user_with(100);
        let mut maps = UserMaps::default();
        assert_eq!(unlock_item(&mut user, &mut maps, "hat", 60), Ok(true));
        assert_eq!(unlock_item(&mut user, &mut maps, "hat", 60), Ok(false));
        assert!(matches!(
            unlock_item(&mut user, &mut maps, "cape", 60),
            Err(Rejection::InsufficientFunds { .. })
        ));
        assert_eq!(user.points, 40);
    }

    #[test]
    fn test_activate_membership_keeps_start_on_renewal() {
        let mut user = user_with(0);
        let t0 = start();
        activate_membership(&mut user, t0);
        activate_membership(&mut user, t0 + Duration::days(10));
        assert!(user.is_premium);
        assert_eq!(user.membership_start_date, Some(t0));
    }

    #[test]
    fn test_redeem_coupon_once() {
        let mut coupons = vec![Coupon::new("a", 5)];
        assert_eq!(redeem_coupon(&mut coupons, "a"), Some(5));
        assert_eq!(redeem_coupon(&mut coupons, "a"), None);
    }

    fn chapters(n: usize) -> Vec<Chapter> {
        (0..n)
            .map(|i| Chapter {
                id: format!("ch{}", i),
                title: format!("Chapter {}", i + 1),
                is_published: true,
            })
            .collect()
    }

    #[test]
    fn test_incomplete_short_book_not_eligible() {
        let book = Book {
            id: "b1".to_string(),
            chapters: chapters(3),
            likes: vec![100, 100, 100],
            is_completed: false,
            published_date: Some(start() - Duration::days(60)),
            ..Default::default()
        };
        let report = monetization_eligibility(&book, start());
        assert!(!report.eligible());
        let reasons = report.reasons();
        assert!(reasons.contains(&"Mark as complete".to_string()));
        assert!(reasons.contains(&"At least 5 published chapters".to_string()));
    }

    #[test]
    fn test_eligible_book() {
        let book = Book {
            id: "b2".to_string(),
            chapters: chapters(6),
            likes: vec![50; 6],
            is_completed: true,
            published_date: Some(start() - Duration::days(21)),
            monetization_attempts: 1,
            ..Default::default()
        };
        assert!(monetization_eligibility(&book, start()).eligible());
    }

    #[test]
    fn test_every_rule_reported() {
        let book = Book {
            chapters: chapters(5),
            likes: vec![50, 50, 49, 50, 50],
            is_completed: true,
            published_date: None,
            was_monetized_before: true,
            monetization_attempts: 2,
            ..Default::default()
        };
        let report = monetization_eligibility(&book, start());
        assert_eq!(
            report.unmet,
            vec![
                Requirement::MinLikesPerChapter,
                Requirement::MinDaysPublished,
                Requirement::NotMonetizedBefore,
                Requirement::AttemptsRemaining
            ]
        );
    }
}
