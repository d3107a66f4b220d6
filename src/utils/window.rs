// Rate-window evaluation
// Every cooldown and cap in the economy is a question about one of these windows

use chrono::{DateTime, Duration, Utc};

/// Daily points-earning cap window
pub fn points_window() -> Duration {
    Duration::hours(24)
}

/// Cooldown between two daily point claims
pub fn claim_window() -> Duration {
    Duration::hours(24)
}

/// Window for the chapter-publish counter
pub fn chapter_window() -> Duration {
    Duration::hours(24)
}

/// Delay before a new member receives the first reward
pub fn initial_membership_window() -> Duration {
    Duration::hours(25)
}

/// Cadence of recurring membership rewards
pub fn annual_membership_window() -> Duration {
    Duration::days(365)
}

/// True if there is no reference instant or more than `window` has passed since it.
pub fn is_expired(reference: Option<DateTime<Utc>>, window: Duration, now: DateTime<Utc>) -> bool {
    match reference {
        None => true,
        Some(at) => now - at > window,
    }
}

/// Like [`is_expired`] but inclusive, and false when there is no reference.
pub fn has_elapsed(reference: Option<DateTime<Utc>>, window: Duration, now: DateTime<Utc>) -> bool {
    match reference {
        None => false,
        Some(at) => now - at >= window,
    }
}

/// First instant at which a window anchored at `reference` is over
pub fn next_available(reference: Option<DateTime<Utc>>, window: Duration) -> Option<DateTime<Utc>> {
    reference.map(|at| at + window)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, hour, 0, 0).unwrap()
    }

    #[test]
    fn test_absent_reference_is_expired() {
        assert!(is_expired(None, points_window(), at(0)));
        assert!(!has_elapsed(None, points_window(), at(0)));
    }

    #[test]
    fn test_boundary_is_exclusive() {
        let start = at(0);
        let exactly = start + Duration::hours(24);
        assert!(!is_expired(Some(start), points_window(), exactly));
        assert!(is_expired(Some(start), points_window(), exactly + Duration::milliseconds(1)));
        assert!(has_elapsed(Some(start), points_window(), exactly));
    }

    #[test]
    fn test_next_available() {
        let start = at(6);
        assert_eq!(
            next_available(Some(start), claim_window()),
            Some(start + Duration::hours(24))
        );
        assert_eq!(next_available(None, claim_window()), None);
    }
}
