//! Days-until-expiry arithmetic.
//!
//! Both instants are compared in UTC. Only display strings are converted
//! to a local zone, so the machine's timezone can never shift a secret
//! across a day boundary.

use chrono::{DateTime, Local, TimeZone, Utc};
use std::fmt::Display;

const SECONDS_PER_DAY: i64 = 86_400;
const NANOS_PER_DAY: i64 = SECONDS_PER_DAY * 1_000_000_000;

/// Display format for timestamps in reports.
pub const DISPLAY_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Whole days from `now` until `end`, rounded toward negative infinity.
///
/// `end == now` yields 0. A secret that expired any fraction of a second
/// ago yields -1.
pub fn days_to_expire(end: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    let delta = end - now;
    match delta.num_nanoseconds() {
        Some(nanos) => nanos.div_euclid(NANOS_PER_DAY),
        // Spans beyond ~292 years overflow nanoseconds; whole seconds are exact enough there.
        None => delta.num_seconds().div_euclid(SECONDS_PER_DAY),
    }
}

/// Format a UTC instant in the given zone using [`DISPLAY_FORMAT`].
pub fn format_in<Tz>(instant: DateTime<Utc>, tz: &Tz) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    instant.with_timezone(tz).format(DISPLAY_FORMAT).to_string()
}

/// Format a UTC instant in the machine's local zone.
pub fn format_local(instant: DateTime<Utc>) -> String {
    format_in(instant, &Local)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, FixedOffset};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_same_instant_is_zero() {
        assert_eq!(days_to_expire(now(), now()), 0);
    }

    #[test]
    fn test_future_truncates() {
        assert_eq!(days_to_expire(now() + Duration::days(5), now()), 5);
        assert_eq!(
            days_to_expire(now() + Duration::days(5) + Duration::hours(23), now()),
            5
        );
        assert_eq!(days_to_expire(now() + Duration::hours(23), now()), 0);
    }

    #[test]
    fn test_past_floors() {
        assert_eq!(days_to_expire(now() - Duration::days(10), now()), -10);
        assert_eq!(days_to_expire(now() - Duration::seconds(1), now()), -1);
        assert_eq!(
            days_to_expire(now() - Duration::days(2) - Duration::hours(1), now()),
            -3
        );
    }

    #[test]
    fn test_sub_second_past_is_expired() {
        let now = now() + Duration::milliseconds(700);
        let end = now - Duration::milliseconds(500);
        assert_eq!(days_to_expire(end, now), -1);
        assert_eq!(days_to_expire(now - Duration::nanoseconds(1), now), -1);
        assert_eq!(days_to_expire(now + Duration::milliseconds(500), now), 0);
    }

    #[test]
    fn test_far_future_does_not_overflow() {
        let end = Utc.with_ymd_and_hms(9999, 12, 31, 23, 59, 59).unwrap();
        assert!(days_to_expire(end, now()) > 2_900_000);
    }

    #[test]
    fn test_independent_of_display_zone() {
        let end = Utc.with_ymd_and_hms(2024, 3, 11, 1, 0, 0).unwrap();
        // Shown on the next calendar day, but less than 24 hours remain.
        let east = FixedOffset::east_opt(14 * 3600).unwrap();
        assert_eq!(format_in(end, &east), "2024-03-11 15:00:00");
        assert_eq!(days_to_expire(end, now()), 0);
    }

    #[test]
    fn test_format_in_utc() {
        assert_eq!(format_in(now(), &Utc), "2024-03-10 12:00:00");
    }
}
