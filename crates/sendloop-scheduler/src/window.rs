//! Window gate — pure decisions about the daily delivery window.
//!
//! A window restricts delivery to a time-of-day range at minute
//! resolution. `start > end` wraps across midnight (22:00–06:00 means
//! "late evening through early morning").

use std::time::Duration;

use chrono::{NaiveTime, Timelike};

const DAY_SECS: u64 = 86_400;

/// Whether `now` falls inside the window. No window → always inside.
pub fn in_window(now: NaiveTime, start: Option<NaiveTime>, end: Option<NaiveTime>) -> bool {
    let (Some(start), Some(end)) = (start, end) else {
        return true;
    };
    let now = minute_of_day(now);
    let start = minute_of_day(start);
    let end = minute_of_day(end);
    if start <= end {
        start <= now && now <= end
    } else {
        // Overnight wrap.
        now >= start || now <= end
    }
}

/// Shortest forward duration from `now` until the window opens; zero when
/// already inside.
pub fn delay_until_window(
    now: NaiveTime,
    start: Option<NaiveTime>,
    end: Option<NaiveTime>,
) -> Duration {
    let (Some(start), Some(end)) = (start, end) else {
        return Duration::ZERO;
    };
    if in_window(now, Some(start), Some(end)) {
        return Duration::ZERO;
    }
    let now_secs = minute_of_day(now) as u64 * 60;
    let start_secs = minute_of_day(start) as u64 * 60;
    Duration::from_secs((start_secs + DAY_SECS - now_secs) % DAY_SECS)
}

/// Minute resolution: seconds are truncated before comparison.
fn minute_of_day(t: NaiveTime) -> u32 {
    t.hour() * 60 + t.minute()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn no_window_is_always_open() {
        assert!(in_window(t(3, 14), None, None));
        assert_eq!(delay_until_window(t(3, 14), None, None), Duration::ZERO);
    }

    #[test]
    fn same_day_window_is_inclusive() {
        let (s, e) = (Some(t(9, 0)), Some(t(17, 0)));
        assert!(in_window(t(9, 0), s, e));
        assert!(in_window(t(12, 30), s, e));
        assert!(in_window(t(17, 0), s, e));
        assert!(!in_window(t(8, 59), s, e));
        assert!(!in_window(t(17, 1), s, e));
    }

    #[test]
    fn overnight_window_wraps_midnight() {
        let (s, e) = (Some(t(22, 0)), Some(t(6, 0)));
        assert!(in_window(t(23, 30), s, e));
        assert!(in_window(t(2, 0), s, e));
        assert!(in_window(t(22, 0), s, e));
        assert!(in_window(t(6, 0), s, e));
        assert!(!in_window(t(10, 0), s, e));
        assert!(!in_window(t(21, 59), s, e));
    }

    #[test]
    fn delay_reaches_start_forward() {
        let (s, e) = (Some(t(22, 0)), Some(t(6, 0)));
        // 10:00 → 22:00 is 12 hours.
        assert_eq!(
            delay_until_window(t(10, 0), s, e),
            Duration::from_secs(12 * 3_600)
        );
        // Inside → zero.
        assert_eq!(delay_until_window(t(23, 0), s, e), Duration::ZERO);

        // Same-day window, now past the end: wait wraps to tomorrow's start.
        let (s, e) = (Some(t(9, 0)), Some(t(10, 0)));
        assert_eq!(
            delay_until_window(t(11, 0), s, e),
            Duration::from_secs(22 * 3_600)
        );
    }

    #[test]
    fn delay_lands_in_window() {
        // Totality: applying the delay to "now" always lands inside.
        let cases = [
            (t(10, 0), t(22, 0), t(6, 0)),
            (t(21, 59), t(22, 0), t(6, 0)),
            (t(11, 0), t(9, 0), t(10, 0)),
            (t(0, 0), t(12, 0), t(13, 0)),
        ];
        for (now, s, e) in cases {
            let delay = delay_until_window(now, Some(s), Some(e));
            let landed_min =
                (minute_of_day(now) as u64 + delay.as_secs() / 60) % (DAY_SECS / 60);
            let landed = NaiveTime::from_hms_opt(
                (landed_min / 60) as u32,
                (landed_min % 60) as u32,
                0,
            )
            .unwrap();
            assert!(
                in_window(landed, Some(s), Some(e)),
                "{now} + {delay:?} should land in {s}–{e}"
            );
        }
    }

    #[test]
    fn seconds_do_not_break_minute_resolution() {
        let now = NaiveTime::from_hms_opt(22, 0, 30).unwrap();
        assert!(in_window(now, Some(t(22, 0)), Some(t(6, 0))));
    }
}
