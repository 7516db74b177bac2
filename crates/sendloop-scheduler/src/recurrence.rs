//! Recurrence calculator — pure mapping from (anchor, policy, n) to the
//! next fire time or a calendar-trigger specification.
//!
//! Interval policies (`every-n-seconds/minutes/hours/days`) are an
//! absolute-time cadence anchored at `anchor_at`: after downtime the next
//! fire is the first multiple of the period past "now", so the schedule is
//! reproducible from persisted state alone — a naive "now + period" timer
//! would silently change the cadence on every restart.

use chrono::{DateTime, Datelike, Duration, NaiveTime, TimeZone, Timelike, Utc, Weekday};

use sendloop_core::error::{Result, SendloopError};

use crate::job::RepeatPolicy;

/// Result of a next-fire computation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextFire {
    /// A single absolute instant (once / interval policies).
    At(DateTime<Utc>),
    /// A recurring calendar trigger (daily / weekly / monthly shapes).
    Calendar(CalendarSpec),
}

/// A clock-time-of-day recurrence derived from the anchor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalendarSpec {
    /// Fire at this time of day.
    pub time_of_day: NaiveTime,
    /// Weekly: fire on this weekday only.
    pub weekday: Option<Weekday>,
    /// Monthly shapes: fire on this day of month. Months lacking the day
    /// (29–31) are skipped, not re-mapped to month end.
    pub day_of_month: Option<u32>,
    /// Months between firings; 1 for `monthly`, N for `every-n-months`,
    /// 0 for daily/weekly.
    pub month_step: u32,
    /// Anchor month index (year × 12 + month0): stepped cadences count
    /// from here.
    anchor_month: i32,
}

/// Compute the next fire for a job's recurrence shape.
pub fn compute_next_fire(
    anchor: DateTime<Utc>,
    policy: RepeatPolicy,
    interval_n: u32,
    now: DateTime<Utc>,
) -> Result<NextFire> {
    match policy {
        // Past anchors still fire immediately ("catch up once") — the
        // engine does not sleep for instants already behind it.
        RepeatPolicy::Once => Ok(NextFire::At(anchor)),

        RepeatPolicy::EverySeconds => interval_fire(anchor, interval_n, 1, now),
        RepeatPolicy::EveryMinutes => interval_fire(anchor, interval_n, 60, now),
        RepeatPolicy::EveryHours => interval_fire(anchor, interval_n, 3_600, now),
        RepeatPolicy::EveryDays => interval_fire(anchor, interval_n, 86_400, now),

        RepeatPolicy::Daily => Ok(NextFire::Calendar(CalendarSpec {
            time_of_day: anchor.time(),
            weekday: None,
            day_of_month: None,
            month_step: 0,
            anchor_month: month_index(anchor),
        })),
        RepeatPolicy::Weekly => Ok(NextFire::Calendar(CalendarSpec {
            time_of_day: anchor.time(),
            weekday: Some(anchor.weekday()),
            day_of_month: None,
            month_step: 0,
            anchor_month: month_index(anchor),
        })),
        RepeatPolicy::Monthly => Ok(NextFire::Calendar(CalendarSpec {
            time_of_day: anchor.time(),
            weekday: None,
            day_of_month: Some(anchor.day()),
            month_step: 1,
            anchor_month: month_index(anchor),
        })),
        RepeatPolicy::EveryMonths => {
            if interval_n < 1 {
                return Err(SendloopError::validation("interval_n must be >= 1"));
            }
            Ok(NextFire::Calendar(CalendarSpec {
                time_of_day: anchor.time(),
                weekday: None,
                day_of_month: Some(anchor.day()),
                month_step: interval_n,
                anchor_month: month_index(anchor),
            }))
        }
    }
}

/// Anchored cadence: first multiple of the period strictly after `now`.
fn interval_fire(
    anchor: DateTime<Utc>,
    interval_n: u32,
    unit_secs: i64,
    now: DateTime<Utc>,
) -> Result<NextFire> {
    if interval_n < 1 {
        return Err(SendloopError::validation("interval_n must be >= 1"));
    }
    let period = interval_n as i64 * unit_secs;
    if anchor > now {
        return Ok(NextFire::At(anchor));
    }
    let elapsed = (now - anchor).num_seconds();
    let k = elapsed / period + 1;
    Ok(NextFire::At(anchor + Duration::seconds(k * period)))
}

impl CalendarSpec {
    /// First occurrence strictly after `after`, or `None` when no valid
    /// occurrence exists in a bounded horizon (can only happen for
    /// impossible day-of-month values).
    pub fn next_occurrence(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if let Some(dom) = self.day_of_month {
            return self.next_monthly(dom, after);
        }
        if let Some(weekday) = self.weekday {
            // At most 8 candidate days covers "later today" through the
            // same weekday next week.
            for offset in 0..=7 {
                let date = after.date_naive() + Duration::days(offset);
                if date.weekday() != weekday {
                    continue;
                }
                if let Some(candidate) = at_time(date.year(), date.month(), date.day(), self.time_of_day) {
                    if candidate > after {
                        return Some(candidate);
                    }
                }
            }
            return None;
        }
        // Daily: today at the anchor's clock time, else tomorrow.
        let today = after.date_naive();
        if let Some(candidate) = at_time(today.year(), today.month(), today.day(), self.time_of_day)
        {
            if candidate > after {
                return Some(candidate);
            }
        }
        let tomorrow = today + Duration::days(1);
        at_time(
            tomorrow.year(),
            tomorrow.month(),
            tomorrow.day(),
            self.time_of_day,
        )
    }

    fn next_monthly(&self, dom: u32, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let step = self.month_step.max(1) as i32;
        let mut idx = month_index(after).max(self.anchor_month);
        // Align to the anchored month cadence.
        let rem = (idx - self.anchor_month).rem_euclid(step);
        if rem != 0 {
            idx += step - rem;
        }
        // Day 29–31 skips months lacking that day, so bound the scan
        // generously: 8 years of candidate months always contains a leap
        // February and every long month.
        for _ in 0..(96 / step.max(1) + 2) {
            let (year, month) = from_month_index(idx);
            if let Some(candidate) = at_time(year, month, dom, self.time_of_day) {
                if candidate > after {
                    return Some(candidate);
                }
            }
            idx += step;
        }
        None
    }
}

fn month_index(dt: DateTime<Utc>) -> i32 {
    dt.year() * 12 + dt.month0() as i32
}

fn from_month_index(idx: i32) -> (i32, u32) {
    (idx.div_euclid(12), idx.rem_euclid(12) as u32 + 1)
}

fn at_time(year: i32, month: u32, day: u32, tod: NaiveTime) -> Option<DateTime<Utc>> {
    Utc.with_ymd_and_hms(year, month, day, tod.hour(), tod.minute(), tod.second())
        .single()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn once_returns_anchor_even_in_past() {
        let anchor = at(2026, 3, 1, 9, 0, 0);
        let now = at(2026, 3, 5, 9, 0, 0);
        let fire = compute_next_fire(anchor, RepeatPolicy::Once, 1, now).unwrap();
        assert_eq!(fire, NextFire::At(anchor));
    }

    #[test]
    fn interval_catches_up_to_one_fire() {
        // anchor 12 minutes ago, every 5 minutes → anchor + 15 min
        // (3rd multiple, the first strictly past "now").
        let now = at(2026, 3, 1, 12, 0, 0);
        let anchor = now - Duration::minutes(12);
        let fire = compute_next_fire(anchor, RepeatPolicy::EveryMinutes, 5, now).unwrap();
        assert_eq!(fire, NextFire::At(anchor + Duration::minutes(15)));
    }

    #[test]
    fn interval_is_congruent_to_anchor() {
        let now = at(2026, 3, 1, 12, 0, 0);
        let anchor = now - Duration::seconds(1_000_003);
        let period = 7 * 3_600i64;
        let NextFire::At(fire) =
            compute_next_fire(anchor, RepeatPolicy::EveryHours, 7, now).unwrap()
        else {
            panic!("expected absolute fire time");
        };
        assert!(fire > now);
        assert_eq!((fire - anchor).num_seconds() % period, 0);
    }

    #[test]
    fn interval_exact_multiple_is_strictly_future() {
        let now = at(2026, 3, 1, 12, 0, 0);
        let anchor = now - Duration::seconds(30);
        let fire = compute_next_fire(anchor, RepeatPolicy::EverySeconds, 10, now).unwrap();
        // elapsed is an exact multiple of the period; the next fire must
        // still be after "now", not "now" itself.
        assert_eq!(fire, NextFire::At(now + Duration::seconds(10)));
    }

    #[test]
    fn interval_future_anchor_fires_at_anchor() {
        let now = at(2026, 3, 1, 12, 0, 0);
        let anchor = now + Duration::hours(2);
        let fire = compute_next_fire(anchor, RepeatPolicy::EveryDays, 1, now).unwrap();
        assert_eq!(fire, NextFire::At(anchor));
    }

    #[test]
    fn daily_fires_at_anchor_clock_time() {
        let anchor = at(2026, 1, 10, 8, 30, 0);
        let now = at(2026, 3, 1, 9, 0, 0);
        let NextFire::Calendar(spec) =
            compute_next_fire(anchor, RepeatPolicy::Daily, 1, now).unwrap()
        else {
            panic!("expected calendar spec");
        };
        // 09:00 is past 08:30, so the next occurrence is tomorrow.
        assert_eq!(spec.next_occurrence(now), Some(at(2026, 3, 2, 8, 30, 0)));
        // Before 08:30 it is later the same day.
        let early = at(2026, 3, 1, 7, 0, 0);
        assert_eq!(spec.next_occurrence(early), Some(at(2026, 3, 1, 8, 30, 0)));
    }

    #[test]
    fn weekly_keeps_anchor_weekday() {
        let anchor = at(2026, 3, 2, 10, 0, 0); // a Monday
        assert_eq!(anchor.weekday(), Weekday::Mon);
        let now = at(2026, 3, 4, 12, 0, 0); // Wednesday
        let NextFire::Calendar(spec) =
            compute_next_fire(anchor, RepeatPolicy::Weekly, 1, now).unwrap()
        else {
            panic!("expected calendar spec");
        };
        assert_eq!(spec.next_occurrence(now), Some(at(2026, 3, 9, 10, 0, 0)));
    }

    #[test]
    fn monthly_day_31_skips_short_months() {
        let anchor = at(2026, 1, 31, 9, 0, 0);
        let now = at(2026, 2, 1, 0, 0, 0);
        let NextFire::Calendar(spec) =
            compute_next_fire(anchor, RepeatPolicy::Monthly, 1, now).unwrap()
        else {
            panic!("expected calendar spec");
        };
        // February has no 31st — the next occurrence is March 31, not
        // February 28.
        assert_eq!(spec.next_occurrence(now), Some(at(2026, 3, 31, 9, 0, 0)));
    }

    #[test]
    fn every_n_months_steps_from_anchor() {
        let anchor = at(2026, 1, 15, 9, 0, 0);
        let now = at(2026, 2, 1, 0, 0, 0);
        let NextFire::Calendar(spec) =
            compute_next_fire(anchor, RepeatPolicy::EveryMonths, 3, now).unwrap()
        else {
            panic!("expected calendar spec");
        };
        // Cadence months are Jan, Apr, Jul… — February is not one of them.
        assert_eq!(spec.next_occurrence(now), Some(at(2026, 4, 15, 9, 0, 0)));
    }

    #[test]
    fn zero_interval_is_rejected() {
        let now = Utc::now();
        assert!(compute_next_fire(now, RepeatPolicy::EverySeconds, 0, now).is_err());
        assert!(compute_next_fire(now, RepeatPolicy::EveryMonths, 0, now).is_err());
    }
}
