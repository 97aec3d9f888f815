//! Time & Zone Utilities.
//!
//! Every scheduling decision in this crate goes through here so that DST
//! gaps/folds are handled in exactly one place. Grounded on the next-tick
//! computation in the teacher's scheduler, generalized from a fixed list of
//! daily times to "next occurrence of a single time of day, or of a day of
//! the month".

use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;

use crate::error::ZoneError;

pub fn parse_timezone(tz: &str) -> Result<Tz, ZoneError> {
    tz.parse::<Tz>().map_err(|_| ZoneError::UnknownTimezone(tz.to_string()))
}

pub fn parse_time_of_day(s: &str) -> Result<NaiveTime, ZoneError> {
    NaiveTime::parse_from_str(s, "%H:%M").map_err(|_| ZoneError::InvalidTimeOfDay(s.to_string()))
}

/// The current instant, expressed as a local date + time in `tz`.
pub fn now_in_zone(tz: Tz) -> DateTime<Tz> {
    Utc::now().with_timezone(&tz)
}

/// The local calendar date for `instant` in `tz`.
pub fn local_date(instant: DateTime<Utc>, tz: Tz) -> NaiveDate {
    instant.with_timezone(&tz).date_naive()
}

/// Resolve a local (date, time) pair to a UTC instant, handling the spring-forward
/// gap by taking the earliest valid instant (the local wall-clock time technically
/// does not exist, so we treat it as if the clock had already jumped).
fn resolve_local(tz: Tz, date: NaiveDate, time: NaiveTime) -> Option<DateTime<Utc>> {
    tz.from_local_datetime(&date.and_time(time))
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
}

/// The next UTC instant at or after `after` at which the local wall-clock time in
/// `tz` equals `time`. Looks up to 4 days ahead to step past DST gaps where the
/// requested wall-clock time doesn't exist on a given day.
pub fn next_local_time_at_or_after(tz: Tz, time: NaiveTime, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let after_local = after.with_timezone(&tz);
    let start_date = after_local.date_naive();

    for day_offset in 0..4i64 {
        let date = start_date + chrono::Duration::days(day_offset);
        if let Some(candidate) = resolve_local(tz, date, time)
            && candidate >= after
        {
            return Some(candidate);
        }
    }
    None
}

/// The next UTC instant strictly after `after` at which the local wall-clock time
/// in `tz` equals `time` (used for "next day's occurrence", as opposed to
/// "today's, if still upcoming").
pub fn next_local_time_after(tz: Tz, time: NaiveTime, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let after_local = after.with_timezone(&tz);
    let start_date = after_local.date_naive();

    for day_offset in 0..4i64 {
        let date = start_date + chrono::Duration::days(day_offset);
        if let Some(candidate) = resolve_local(tz, date, time)
            && candidate > after
        {
            return Some(candidate);
        }
    }
    None
}

/// The next UTC instant strictly after `after` at which it is `time` local on the
/// `day_of_month`-th day of some month (clamped to the last day of short months),
/// used by custom reminders configured with a monthly cadence instead of a daily one.
pub fn next_monthly_time_after(tz: Tz, time: NaiveTime, day_of_month: u32, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let after_local = after.with_timezone(&tz);
    let mut year = after_local.year();
    let mut month = after_local.month();

    for _ in 0..13 {
        let last_day = days_in_month(year, month);
        let target_day = day_of_month.min(last_day);
        if let Some(date) = NaiveDate::from_ymd_opt(year, month, target_day)
            && let Some(candidate) = resolve_local(tz, date, time)
            && candidate > after
        {
            return Some(candidate);
        }
        if month == 12 {
            month = 1;
            year += 1;
        } else {
            month += 1;
        }
    }
    None
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .unwrap()
        .pred_opt()
        .unwrap()
        .day()
}

/// Is `now` within `window_minutes` after `target` local time today, accounting
/// for wraparound at midnight? Mirrors the dispatch-window check the ticker uses
/// to decide whether a tick that fires late (process restart, clock drift) is
/// still within tolerance rather than skipped entirely.
pub fn within_dispatch_window(now_local_minutes: i64, target_minutes: i64, window_minutes: i64) -> bool {
    let delta = (now_local_minutes - target_minutes).rem_euclid(24 * 60);
    delta < window_minutes
}

pub fn minutes_since_midnight(time: NaiveTime) -> i64 {
    time.num_seconds_from_midnight() as i64 / 60
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone as _;

    #[test]
    fn next_local_time_steps_past_dst_spring_forward_gap() {
        // America/New_York: 2024-03-10 clocks jump 02:00 -> 03:00, so 02:30 doesn't exist.
        let tz: Tz = "America/New_York".parse().unwrap();
        let time = NaiveTime::from_hms_opt(2, 30, 0).unwrap();
        let after = Utc.with_ymd_and_hms(2024, 3, 9, 12, 0, 0).unwrap();
        let next = next_local_time_at_or_after(tz, time, after).expect("resolves despite DST gap");
        let local = next.with_timezone(&tz);
        // Either lands on the 9th (before the gap) or skips to the 11th.
        assert!(local.date_naive() == NaiveDate::from_ymd_opt(2024, 3, 9).unwrap() || local.date_naive().day() >= 10);
    }

    #[test]
    fn within_dispatch_window_handles_midnight_wraparound() {
        // target 23:55, now 00:02 next day => delta = 7 minutes, within a 10 minute window
        assert!(within_dispatch_window(2, 23 * 60 + 55, 10));
        assert!(!within_dispatch_window(23 * 60, 7 * 60, 10));
    }

    #[test]
    fn next_monthly_time_clamps_to_last_day_of_short_month() {
        let tz: Tz = "UTC".parse().unwrap();
        let time = NaiveTime::from_hms_opt(9, 0, 0).unwrap();
        let after = Utc.with_ymd_and_hms(2025, 1, 31, 10, 0, 0).unwrap();
        let next = next_monthly_time_after(tz, time, 31, after).unwrap();
        // February has no 31st -> clamps to the 28th (2025 is not a leap year).
        assert_eq!(next.with_timezone(&tz).date_naive(), NaiveDate::from_ymd_opt(2025, 2, 28).unwrap());
    }
}
