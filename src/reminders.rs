//! Custom Reminder Service.
//!
//! CRUD plus the next-fire computation, ported from the original system's
//! `compute_next_fire_utc`: daily-at-a-time-of-day by default, or
//! monthly-on-a-day when `day_of_month` is set (clamped to the last day of
//! short months). Both paths go through the DST-safe helpers in
//! [`crate::time_zone`].

use anyhow::Result;
use chrono::{NaiveDate, NaiveDateTime, Utc};
use chrono_tz::Tz;
use sqlx::SqlitePool;

use crate::error::ReminderError;
use crate::models::CustomReminder;
use crate::store;
use crate::time_zone;

// These bounds govern the User entity's built-in morning-reminder cadence
// (settings endpoint / /set_interval, /set_attempts chat commands).
pub const MIN_INTERVAL_MINUTES: i64 = 5;
pub const MAX_INTERVAL_MINUTES: i64 = 720;
pub const MIN_MAX_ATTEMPTS: i64 = 0;
pub const MAX_MAX_ATTEMPTS: i64 = 10;

// CustomReminder rows have their own, wider range — a user-defined reminder
// can be far more frequent or far rarer than the fixed morning nudge.
pub const MIN_CUSTOM_INTERVAL_MINUTES: i64 = 1;
pub const MAX_CUSTOM_INTERVAL_MINUTES: i64 = 1440;
pub const MIN_CUSTOM_MAX_ATTEMPTS: i64 = 1;
pub const MAX_CUSTOM_MAX_ATTEMPTS: i64 = 50;

/// Next UTC fire instant and the local calendar date it corresponds to.
pub fn compute_next_fire(tz: Tz, time_of_day: chrono::NaiveTime, day_of_month: Option<u32>, after: chrono::DateTime<Utc>) -> (NaiveDateTime, NaiveDate) {
    let next = match day_of_month {
        None => time_zone::next_local_time_after(tz, time_of_day, after),
        Some(dom) => time_zone::next_monthly_time_after(tz, time_of_day, dom, after),
    };
    // next_local_time_after/next_monthly_time_after only return None if the
    // timezone's DST table is exhausted within the lookahead window, which
    // does not happen for any real IANA zone; falling back to +1 day keeps
    // the reminder alive rather than panicking.
    let next = next.unwrap_or_else(|| after + chrono::Duration::days(1));
    (next.naive_utc(), time_zone::local_date(next, tz))
}

/// Validates the User entity's built-in morning-reminder interval.
pub fn validate_interval(minutes: i64) -> Result<(), ReminderError> {
    if !(MIN_INTERVAL_MINUTES..=MAX_INTERVAL_MINUTES).contains(&minutes) {
        return Err(ReminderError::IntervalOutOfRange { min: MIN_INTERVAL_MINUTES, max: MAX_INTERVAL_MINUTES });
    }
    Ok(())
}

/// Validates the User entity's built-in morning-reminder max-attempts.
pub fn validate_max_attempts(attempts: i64) -> Result<(), ReminderError> {
    if !(MIN_MAX_ATTEMPTS..=MAX_MAX_ATTEMPTS).contains(&attempts) {
        return Err(ReminderError::MaxAttemptsOutOfRange { min: MIN_MAX_ATTEMPTS, max: MAX_MAX_ATTEMPTS });
    }
    Ok(())
}

/// Validates a CustomReminder's repeat interval (wider range than the
/// built-in morning reminder — these are user-defined and can run far
/// more or less often).
pub fn validate_custom_interval(minutes: i64) -> Result<(), ReminderError> {
    if !(MIN_CUSTOM_INTERVAL_MINUTES..=MAX_CUSTOM_INTERVAL_MINUTES).contains(&minutes) {
        return Err(ReminderError::IntervalOutOfRange { min: MIN_CUSTOM_INTERVAL_MINUTES, max: MAX_CUSTOM_INTERVAL_MINUTES });
    }
    Ok(())
}

/// Validates a CustomReminder's daily max-attempts.
pub fn validate_custom_max_attempts(attempts: i64) -> Result<(), ReminderError> {
    if !(MIN_CUSTOM_MAX_ATTEMPTS..=MAX_CUSTOM_MAX_ATTEMPTS).contains(&attempts) {
        return Err(ReminderError::MaxAttemptsOutOfRange { min: MIN_CUSTOM_MAX_ATTEMPTS, max: MAX_CUSTOM_MAX_ATTEMPTS });
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub async fn add_reminder(
    pool: &SqlitePool,
    user_id: i64,
    user_tz: Tz,
    time_of_day: chrono::NaiveTime,
    description: &str,
    repeat_interval_minutes: i64,
    max_attempts_per_day: i64,
    day_of_month: Option<i64>,
) -> Result<i64> {
    validate_custom_interval(repeat_interval_minutes)?;
    validate_custom_max_attempts(max_attempts_per_day)?;
    if let Some(dom) = day_of_month
        && !(1..=31).contains(&dom)
    {
        return Err(ReminderError::DayOfMonthOutOfRange.into());
    }

    let (next_fire_utc, cycle_date) =
        compute_next_fire(user_tz, time_of_day, day_of_month.map(|d| d as u32), Utc::now());

    let time_str = time_of_day.format("%H:%M").to_string();
    store::insert_custom_reminder(
        pool,
        user_id,
        &time_str,
        day_of_month,
        description,
        repeat_interval_minutes,
        max_attempts_per_day,
        next_fire_utc,
        cycle_date,
    )
    .await
}

pub async fn list_for_user(pool: &SqlitePool, user_id: i64) -> Result<Vec<CustomReminder>> {
    store::list_custom_reminders(pool, user_id).await
}

pub async fn delete(pool: &SqlitePool, reminder_id: i64, user_id: i64) -> Result<bool> {
    store::delete_custom_reminder(pool, reminder_id, user_id).await
}

pub async fn toggle(pool: &SqlitePool, reminder_id: i64, user_id: i64, enabled: bool, user_tz: Tz) -> Result<bool> {
    let toggled = store::set_custom_reminder_enabled(pool, reminder_id, user_id, enabled).await?;
    if toggled && enabled {
        // Re-enabling needs a fresh schedule: the reminder may have sat
        // disabled long enough that its stored next_fire_at_utc is in the past.
        if let Some(reminder) = store::get_custom_reminder(pool, reminder_id).await? {
            let time = time_zone::parse_time_of_day(&reminder.time_of_day).unwrap_or(chrono::NaiveTime::MIN);
            let (next_fire, cycle_date) =
                compute_next_fire(user_tz, time, reminder.day_of_month.map(|d| d as u32), Utc::now());
            store::reschedule_custom_reminder(pool, reminder_id, next_fire, cycle_date, 0, false).await?;
        }
    }
    Ok(toggled)
}

/// Mark the reminder's cycle complete for today/this-month and roll its
/// next_fire_at_utc forward, clearing any stale lease.
pub async fn mark_done(pool: &SqlitePool, reminder_id: i64, user_id: i64, user_tz: Tz) -> Result<bool> {
    let Some(reminder) = store::get_custom_reminder(pool, reminder_id).await? else {
        return Ok(false);
    };
    if reminder.user_id != user_id {
        return Ok(false);
    }
    let time = time_zone::parse_time_of_day(&reminder.time_of_day).unwrap_or(chrono::NaiveTime::MIN);
    let (next_fire, cycle_date) = compute_next_fire(user_tz, time, reminder.day_of_month.map(|d| d as u32), Utc::now());
    store::reschedule_custom_reminder(pool, reminder_id, next_fire, cycle_date, 0, true).await?;
    Ok(true)
}

/// Updates whichever fields are `Some`. A change to `time_of_day` or
/// `day_of_month` computes a fresh `next_fire_at_utc` and resets the
/// day's attempt count, matching what re-enabling a reminder already does.
#[allow(clippy::too_many_arguments)]
pub async fn update(
    pool: &SqlitePool,
    reminder_id: i64,
    user_id: i64,
    user_tz: Tz,
    time_of_day: Option<chrono::NaiveTime>,
    day_of_month: Option<i64>,
    description: Option<&str>,
    repeat_interval_minutes: Option<i64>,
    max_attempts_per_day: Option<i64>,
    enabled: Option<bool>,
) -> Result<bool> {
    if let Some(minutes) = repeat_interval_minutes {
        validate_custom_interval(minutes)?;
    }
    if let Some(attempts) = max_attempts_per_day {
        validate_custom_max_attempts(attempts)?;
    }
    if let Some(dom) = day_of_month
        && !(1..=31).contains(&dom)
    {
        return Err(ReminderError::DayOfMonthOutOfRange.into());
    }

    let reschedule_needed = time_of_day.is_some() || day_of_month.is_some();
    let time_str = time_of_day.map(|t| t.format("%H:%M").to_string());
    let updated = store::update_custom_reminder(
        pool,
        reminder_id,
        user_id,
        time_str.as_deref(),
        day_of_month,
        description,
        repeat_interval_minutes,
        max_attempts_per_day,
    )
    .await?;
    if !updated {
        return Ok(false);
    }

    if let Some(enabled) = enabled {
        store::set_custom_reminder_enabled(pool, reminder_id, user_id, enabled).await?;
    }

    if reschedule_needed
        && let Some(reminder) = store::get_custom_reminder(pool, reminder_id).await?
    {
        let time = time_zone::parse_time_of_day(&reminder.time_of_day).unwrap_or(chrono::NaiveTime::MIN);
        let (next_fire, cycle_date) = compute_next_fire(user_tz, time, reminder.day_of_month.map(|d| d as u32), Utc::now());
        store::reschedule_custom_reminder(pool, reminder_id, next_fire, cycle_date, 0, false).await?;
    }

    Ok(true)
}

pub struct ReminderStats {
    pub total: i64,
    pub enabled: i64,
    pub disabled: i64,
    pub done_today: i64,
    pub sent_today: i64,
}

pub async fn stats(pool: &SqlitePool, user_id: i64) -> Result<ReminderStats> {
    let reminders = store::list_custom_reminders(pool, user_id).await?;
    let total = reminders.len() as i64;
    let enabled = reminders.iter().filter(|r| r.enabled).count() as i64;
    let done_today = reminders.iter().filter(|r| r.done_today).count() as i64;
    let sent_today = reminders.iter().map(|r| r.attempts_sent_today).sum();
    Ok(ReminderStats { total, enabled, disabled: total - enabled, done_today, sent_today })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn compute_next_fire_daily_rolls_to_tomorrow_when_time_passed() {
        let tz: Tz = "UTC".parse().unwrap();
        let after = Utc.with_ymd_and_hms(2026, 7, 28, 10, 0, 0).unwrap();
        let time = chrono::NaiveTime::from_hms_opt(9, 0, 0).unwrap();
        let (next, date) = compute_next_fire(tz, time, None, after);
        assert_eq!(date, NaiveDate::from_ymd_opt(2026, 7, 29).unwrap());
        assert_eq!(next.date(), date);
    }

    #[test]
    fn compute_next_fire_daily_stays_today_when_time_upcoming() {
        let tz: Tz = "UTC".parse().unwrap();
        let after = Utc.with_ymd_and_hms(2026, 7, 28, 6, 0, 0).unwrap();
        let time = chrono::NaiveTime::from_hms_opt(9, 0, 0).unwrap();
        let (_, date) = compute_next_fire(tz, time, None, after);
        assert_eq!(date, NaiveDate::from_ymd_opt(2026, 7, 28).unwrap());
    }

    #[test]
    fn validate_interval_rejects_out_of_range() {
        assert!(validate_interval(1).is_err());
        assert!(validate_interval(30).is_ok());
        assert!(validate_interval(1000).is_err());
    }

    #[test]
    fn custom_reminder_bounds_are_wider_than_morning_reminder_bounds() {
        assert!(validate_custom_interval(1).is_ok());
        assert!(validate_custom_interval(1440).is_ok());
        assert!(validate_custom_interval(0).is_err());
        assert!(validate_custom_interval(1441).is_err());

        assert!(validate_custom_max_attempts(1).is_ok());
        assert!(validate_custom_max_attempts(50).is_ok());
        assert!(validate_custom_max_attempts(0).is_err());
        assert!(validate_custom_max_attempts(51).is_err());
    }
}
