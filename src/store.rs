//! State Store Gateway: all SQL for the six entities lives here. Callers never
//! write raw queries outside this module.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use sqlx::SqlitePool;

use crate::models::{CustomReminder, NotificationRecord, Plan, Task, TaskStatusRow, User};

// ── Users ───────────────────────────────────────────────────────────────

pub async fn get_or_create_user(pool: &SqlitePool, telegram_id: i64) -> Result<User> {
    if let Some(user) = get_user_by_telegram_id(pool, telegram_id).await? {
        return Ok(user);
    }

    sqlx::query("INSERT INTO users (telegram_id) VALUES (?) ON CONFLICT(telegram_id) DO NOTHING")
        .bind(telegram_id)
        .execute(pool)
        .await
        .context("inserting user")?;

    get_user_by_telegram_id(pool, telegram_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("user {telegram_id} missing immediately after insert"))
}

pub async fn get_user_by_telegram_id(pool: &SqlitePool, telegram_id: i64) -> Result<Option<User>> {
    let user = sqlx::query_as::<_, User>(
        "SELECT id, telegram_id, timezone, notify_morning_time, notify_evening_time,
                morning_reminder_interval_minutes, morning_reminder_max_attempts,
                onboarding_tz_confirmed, onboarding_morning_confirmed, onboarding_evening_confirmed
         FROM users WHERE telegram_id = ?",
    )
    .bind(telegram_id)
    .fetch_optional(pool)
    .await
    .context("querying user by telegram_id")?;
    Ok(user)
}

pub async fn get_user_by_id(pool: &SqlitePool, user_id: i64) -> Result<Option<User>> {
    let user = sqlx::query_as::<_, User>(
        "SELECT id, telegram_id, timezone, notify_morning_time, notify_evening_time,
                morning_reminder_interval_minutes, morning_reminder_max_attempts,
                onboarding_tz_confirmed, onboarding_morning_confirmed, onboarding_evening_confirmed
         FROM users WHERE id = ?",
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await
    .context("querying user by id")?;
    Ok(user)
}

pub async fn get_all_users(pool: &SqlitePool) -> Result<Vec<User>> {
    let users = sqlx::query_as::<_, User>(
        "SELECT id, telegram_id, timezone, notify_morning_time, notify_evening_time,
                morning_reminder_interval_minutes, morning_reminder_max_attempts,
                onboarding_tz_confirmed, onboarding_morning_confirmed, onboarding_evening_confirmed
         FROM users",
    )
    .fetch_all(pool)
    .await
    .context("querying all users")?;
    Ok(users)
}

#[allow(clippy::too_many_arguments)]
pub async fn update_user_settings(
    pool: &SqlitePool,
    user_id: i64,
    timezone: &str,
    notify_morning_time: &str,
    notify_evening_time: &str,
    morning_reminder_interval_minutes: i64,
    morning_reminder_max_attempts: i64,
) -> Result<()> {
    sqlx::query(
        "UPDATE users SET timezone = ?, notify_morning_time = ?, notify_evening_time = ?,
         morning_reminder_interval_minutes = ?, morning_reminder_max_attempts = ?,
         updated_at = strftime('%Y-%m-%dT%H:%M:%SZ', 'now')
         WHERE id = ?",
    )
    .bind(timezone)
    .bind(notify_morning_time)
    .bind(notify_evening_time)
    .bind(morning_reminder_interval_minutes)
    .bind(morning_reminder_max_attempts)
    .bind(user_id)
    .execute(pool)
    .await
    .context("updating user settings")?;
    Ok(())
}

pub async fn confirm_onboarding_timezone(pool: &SqlitePool, user_id: i64) -> Result<()> {
    sqlx::query("UPDATE users SET onboarding_tz_confirmed = 1 WHERE id = ?")
        .bind(user_id)
        .execute(pool)
        .await
        .context("confirming onboarding timezone")?;
    Ok(())
}

pub async fn confirm_onboarding_morning(pool: &SqlitePool, user_id: i64) -> Result<()> {
    sqlx::query("UPDATE users SET onboarding_morning_confirmed = 1 WHERE id = ?")
        .bind(user_id)
        .execute(pool)
        .await
        .context("confirming onboarding morning time")?;
    Ok(())
}

pub async fn confirm_onboarding_evening(pool: &SqlitePool, user_id: i64) -> Result<()> {
    sqlx::query("UPDATE users SET onboarding_evening_confirmed = 1 WHERE id = ?")
        .bind(user_id)
        .execute(pool)
        .await
        .context("confirming onboarding evening time")?;
    Ok(())
}

// ── Plans & Tasks ───────────────────────────────────────────────────────

pub async fn get_plan(pool: &SqlitePool, user_id: i64, plan_date: NaiveDate) -> Result<Option<Plan>> {
    let plan = sqlx::query_as::<_, Plan>("SELECT id, user_id, plan_date FROM plans WHERE user_id = ? AND plan_date = ?")
        .bind(user_id)
        .bind(plan_date)
        .fetch_optional(pool)
        .await
        .context("querying plan")?;
    Ok(plan)
}

pub async fn get_plan_by_id(pool: &SqlitePool, plan_id: i64) -> Result<Option<Plan>> {
    let plan = sqlx::query_as::<_, Plan>("SELECT id, user_id, plan_date FROM plans WHERE id = ?")
        .bind(plan_id)
        .fetch_optional(pool)
        .await
        .context("querying plan by id")?;
    Ok(plan)
}

/// Replace the plan for `plan_date` (if any) with `task_texts`, in order.
/// Any previously recorded statuses for the old tasks are discarded along
/// with the cascade-deleted task rows.
pub async fn save_plan(pool: &SqlitePool, user_id: i64, plan_date: NaiveDate, task_texts: &[String]) -> Result<i64> {
    let mut tx = pool.begin().await.context("starting plan save transaction")?;

    let existing: Option<(i64,)> = sqlx::query_as("SELECT id FROM plans WHERE user_id = ? AND plan_date = ?")
        .bind(user_id)
        .bind(plan_date)
        .fetch_optional(&mut *tx)
        .await
        .context("checking for existing plan")?;

    let plan_id = if let Some((id,)) = existing {
        sqlx::query("DELETE FROM tasks WHERE plan_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .context("clearing existing tasks")?;
        id
    } else {
        let result = sqlx::query("INSERT INTO plans (user_id, plan_date) VALUES (?, ?)")
            .bind(user_id)
            .bind(plan_date)
            .execute(&mut *tx)
            .await
            .context("inserting plan")?;
        result.last_insert_rowid()
    };

    for (position, text) in task_texts.iter().enumerate() {
        sqlx::query("INSERT INTO tasks (plan_id, position, text) VALUES (?, ?, ?)")
            .bind(plan_id)
            .bind(position as i64)
            .bind(text)
            .execute(&mut *tx)
            .await
            .context("inserting task")?;
    }

    // Every inserted task starts pending.
    let task_ids: Vec<(i64,)> = sqlx::query_as("SELECT id FROM tasks WHERE plan_id = ?")
        .bind(plan_id)
        .fetch_all(&mut *tx)
        .await
        .context("reading back inserted task ids")?;
    for (task_id,) in task_ids {
        sqlx::query("INSERT INTO task_status (task_id, status) VALUES (?, 'pending')")
            .bind(task_id)
            .execute(&mut *tx)
            .await
            .context("seeding task status")?;
    }

    tx.commit().await.context("committing plan save")?;
    Ok(plan_id)
}

/// Plans for a user in a given calendar month, most recent first.
pub async fn list_plans_in_month(pool: &SqlitePool, user_id: i64, year: i32, month: u32) -> Result<Vec<Plan>> {
    let month_str = format!("{year:04}-{month:02}");
    let plans = sqlx::query_as::<_, Plan>(
        "SELECT id, user_id, plan_date FROM plans
         WHERE user_id = ? AND strftime('%Y-%m', plan_date) = ?
         ORDER BY plan_date DESC",
    )
    .bind(user_id)
    .bind(month_str)
    .fetch_all(pool)
    .await
    .context("listing plans for month")?;
    Ok(plans)
}

/// Most recent plans for a user, used for streak computation.
pub async fn list_recent_plans(pool: &SqlitePool, user_id: i64, limit: i64) -> Result<Vec<Plan>> {
    let plans = sqlx::query_as::<_, Plan>(
        "SELECT id, user_id, plan_date FROM plans WHERE user_id = ? ORDER BY plan_date DESC LIMIT ?",
    )
    .bind(user_id)
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("listing recent plans")?;
    Ok(plans)
}

pub async fn get_tasks_for_plan(pool: &SqlitePool, plan_id: i64) -> Result<Vec<Task>> {
    let tasks = sqlx::query_as::<_, Task>("SELECT id, plan_id, position, text FROM tasks WHERE plan_id = ? ORDER BY position")
        .bind(plan_id)
        .fetch_all(pool)
        .await
        .context("querying tasks for plan")?;
    Ok(tasks)
}

pub async fn get_task_status(pool: &SqlitePool, task_id: i64) -> Result<Option<TaskStatusRow>> {
    let row = sqlx::query_as::<_, TaskStatusRow>(
        "SELECT id, task_id, status, comment, responded_at FROM task_status WHERE task_id = ?",
    )
    .bind(task_id)
    .fetch_optional(pool)
    .await
    .context("querying task status")?;
    Ok(row)
}

pub async fn set_task_status(pool: &SqlitePool, task_id: i64, status: &str, comment: Option<&str>) -> Result<()> {
    sqlx::query(
        "UPDATE task_status SET status = ?, comment = COALESCE(?, comment),
         responded_at = strftime('%Y-%m-%dT%H:%M:%SZ', 'now')
         WHERE task_id = ?",
    )
    .bind(status)
    .bind(comment)
    .bind(task_id)
    .execute(pool)
    .await
    .context("updating task status")?;
    Ok(())
}

pub async fn set_task_comment(pool: &SqlitePool, task_id: i64, comment: Option<&str>) -> Result<()> {
    sqlx::query("UPDATE task_status SET comment = ? WHERE task_id = ?")
        .bind(comment)
        .bind(task_id)
        .execute(pool)
        .await
        .context("updating task comment")?;
    Ok(())
}

/// True if `task_id` belongs to a plan owned by `user_id` — the WebApp
/// surface's ownership check before accepting a task status update.
pub async fn task_owned_by_user(pool: &SqlitePool, task_id: i64, user_id: i64) -> Result<bool> {
    let row: Option<(i64,)> = sqlx::query_as(
        "SELECT t.id FROM tasks t JOIN plans p ON p.id = t.plan_id WHERE t.id = ? AND p.user_id = ?",
    )
    .bind(task_id)
    .bind(user_id)
    .fetch_optional(pool)
    .await
    .context("checking task ownership")?;
    Ok(row.is_some())
}

/// True if every task in the plan has a non-pending status (the evening
/// reminder suppression condition).
pub async fn plan_all_done(pool: &SqlitePool, plan_id: i64) -> Result<bool> {
    let row: (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM tasks t
         JOIN task_status s ON s.task_id = t.id
         WHERE t.plan_id = ? AND s.status = 'pending'",
    )
    .bind(plan_id)
    .fetch_one(pool)
    .await
    .context("counting pending tasks")?;
    Ok(row.0 == 0)
}

/// (done, total) task counts for a plan, used for completion percentage.
pub async fn plan_completion(pool: &SqlitePool, plan_id: i64) -> Result<(i64, i64)> {
    let row: (i64, i64) = sqlx::query_as(
        "SELECT
            COALESCE(SUM(CASE WHEN s.status != 'pending' THEN 1 ELSE 0 END), 0),
            COUNT(*)
         FROM tasks t JOIN task_status s ON s.task_id = t.id
         WHERE t.plan_id = ?",
    )
    .bind(plan_id)
    .fetch_one(pool)
    .await
    .context("computing plan completion")?;
    Ok(row)
}

// ── Notification ledger ─────────────────────────────────────────────────

pub async fn record_notification(
    pool: &SqlitePool,
    user_id: i64,
    channel: &str,
    local_date: NaiveDate,
    kind: &str,
    outcome: &str,
    attempt: i64,
    payload: &str,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO notification_records (user_id, channel, local_date, kind, outcome, attempt, payload)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(user_id)
    .bind(channel)
    .bind(local_date.to_string())
    .bind(kind)
    .bind(outcome)
    .bind(attempt)
    .bind(payload)
    .execute(pool)
    .await
    .context("recording notification")?;
    Ok(())
}

pub async fn has_sent(pool: &SqlitePool, user_id: i64, channel: &str, local_date: NaiveDate, kind: &str) -> Result<bool> {
    let row: (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM notification_records
         WHERE user_id = ? AND channel = ? AND local_date = ? AND kind = ? AND outcome = 'sent'",
    )
    .bind(user_id)
    .bind(channel)
    .bind(local_date.to_string())
    .bind(kind)
    .fetch_one(pool)
    .await
    .context("checking notification ledger")?;
    Ok(row.0 > 0)
}

pub async fn count_sent_attempts(
    pool: &SqlitePool,
    user_id: i64,
    channel: &str,
    local_date: NaiveDate,
    kind: &str,
) -> Result<i64> {
    let row: (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM notification_records
         WHERE user_id = ? AND channel = ? AND local_date = ? AND kind = ? AND outcome = 'sent'",
    )
    .bind(user_id)
    .bind(channel)
    .bind(local_date.to_string())
    .bind(kind)
    .fetch_one(pool)
    .await
    .context("counting notification attempts")?;
    Ok(row.0)
}

/// Count of notification_records rows regardless of outcome, used to cap
/// retries on a single (user, channel, local_date, kind).
pub async fn count_records(pool: &SqlitePool, user_id: i64, channel: &str, local_date: NaiveDate, kind: &str) -> Result<i64> {
    let row: (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM notification_records
         WHERE user_id = ? AND channel = ? AND local_date = ? AND kind = ?",
    )
    .bind(user_id)
    .bind(channel)
    .bind(local_date.to_string())
    .bind(kind)
    .fetch_one(pool)
    .await
    .context("counting notification records")?;
    Ok(row.0)
}

pub async fn has_outcome(pool: &SqlitePool, user_id: i64, channel: &str, local_date: NaiveDate, kind: &str, outcome: &str) -> Result<bool> {
    let row: (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM notification_records
         WHERE user_id = ? AND channel = ? AND local_date = ? AND kind = ? AND outcome = ?",
    )
    .bind(user_id)
    .bind(channel)
    .bind(local_date.to_string())
    .bind(kind)
    .bind(outcome)
    .fetch_one(pool)
    .await
    .context("checking notification outcome")?;
    Ok(row.0 > 0)
}

/// Admin/debug operation: wipe the ledger for a user's single local day so a
/// fresh dispatch cycle can be forced in testing or support.
pub async fn reset_notifications_for_date(pool: &SqlitePool, user_id: i64, local_date: NaiveDate) -> Result<u64> {
    let result = sqlx::query("DELETE FROM notification_records WHERE user_id = ? AND local_date = ?")
        .bind(user_id)
        .bind(local_date.to_string())
        .execute(pool)
        .await
        .context("resetting notification ledger")?;
    Ok(result.rows_affected())
}

pub async fn get_notification_records(pool: &SqlitePool, user_id: i64, local_date: NaiveDate) -> Result<Vec<NotificationRecord>> {
    let rows = sqlx::query_as::<_, NotificationRecord>(
        "SELECT id, user_id, channel, local_date, kind, outcome, attempt, payload, created_at
         FROM notification_records WHERE user_id = ? AND local_date = ?
         ORDER BY id",
    )
    .bind(user_id)
    .bind(local_date.to_string())
    .fetch_all(pool)
    .await
    .context("querying notification records")?;
    Ok(rows)
}

// ── Custom reminders ─────────────────────────────────────────────────────

#[allow(clippy::too_many_arguments)]
pub async fn insert_custom_reminder(
    pool: &SqlitePool,
    user_id: i64,
    time_of_day: &str,
    day_of_month: Option<i64>,
    description: &str,
    repeat_interval_minutes: i64,
    max_attempts_per_day: i64,
    next_fire_at_utc: chrono::NaiveDateTime,
    cycle_local_date: NaiveDate,
) -> Result<i64> {
    let result = sqlx::query(
        "INSERT INTO custom_reminders
         (user_id, time_of_day, day_of_month, description, repeat_interval_minutes,
          max_attempts_per_day, cycle_local_date, next_fire_at_utc, enabled)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, 1)",
    )
    .bind(user_id)
    .bind(time_of_day)
    .bind(day_of_month)
    .bind(description)
    .bind(repeat_interval_minutes)
    .bind(max_attempts_per_day)
    .bind(cycle_local_date.to_string())
    .bind(next_fire_at_utc)
    .execute(pool)
    .await
    .context("inserting custom reminder")?;
    Ok(result.last_insert_rowid())
}

pub async fn get_custom_reminder(pool: &SqlitePool, reminder_id: i64) -> Result<Option<CustomReminder>> {
    let row = sqlx::query_as::<_, CustomReminder>(custom_reminder_select("WHERE id = ?"))
        .bind(reminder_id)
        .fetch_optional(pool)
        .await
        .context("querying custom reminder")?;
    Ok(row)
}

pub async fn list_custom_reminders(pool: &SqlitePool, user_id: i64) -> Result<Vec<CustomReminder>> {
    let rows = sqlx::query_as::<_, CustomReminder>(custom_reminder_select("WHERE user_id = ? ORDER BY time_of_day"))
        .bind(user_id)
        .fetch_all(pool)
        .await
        .context("listing custom reminders")?;
    Ok(rows)
}

pub async fn delete_custom_reminder(pool: &SqlitePool, reminder_id: i64, user_id: i64) -> Result<bool> {
    let result = sqlx::query("DELETE FROM custom_reminders WHERE id = ? AND user_id = ?")
        .bind(reminder_id)
        .bind(user_id)
        .execute(pool)
        .await
        .context("deleting custom reminder")?;
    Ok(result.rows_affected() > 0)
}

#[allow(clippy::too_many_arguments)]
pub async fn reschedule_custom_reminder(
    pool: &SqlitePool,
    reminder_id: i64,
    next_fire_at_utc: chrono::NaiveDateTime,
    cycle_local_date: NaiveDate,
    attempts_sent_today: i64,
    done_today: bool,
) -> Result<()> {
    sqlx::query(
        "UPDATE custom_reminders SET next_fire_at_utc = ?, cycle_local_date = ?,
         attempts_sent_today = ?, done_today = ?, locked_until_utc = NULL
         WHERE id = ?",
    )
    .bind(next_fire_at_utc)
    .bind(cycle_local_date.to_string())
    .bind(attempts_sent_today)
    .bind(done_today)
    .bind(reminder_id)
    .execute(pool)
    .await
    .context("rescheduling custom reminder")?;
    Ok(())
}

/// Update whichever fields are `Some`, leaving the rest as-is. Returns
/// `false` if the reminder doesn't exist or isn't owned by `user_id`.
#[allow(clippy::too_many_arguments)]
pub async fn update_custom_reminder(
    pool: &SqlitePool,
    reminder_id: i64,
    user_id: i64,
    time_of_day: Option<&str>,
    day_of_month: Option<i64>,
    description: Option<&str>,
    repeat_interval_minutes: Option<i64>,
    max_attempts_per_day: Option<i64>,
) -> Result<bool> {
    let Some(existing) = get_custom_reminder(pool, reminder_id).await? else {
        return Ok(false);
    };
    if existing.user_id != user_id {
        return Ok(false);
    }

    let time_of_day = time_of_day.unwrap_or(&existing.time_of_day);
    let day_of_month = day_of_month.or(existing.day_of_month);
    let description = description.unwrap_or(&existing.description);
    let repeat_interval_minutes = repeat_interval_minutes.unwrap_or(existing.repeat_interval_minutes);
    let max_attempts_per_day = max_attempts_per_day.unwrap_or(existing.max_attempts_per_day);

    sqlx::query(
        "UPDATE custom_reminders SET time_of_day = ?, day_of_month = ?, description = ?,
         repeat_interval_minutes = ?, max_attempts_per_day = ? WHERE id = ?",
    )
    .bind(time_of_day)
    .bind(day_of_month)
    .bind(description)
    .bind(repeat_interval_minutes)
    .bind(max_attempts_per_day)
    .bind(reminder_id)
    .execute(pool)
    .await
    .context("updating custom reminder")?;
    Ok(true)
}

pub async fn set_custom_reminder_enabled(pool: &SqlitePool, reminder_id: i64, user_id: i64, enabled: bool) -> Result<bool> {
    let result = sqlx::query("UPDATE custom_reminders SET enabled = ? WHERE id = ? AND user_id = ?")
        .bind(enabled)
        .bind(reminder_id)
        .bind(user_id)
        .execute(pool)
        .await
        .context("toggling custom reminder")?;
    Ok(result.rows_affected() > 0)
}

pub async fn mark_custom_reminder_sent(
    pool: &SqlitePool,
    reminder_id: i64,
    attempts_sent_today: i64,
    last_sent_at_utc: chrono::NaiveDateTime,
) -> Result<()> {
    sqlx::query(
        "UPDATE custom_reminders SET attempts_sent_today = ?, last_sent_at_utc = ? WHERE id = ?",
    )
    .bind(attempts_sent_today)
    .bind(last_sent_at_utc)
    .bind(reminder_id)
    .execute(pool)
    .await
    .context("recording custom reminder send")?;
    Ok(())
}

/// Claim up to `limit` due, unlocked reminders by setting a short lease.
/// Select-then-conditional-update inside a transaction (SQLite has no
/// `UPDATE ... RETURNING` with the row-selection semantics we need here).
pub async fn claim_due_custom_reminders(
    pool: &SqlitePool,
    now: chrono::NaiveDateTime,
    lease_until: chrono::NaiveDateTime,
    limit: i64,
) -> Result<Vec<CustomReminder>> {
    let mut tx = pool.begin().await.context("starting reminder claim transaction")?;

    let candidates: Vec<(i64,)> = sqlx::query_as(
        "SELECT id FROM custom_reminders
         WHERE enabled = 1 AND next_fire_at_utc <= ?
           AND (locked_until_utc IS NULL OR locked_until_utc <= ?)
         ORDER BY next_fire_at_utc
         LIMIT ?",
    )
    .bind(now)
    .bind(now)
    .bind(limit)
    .fetch_all(&mut *tx)
    .await
    .context("selecting due custom reminders")?;

    let mut claimed = Vec::with_capacity(candidates.len());
    for (id,) in candidates {
        sqlx::query("UPDATE custom_reminders SET locked_until_utc = ? WHERE id = ?")
            .bind(lease_until)
            .bind(id)
            .execute(&mut *tx)
            .await
            .context("leasing custom reminder")?;

        let row = sqlx::query_as::<_, CustomReminder>(custom_reminder_select("WHERE id = ?"))
            .bind(id)
            .fetch_one(&mut *tx)
            .await
            .context("reading claimed custom reminder")?;
        claimed.push(row);
    }

    tx.commit().await.context("committing reminder claim")?;
    Ok(claimed)
}

fn custom_reminder_select(clause: &str) -> String {
    format!(
        "SELECT id, user_id, time_of_day, day_of_month, description, repeat_interval_minutes,
                max_attempts_per_day, cycle_local_date, attempts_sent_today, done_today,
                next_fire_at_utc, last_sent_at_utc, locked_until_utc, enabled
         FROM custom_reminders {clause}"
    )
}

// ── Settings key/value ───────────────────────────────────────────────────

pub async fn get_setting(pool: &SqlitePool, key: &str) -> Result<Option<String>> {
    let row: Option<(String,)> = sqlx::query_as("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_optional(pool)
        .await
        .context("reading setting")?;
    Ok(row.map(|(v,)| v))
}

pub async fn set_setting(pool: &SqlitePool, key: &str, value: &str) -> Result<()> {
    sqlx::query(
        "INSERT INTO settings (key, value, updated_at) VALUES (?, ?, strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
    )
    .bind(key)
    .bind(value)
    .execute(pool)
    .await
    .context("upserting setting")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn memory_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::query(include_str!("../migrations/20260715_000001_initial_schema.sql"))
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query(include_str!("../migrations/20260716_000002_indexes.sql"))
            .execute(&pool)
            .await
            .unwrap();
        pool
    }

    #[tokio::test]
    async fn get_or_create_user_is_idempotent() {
        let pool = memory_pool().await;
        let a = get_or_create_user(&pool, 42).await.unwrap();
        let b = get_or_create_user(&pool, 42).await.unwrap();
        assert_eq!(a.id, b.id);
    }

    #[tokio::test]
    async fn save_plan_replaces_previous_tasks() {
        let pool = memory_pool().await;
        let user = get_or_create_user(&pool, 1).await.unwrap();
        let date = NaiveDate::from_ymd_opt(2026, 7, 28).unwrap();

        let plan_id = save_plan(&pool, user.id, date, &["a".into(), "b".into()]).await.unwrap();
        assert_eq!(get_tasks_for_plan(&pool, plan_id).await.unwrap().len(), 2);

        let plan_id_2 = save_plan(&pool, user.id, date, &["c".into()]).await.unwrap();
        assert_eq!(plan_id, plan_id_2, "same (user, date) must reuse the plan row");
        let tasks = get_tasks_for_plan(&pool, plan_id).await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].text, "c");
    }

    #[tokio::test]
    async fn notification_ledger_dedups_by_user_channel_date_kind() {
        let pool = memory_pool().await;
        let user = get_or_create_user(&pool, 7).await.unwrap();
        let date = NaiveDate::from_ymd_opt(2026, 7, 28).unwrap();

        assert!(!has_sent(&pool, user.id, "morning", date, "prompt").await.unwrap());
        record_notification(&pool, user.id, "morning", date, "prompt", "sent", 0, "{}")
            .await
            .unwrap();
        assert!(has_sent(&pool, user.id, "morning", date, "prompt").await.unwrap());
    }

    #[tokio::test]
    async fn claim_due_custom_reminders_leases_and_excludes_locked_rows() {
        let pool = memory_pool().await;
        let user = get_or_create_user(&pool, 9).await.unwrap();
        let now = chrono::NaiveDate::from_ymd_opt(2026, 7, 28)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap();
        insert_custom_reminder(
            &pool,
            user.id,
            "09:00",
            None,
            "drink water",
            30,
            1,
            now,
            now.date(),
        )
        .await
        .unwrap();

        let lease = now + chrono::Duration::minutes(2);
        let claimed = claim_due_custom_reminders(&pool, now, lease, 10).await.unwrap();
        assert_eq!(claimed.len(), 1);

        // Second claim attempt right away sees the row as locked.
        let claimed_again = claim_due_custom_reminders(&pool, now, lease, 10).await.unwrap();
        assert!(claimed_again.is_empty());
    }
}
