//! Daily Tick Dispatcher.
//!
//! Wakes every 60 seconds, walks every user, and decides — purely from the
//! user's settings, the current time in their timezone, and what the
//! idempotency ledger already records — whether a morning prompt, morning
//! reminder, evening prompt, or evening follow-up reminder is due right now.
//! Due work is handed to the sender worker pool over the job queue; this
//! loop never calls the delivery gateway itself.
//!
//! Grounded on the teacher's scheduler loop shape (wake, guard in-flight
//! work, fan out) and on the original system's periodic dispatch task
//! (per-user dispatch-window check against a ledger instead of a persistent
//! per-job timer, so a crashed/restarted process simply re-derives what's
//! still due on its next tick).

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::jobqueue::{JobSender, SendJob};
use crate::ledger;
use crate::store;
use crate::time_zone;

const TICK_INTERVAL_SECS: u64 = 60;

pub async fn ticker_loop(pool: SqlitePool, jobs: JobSender, dispatch_window_minutes: i64, cancel: CancellationToken) {
    info!("ticker started");

    // Prevents the same (user, channel) pair from being enqueued twice if a
    // tick takes longer than 60s to evaluate all users.
    let in_flight: Arc<Mutex<HashSet<(i64, &'static str)>>> = Arc::new(Mutex::new(HashSet::new()));

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("ticker shutting down");
                return;
            }
            _ = tokio::time::sleep(std::time::Duration::from_secs(TICK_INTERVAL_SECS)) => {}
        }

        let users = match store::get_all_users(&pool).await {
            Ok(u) => u,
            Err(e) => {
                error!(error = %e, "failed to load users for dispatch");
                continue;
            }
        };

        for user in users {
            let tz = match time_zone::parse_timezone(&user.timezone) {
                Ok(tz) => tz,
                Err(_) => {
                    warn!(user_id = user.id, tz = %user.timezone, "user has invalid timezone, skipping dispatch");
                    continue;
                }
            };

            let now = Utc::now();
            let local_now = now.with_timezone(&tz);
            let local_date = local_now.date_naive();
            let now_minutes = time_zone::minutes_since_midnight(local_now.time());

            if let Err(e) = evaluate_morning(&pool, &jobs, &user, now_minutes, local_date, dispatch_window_minutes, &in_flight).await {
                error!(user_id = user.id, error = %e, "morning dispatch check failed");
            }
            if let Err(e) = evaluate_evening(&pool, &jobs, &user, now, now_minutes, local_date, dispatch_window_minutes, &in_flight).await {
                error!(user_id = user.id, error = %e, "evening dispatch check failed");
            }
        }
    }
}

async fn evaluate_morning(
    pool: &SqlitePool,
    jobs: &JobSender,
    user: &crate::models::User,
    now_minutes: i64,
    local_date: chrono::NaiveDate,
    window: i64,
    in_flight: &Arc<Mutex<HashSet<(i64, &'static str)>>>,
) -> anyhow::Result<()> {
    let target = time_zone::parse_time_of_day(&user.notify_morning_time)
        .map(time_zone::minutes_since_midnight)
        .unwrap_or(7 * 60);

    let prompt_sent = ledger::already_sent(pool, user.id, "morning", local_date, "prompt").await?;
    let prompt_abandoned = ledger::is_abandoned(pool, user.id, "morning", local_date, "prompt").await?;
    let plan_exists = store::get_plan(pool, user.id, local_date).await?.is_some();

    if !prompt_sent && !prompt_abandoned && time_zone::within_dispatch_window(now_minutes, target, window) && try_claim(in_flight, user.id, "morning_prompt") {
        debug!(user_id = user.id, "enqueueing morning prompt");
        let _ = jobs.send(SendJob::MorningPrompt { user_id: user.id, local_date, attempt: 0 }).await;
        release(in_flight, user.id, "morning_prompt");
        return Ok(());
    }

    // Reminder cadence: only while the plan hasn't been submitted, and only
    // after the first prompt went out.
    if prompt_sent && !plan_exists && user.morning_reminder_max_attempts > 0 {
        let attempts = ledger::attempts_so_far(pool, user.id, "morning", local_date, "reminder").await?;
        if attempts < user.morning_reminder_max_attempts {
            let due_minutes = target + user.morning_reminder_interval_minutes * (attempts + 1);
            if time_zone::within_dispatch_window(now_minutes, due_minutes, window) && try_claim(in_flight, user.id, "morning_reminder") {
                debug!(user_id = user.id, attempt = attempts, "enqueueing morning reminder");
                let _ = jobs.send(SendJob::MorningReminder { user_id: user.id, local_date, attempt: attempts }).await;
                release(in_flight, user.id, "morning_reminder");
            }
        }
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn evaluate_evening(
    pool: &SqlitePool,
    jobs: &JobSender,
    user: &crate::models::User,
    now: chrono::DateTime<Utc>,
    now_minutes: i64,
    local_date: chrono::NaiveDate,
    window: i64,
    in_flight: &Arc<Mutex<HashSet<(i64, &'static str)>>>,
) -> anyhow::Result<()> {
    let target = time_zone::parse_time_of_day(&user.notify_evening_time)
        .map(time_zone::minutes_since_midnight)
        .unwrap_or(21 * 60);

    let prompt_sent = ledger::already_sent(pool, user.id, "evening", local_date, "prompt").await?;
    let prompt_abandoned = ledger::is_abandoned(pool, user.id, "evening", local_date, "prompt").await?;

    if !prompt_sent && !prompt_abandoned && time_zone::within_dispatch_window(now_minutes, target, window) && try_claim(in_flight, user.id, "evening_prompt") {
        debug!(user_id = user.id, "enqueueing evening prompt");
        let _ = jobs.send(SendJob::EveningPrompt { user_id: user.id, local_date, attempt: 0 }).await;
        release(in_flight, user.id, "evening_prompt");
        return Ok(());
    }

    if !prompt_sent {
        return Ok(());
    }

    let plan = store::get_plan(pool, user.id, local_date).await?;
    let all_done = match &plan {
        Some(p) => store::plan_all_done(pool, p.id).await?,
        None => false,
    };
    if all_done {
        return Ok(());
    }

    for (offset_index, offset_hours, kind) in [(0u32, 1i64, "evening_reminder:1h"), (1u32, 3i64, "evening_reminder:3h")] {
        let already = ledger::already_sent(pool, user.id, "evening", local_date, kind).await?;
        if already {
            continue;
        }
        let sent_records = store::get_notification_records(pool, user.id, local_date).await?;
        let Some(record) = sent_records
            .iter()
            .find(|r| r.channel == "evening" && r.kind == "prompt" && r.outcome == "sent")
        else {
            continue;
        };
        let Ok(sent_at) = chrono::NaiveDateTime::parse_from_str(&record.created_at, "%Y-%m-%dT%H:%M:%SZ") else {
            continue;
        };
        let sent_at = sent_at.and_utc();
        let due_at = sent_at + chrono::Duration::hours(offset_hours);
        if now >= due_at && try_claim(in_flight, user.id, "evening_reminder") {
            debug!(user_id = user.id, kind, "enqueueing evening reminder");
            let _ = jobs.send(SendJob::EveningReminder { user_id: user.id, local_date, offset_index }).await;
            release(in_flight, user.id, "evening_reminder");
        }
    }

    Ok(())
}

fn try_claim(in_flight: &Arc<Mutex<HashSet<(i64, &'static str)>>>, user_id: i64, tag: &'static str) -> bool {
    in_flight.lock().unwrap().insert((user_id, tag))
}

fn release(in_flight: &Arc<Mutex<HashSet<(i64, &'static str)>>>, user_id: i64, tag: &'static str) {
    in_flight.lock().unwrap().remove(&(user_id, tag));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn try_claim_then_release_allows_reclaim() {
        let in_flight = Arc::new(Mutex::new(HashSet::new()));
        assert!(try_claim(&in_flight, 1, "morning_prompt"));
        assert!(!try_claim(&in_flight, 1, "morning_prompt"));
        release(&in_flight, 1, "morning_prompt");
        assert!(try_claim(&in_flight, 1, "morning_prompt"));
    }
}
