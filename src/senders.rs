//! Per-Channel Sender Tasks.
//!
//! The only place that actually calls the delivery gateway. Consumes
//! [`SendJob`]s from the queue, renders the right message, attempts
//! delivery, and writes the outcome to the ledger. A transient failure is
//! recorded and left for the ticker's next pass to retry; once a kind has
//! accumulated `MAX_SEND_ATTEMPTS` failed (or one permanent) attempt for a
//! local day, a `skipped` record is written so the dispatchers stop
//! retrying it — mirroring the original system's bounded-retry Celery tasks
//! without needing a persistent per-job timer.

use chrono::Utc;
use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::jobqueue::{JobReceiver, SendJob};
use crate::ledger::{self, Outcome};
use crate::render;
use crate::reminders;
use crate::store;
use crate::telegram_client::TelegramClient;
use crate::time_zone;

const MAX_SEND_ATTEMPTS: i64 = 3;

pub async fn sender_loop(pool: SqlitePool, client: TelegramClient, mut jobs: JobReceiver, max_concurrent: usize, cancel: CancellationToken) {
    info!("sender pool started");
    let semaphore = std::sync::Arc::new(tokio::sync::Semaphore::new(max_concurrent.max(1)));

    loop {
        let job = tokio::select! {
            _ = cancel.cancelled() => {
                info!("sender pool shutting down");
                return;
            }
            job = jobs.recv() => job,
        };

        let Some(job) = job else {
            info!("job queue closed, sender pool exiting");
            return;
        };

        let pool = pool.clone();
        let client = client.clone();
        let permit = semaphore.clone().acquire_owned().await.expect("semaphore not closed");
        tokio::spawn(async move {
            let _permit = permit;
            if let Err(e) = handle_job(&pool, &client, job).await {
                error!(error = %e, "failed to process send job");
            }
        });
    }
}

async fn handle_job(pool: &SqlitePool, client: &TelegramClient, job: SendJob) -> anyhow::Result<()> {
    match job {
        SendJob::MorningPrompt { user_id, local_date, attempt } => {
            send_prompt(pool, client, user_id, "morning", local_date, attempt as i64, render::morning_prompt()).await
        }
        SendJob::MorningReminder { user_id, local_date, attempt } => {
            let Some(user) = store::get_user_by_id(pool, user_id).await? else { return Ok(()) };
            let rendered = render::morning_reminder(attempt);
            let outcome = deliver(client, user.telegram_id, &rendered).await;
            record(pool, user_id, "morning", local_date, "reminder", attempt, outcome).await
        }
        SendJob::EveningPrompt { user_id, local_date, attempt } => {
            let Some(user) = store::get_user_by_id(pool, user_id).await? else { return Ok(()) };
            let Some(plan) = store::get_plan(pool, user_id, local_date).await? else { return Ok(()) };
            let tasks = crate::plan::get_tasks_with_status(pool, plan.id).await?;
            let rendered = render::evening_prompt(&tasks);
            let outcome = deliver(client, user.telegram_id, &rendered).await;
            send_with_retry_cap(pool, user_id, "evening", local_date, "prompt", attempt as i64, outcome).await
        }
        SendJob::EveningReminder { user_id, local_date, offset_index } => {
            let kind = if offset_index == 0 { "evening_reminder:1h" } else { "evening_reminder:3h" };
            let Some(user) = store::get_user_by_id(pool, user_id).await? else { return Ok(()) };
            let rendered = render::evening_reminder();
            let outcome = deliver(client, user.telegram_id, &rendered).await;
            record(pool, user_id, "evening", local_date, kind, 0, outcome).await
        }
        SendJob::CustomReminder { reminder_id } => handle_custom_reminder(pool, client, reminder_id).await,
    }
}

async fn send_prompt(
    pool: &SqlitePool,
    client: &TelegramClient,
    user_id: i64,
    channel: &str,
    local_date: chrono::NaiveDate,
    attempt: i64,
    rendered: render::Rendered,
) -> anyhow::Result<()> {
    let Some(user) = store::get_user_by_id(pool, user_id).await? else { return Ok(()) };
    let outcome = deliver(client, user.telegram_id, &rendered).await;
    send_with_retry_cap(pool, user_id, channel, local_date, "prompt", attempt, outcome).await
}

async fn deliver(client: &TelegramClient, chat_id: i64, rendered: &render::Rendered) -> Result<(), crate::error::DeliveryError> {
    client.send_message(chat_id, rendered).await
}

async fn record(
    pool: &SqlitePool,
    user_id: i64,
    channel: &str,
    local_date: chrono::NaiveDate,
    kind: &str,
    attempt: i64,
    outcome: Result<(), crate::error::DeliveryError>,
) -> anyhow::Result<()> {
    match outcome {
        Ok(()) => {
            ledger::record(pool, user_id, channel, local_date, kind, Outcome::Sent, attempt, &serde_json::json!({})).await?;
        }
        Err(e) => {
            warn!(user_id, channel, kind, error = %e, "delivery failed");
            let outcome = if e.is_permanent() { Outcome::Skipped } else { Outcome::Failed };
            ledger::record(pool, user_id, channel, local_date, kind, outcome, attempt, &serde_json::json!({"error": e.to_string()})).await?;
        }
    }
    Ok(())
}

/// Like [`record`], but for kinds with a bounded number of retries: once a
/// transient failure pushes the total attempt count to `MAX_SEND_ATTEMPTS`,
/// an additional `skipped` record is written so the ticker gives up.
async fn send_with_retry_cap(
    pool: &SqlitePool,
    user_id: i64,
    channel: &str,
    local_date: chrono::NaiveDate,
    kind: &str,
    attempt: i64,
    outcome: Result<(), crate::error::DeliveryError>,
) -> anyhow::Result<()> {
    let failed_transiently = matches!(&outcome, Err(e) if !e.is_permanent());
    record(pool, user_id, channel, local_date, kind, attempt, outcome).await?;

    if failed_transiently {
        let attempts = ledger::total_attempts(pool, user_id, channel, local_date, kind).await?;
        if attempts >= MAX_SEND_ATTEMPTS {
            warn!(user_id, channel, kind, attempts, "giving up after max send retries");
            ledger::record(pool, user_id, channel, local_date, kind, Outcome::Skipped, attempt, &serde_json::json!({"reason": "max_retries"})).await?;
        }
    }
    Ok(())
}

async fn handle_custom_reminder(pool: &SqlitePool, client: &TelegramClient, reminder_id: i64) -> anyhow::Result<()> {
    let Some(reminder) = store::get_custom_reminder(pool, reminder_id).await? else { return Ok(()) };
    let Some(user) = store::get_user_by_id(pool, reminder.user_id).await? else { return Ok(()) };
    let Ok(tz) = time_zone::parse_timezone(&user.timezone) else { return Ok(()) };

    let rendered = render::custom_reminder(&reminder.description);
    let outcome = deliver(client, user.telegram_id, &rendered).await;
    let now = Utc::now().naive_utc();
    let cycle_date = reminder.cycle_local_date.as_deref().and_then(|s| s.parse().ok()).unwrap_or_else(|| now.date());
    let succeeded = outcome.is_ok();

    record(pool, user.id, "custom", cycle_date, &format!("reminder:{reminder_id}"), reminder.attempts_sent_today, outcome).await?;

    if succeeded {
        let attempts = reminder.attempts_sent_today + 1;
        store::mark_custom_reminder_sent(pool, reminder_id, attempts, now).await?;

        let time = time_zone::parse_time_of_day(&reminder.time_of_day).unwrap_or(chrono::NaiveTime::MIN);
        if attempts >= reminder.max_attempts_per_day {
            let (next_fire, next_cycle) = reminders::compute_next_fire(tz, time, reminder.day_of_month.map(|d| d as u32), Utc::now());
            store::reschedule_custom_reminder(pool, reminder_id, next_fire, next_cycle, 0, false).await?;
        } else {
            let next_fire = now + chrono::Duration::minutes(reminder.repeat_interval_minutes);
            store::reschedule_custom_reminder(pool, reminder_id, next_fire, cycle_date, attempts, false).await?;
        }
    } else {
        warn!(reminder_id, "custom reminder delivery failed");
        let retry_at = now + chrono::Duration::minutes(reminder.repeat_interval_minutes);
        store::reschedule_custom_reminder(pool, reminder_id, retry_at, cycle_date, reminder.attempts_sent_today, false).await?;
    }

    Ok(())
}
