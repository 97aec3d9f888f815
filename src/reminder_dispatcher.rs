//! Custom-Reminder Dispatcher.
//!
//! A 60s claim-and-lease loop, separate from the daily ticker because custom
//! reminders are scheduled by absolute `next_fire_at_utc` rather than a
//! recurring local time-of-day window. Claimed rows get a 2-minute lease
//! (see [`crate::store::claim_due_custom_reminders`]) so a crash mid-send
//! doesn't strand the reminder locked forever once the lease expires.

use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::jobqueue::{JobSender, SendJob};

const POLL_INTERVAL_SECS: u64 = 60;
const LEASE_MINUTES: i64 = 2;
const CLAIM_BATCH_SIZE: i64 = 50;

pub async fn reminder_dispatcher_loop(pool: SqlitePool, jobs: JobSender, cancel: CancellationToken) {
    info!("custom reminder dispatcher started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("custom reminder dispatcher shutting down");
                return;
            }
            _ = tokio::time::sleep(std::time::Duration::from_secs(POLL_INTERVAL_SECS)) => {}
        }

        let now = chrono::Utc::now().naive_utc();
        let lease_until = now + chrono::Duration::minutes(LEASE_MINUTES);

        let claimed = match crate::store::claim_due_custom_reminders(&pool, now, lease_until, CLAIM_BATCH_SIZE).await {
            Ok(rows) => rows,
            Err(e) => {
                error!(error = %e, "failed to claim due custom reminders");
                continue;
            }
        };

        if claimed.is_empty() {
            continue;
        }
        debug!(count = claimed.len(), "claimed due custom reminders");

        for reminder in claimed {
            if jobs.send(SendJob::CustomReminder { reminder_id: reminder.id }).await.is_err() {
                error!(reminder_id = reminder.id, "job queue closed while dispatching custom reminder");
                return;
            }
        }
    }
}
