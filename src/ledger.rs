//! Delivery Log / Idempotency Ledger.
//!
//! A thin, semantically-named layer over the notification_records table in
//! `store`. Every sender consults this before attempting a send and records
//! the outcome after, so a crash between "decided to send" and "recorded
//! sent" is the only window in which a duplicate can occur — matching the
//! advisory (not strictly exactly-once) guarantee called out for this
//! system.

use anyhow::Result;
use chrono::NaiveDate;
use sqlx::SqlitePool;

use crate::store;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Sent,
    Failed,
    Skipped,
}

impl Outcome {
    fn as_str(self) -> &'static str {
        match self {
            Outcome::Sent => "sent",
            Outcome::Failed => "failed",
            Outcome::Skipped => "skipped",
        }
    }
}

/// Has a "sent" record already been written for (user, channel, local_date, kind)?
/// Callers check this immediately before enqueueing a send; it is the exactly-
/// once-per-local-day guard.
pub async fn already_sent(pool: &SqlitePool, user_id: i64, channel: &str, local_date: NaiveDate, kind: &str) -> Result<bool> {
    store::has_sent(pool, user_id, channel, local_date, kind).await
}

pub async fn attempts_so_far(pool: &SqlitePool, user_id: i64, channel: &str, local_date: NaiveDate, kind: &str) -> Result<i64> {
    store::count_sent_attempts(pool, user_id, channel, local_date, kind).await
}

/// Total attempts regardless of outcome, used to cap retries.
pub async fn total_attempts(pool: &SqlitePool, user_id: i64, channel: &str, local_date: NaiveDate, kind: &str) -> Result<i64> {
    store::count_records(pool, user_id, channel, local_date, kind).await
}

/// A "skipped" record means the sender gave up (permanent error, or retries
/// exhausted) — the dispatchers must not keep re-enqueueing this kind today.
pub async fn is_abandoned(pool: &SqlitePool, user_id: i64, channel: &str, local_date: NaiveDate, kind: &str) -> Result<bool> {
    store::has_outcome(pool, user_id, channel, local_date, kind, "skipped").await
}

#[allow(clippy::too_many_arguments)]
pub async fn record(
    pool: &SqlitePool,
    user_id: i64,
    channel: &str,
    local_date: NaiveDate,
    kind: &str,
    outcome: Outcome,
    attempt: i64,
    payload: &serde_json::Value,
) -> Result<()> {
    let payload_str = serde_json::to_string(payload)?;
    store::record_notification(pool, user_id, channel, local_date, kind, outcome.as_str(), attempt, &payload_str).await
}

/// Admin/support operation: clear a user's ledger for one local day so the
/// dispatchers treat it as not-yet-attempted.
pub async fn reset_for_date(pool: &SqlitePool, user_id: i64, local_date: NaiveDate) -> Result<u64> {
    store::reset_notifications_for_date(pool, user_id, local_date).await
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
        pool
    }

    #[tokio::test]
    async fn reset_allows_resend_same_day() {
        let pool = memory_pool().await;
        sqlx::query("INSERT INTO users (id, telegram_id) VALUES (1, 100)")
            .execute(&pool)
            .await
            .unwrap();
        let date = NaiveDate::from_ymd_opt(2026, 7, 28).unwrap();

        record(&pool, 1, "morning", date, "prompt", Outcome::Sent, 0, &serde_json::json!({}))
            .await
            .unwrap();
        assert!(already_sent(&pool, 1, "morning", date, "prompt").await.unwrap());

        reset_for_date(&pool, 1, date).await.unwrap();
        assert!(!already_sent(&pool, 1, "morning", date, "prompt").await.unwrap());
    }
}
