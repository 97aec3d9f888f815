//! Admin/WebApp HTTP surface.
//!
//! Every route here except `/health` and `/webhook` is gated by Telegram
//! WebApp initData auth (`X-Telegram-Init-Data` header, validated in
//! [`crate::auth`]). `/webhook` is gated instead by an optional shared
//! secret header, the usual Bot API webhook convention.

use std::collections::HashMap;
use std::sync::Arc;

use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::Json;
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use sqlx::SqlitePool;
use subtle::ConstantTimeEq;
use tracing::error;

use crate::auth;
use crate::error::{AuthError, ReminderError};
use crate::fsm::FsmStore;
use crate::models::{TaskStatusValue, User};
use crate::plan;
use crate::reminders;
use crate::router::{self, RouterContext};
use crate::store;
use crate::telegram_client::TelegramClient;
use crate::telegram_types::TgUpdate;
use crate::time_zone;

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub client: Arc<TelegramClient>,
    pub fsm: Arc<dyn FsmStore>,
    pub bot_token: String,
    pub webhook_secret: Option<String>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/webhook", post(webhook))
        .route("/webhook/", post(webhook))
        .route("/today", get(today))
        .route("/stats", get(stats))
        .route("/settings", get(get_settings).put(put_settings))
        .route("/history", get(history))
        .route("/reminders", get(list_reminders).post(create_reminder))
        .route("/reminders/stats", get(reminder_stats))
        .route("/reminders/{id}", put(update_reminder).delete(delete_reminder))
        .route("/plan/today", post(create_today_plan))
        .route("/tasks/{id}/status", put(set_task_status))
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

async fn webhook(State(state): State<AppState>, headers: HeaderMap, Json(update): Json<TgUpdate>) -> Response {
    if let Some(expected) = &state.webhook_secret {
        let provided = headers
            .get("x-telegram-bot-api-secret-token")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if !constant_time_eq(provided, expected) {
            return StatusCode::FORBIDDEN.into_response();
        }
    }

    let pool = state.pool.clone();
    let client = state.client.clone();
    let fsm = state.fsm.clone();
    tokio::spawn(async move {
        let ctx = RouterContext { pool: &pool, client: &client, fsm: &*fsm };
        router::handle_update(&ctx, update).await;
    });

    StatusCode::OK.into_response()
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    a.len() == b.len() && a.as_bytes().ct_eq(b.as_bytes()).into()
}

// ── Auth & response helpers ──────────────────────────────────────────────

async fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<User, Response> {
    let init_data = headers.get("x-telegram-init-data").and_then(|v| v.to_str().ok()).unwrap_or("");
    if init_data.is_empty() {
        return Err(auth_error_response(&AuthError::MissingInitData));
    }

    let auth = auth::validate_init_data(init_data, &state.bot_token).map_err(|e| auth_error_response(&e))?;

    store::get_or_create_user(&state.pool, auth.telegram_user_id).await.map_err(|e| {
        error!(error = %e, "failed to resolve webapp user");
        internal_error()
    })
}

fn user_timezone(user: &User) -> chrono_tz::Tz {
    time_zone::parse_timezone(&user.timezone).unwrap_or(chrono_tz::UTC)
}

fn auth_error_response(e: &AuthError) -> Response {
    (StatusCode::UNAUTHORIZED, Json(serde_json::json!({"error": e.to_string()}))).into_response()
}

fn internal_error() -> Response {
    (StatusCode::INTERNAL_SERVER_ERROR, Json(serde_json::json!({"error": "internal error"}))).into_response()
}

fn bad_request(msg: impl Into<String>) -> Response {
    (StatusCode::BAD_REQUEST, Json(serde_json::json!({"error": msg.into()}))).into_response()
}

fn not_found(msg: impl Into<String>) -> Response {
    (StatusCode::NOT_FOUND, Json(serde_json::json!({"error": msg.into()}))).into_response()
}

// ── /today ────────────────────────────────────────────────────────────────

async fn today(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let user = match authenticate(&state, &headers).await {
        Ok(u) => u,
        Err(r) => return r,
    };
    let date = time_zone::local_date(Utc::now(), user_timezone(&user));
    match serialize_today(&state.pool, user.id, date).await {
        Ok(body) => Json(body).into_response(),
        Err(e) => {
            error!(error = %e, "today lookup failed");
            internal_error()
        }
    }
}

async fn serialize_today(pool: &SqlitePool, user_id: i64, date: NaiveDate) -> anyhow::Result<serde_json::Value> {
    let Some(plan) = store::get_plan(pool, user_id, date).await? else {
        return Ok(serde_json::json!({"date": date.to_string(), "tasks": [], "exists": false}));
    };
    let tasks = plan::get_tasks_with_status(pool, plan.id).await?;
    let tasks_json: Vec<_> = tasks
        .iter()
        .map(|(task, status)| {
            serde_json::json!({
                "id": task.id,
                "position": task.position,
                "text": task.text,
                "status": status.status,
                "comment": status.comment,
            })
        })
        .collect();
    Ok(serde_json::json!({"date": date.to_string(), "tasks": tasks_json, "exists": true, "plan_id": plan.id}))
}

// ── /stats ────────────────────────────────────────────────────────────────

/// Plans considered for the streak/average computation. A personal daily
/// planner never accumulates enough rows for this to matter in practice.
const STATS_PLAN_LOOKBACK: i64 = 3650;

async fn stats(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let user = match authenticate(&state, &headers).await {
        Ok(u) => u,
        Err(r) => return r,
    };
    match compute_stats(&state.pool, user.id, user_timezone(&user)).await {
        Ok(body) => Json(body).into_response(),
        Err(e) => {
            error!(error = %e, "stats computation failed");
            internal_error()
        }
    }
}

async fn compute_stats(pool: &SqlitePool, user_id: i64, tz: chrono_tz::Tz) -> anyhow::Result<serde_json::Value> {
    let plans = store::list_recent_plans(pool, user_id, STATS_PLAN_LOOKBACK).await?;
    if plans.is_empty() {
        return Ok(serde_json::json!({"total_plans": 0, "avg_percent": 0, "current_streak": 0}));
    }

    let mut percents = Vec::with_capacity(plans.len());
    let mut percent_by_date = HashMap::with_capacity(plans.len());
    for plan in &plans {
        let (done, total) = plan::completion_weighted(pool, plan.id).await?;
        let percent = if total == 0 { 0 } else { (100.0 * done / total as f64).round() as i64 };
        percents.push(percent);
        percent_by_date.insert(plan.plan_date, (percent, total));
    }
    let avg_percent = percents.iter().sum::<i64>() / percents.len() as i64;

    let mut streak = 0i64;
    let mut day = time_zone::local_date(Utc::now(), tz);
    while let Some((percent, total)) = percent_by_date.get(&day) {
        if *total == 0 || *percent < 100 {
            break;
        }
        streak += 1;
        day -= chrono::Duration::days(1);
    }

    Ok(serde_json::json!({"total_plans": plans.len(), "avg_percent": avg_percent, "current_streak": streak}))
}

// ── /settings ─────────────────────────────────────────────────────────────

async fn get_settings(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let user = match authenticate(&state, &headers).await {
        Ok(u) => u,
        Err(r) => return r,
    };
    Json(serde_json::json!({
        "timezone": user.timezone,
        "morning_time": user.notify_morning_time,
        "evening_time": user.notify_evening_time,
        "reminder_interval_minutes": user.morning_reminder_interval_minutes,
        "reminder_max_attempts": user.morning_reminder_max_attempts,
    }))
    .into_response()
}

#[derive(Deserialize)]
struct SettingsUpdatePayload {
    timezone: Option<String>,
    morning_time: Option<String>,
    evening_time: Option<String>,
    reminder_interval_minutes: Option<i64>,
    reminder_max_attempts: Option<i64>,
}

async fn put_settings(State(state): State<AppState>, headers: HeaderMap, Json(payload): Json<SettingsUpdatePayload>) -> Response {
    let user = match authenticate(&state, &headers).await {
        Ok(u) => u,
        Err(r) => return r,
    };

    let mut timezone = user.timezone.clone();
    if let Some(tz) = &payload.timezone {
        if time_zone::parse_timezone(tz).is_err() {
            return bad_request("Invalid timezone");
        }
        timezone = tz.clone();
    }

    let mut morning_time = user.notify_morning_time.clone();
    if let Some(t) = &payload.morning_time {
        if time_zone::parse_time_of_day(t).is_err() {
            return bad_request("Time format must be HH:MM");
        }
        morning_time = t.clone();
    }

    let mut evening_time = user.notify_evening_time.clone();
    if let Some(t) = &payload.evening_time {
        if time_zone::parse_time_of_day(t).is_err() {
            return bad_request("Time format must be HH:MM");
        }
        evening_time = t.clone();
    }

    if let Some(minutes) = payload.reminder_interval_minutes
        && reminders::validate_interval(minutes).is_err()
    {
        return bad_request("reminder_interval_minutes must be in 5..=720");
    }
    if let Some(attempts) = payload.reminder_max_attempts
        && reminders::validate_max_attempts(attempts).is_err()
    {
        return bad_request("reminder_max_attempts must be in 0..=10");
    }

    let interval = payload.reminder_interval_minutes.unwrap_or(user.morning_reminder_interval_minutes);
    let max_attempts = payload.reminder_max_attempts.unwrap_or(user.morning_reminder_max_attempts);

    if let Err(e) = store::update_user_settings(&state.pool, user.id, &timezone, &morning_time, &evening_time, interval, max_attempts).await {
        error!(error = %e, "failed to update settings");
        return internal_error();
    }

    Json(serde_json::json!({"ok": true})).into_response()
}

// ── /history ──────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct HistoryQuery {
    month: Option<String>,
}

async fn history(State(state): State<AppState>, headers: HeaderMap, Query(query): Query<HistoryQuery>) -> Response {
    let user = match authenticate(&state, &headers).await {
        Ok(u) => u,
        Err(r) => return r,
    };
    let month = query
        .month
        .unwrap_or_else(|| time_zone::local_date(Utc::now(), user_timezone(&user)).format("%Y-%m").to_string());

    let Some((year, mm)) = parse_year_month(&month) else {
        return bad_request("Month must be YYYY-MM");
    };

    match history_for_month(&state.pool, user.id, year, mm).await {
        Ok(items) => Json(serde_json::json!({"month": month, "items": items})).into_response(),
        Err(e) => {
            error!(error = %e, "history lookup failed");
            internal_error()
        }
    }
}

fn parse_year_month(s: &str) -> Option<(i32, u32)> {
    let (y, m) = s.split_once('-')?;
    if y.len() != 4 || m.len() != 2 {
        return None;
    }
    let year: i32 = y.parse().ok()?;
    let month: u32 = m.parse().ok()?;
    (1..=12).contains(&month).then_some((year, month))
}

async fn history_for_month(pool: &SqlitePool, user_id: i64, year: i32, month: u32) -> anyhow::Result<Vec<serde_json::Value>> {
    let plans = store::list_plans_in_month(pool, user_id, year, month).await?;
    let mut items = Vec::with_capacity(plans.len());
    for plan in plans {
        let (done, total) = plan::completion_weighted(pool, plan.id).await?;
        let percent = if total == 0 { 0 } else { (100.0 * done / total as f64).round() as i64 };
        items.push(serde_json::json!({"date": plan.plan_date.to_string(), "done": done, "total": total, "percent": percent}));
    }
    Ok(items)
}

// ── /plan/today ───────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct CreateTodayPlanPayload {
    tasks: Vec<String>,
}

async fn create_today_plan(State(state): State<AppState>, headers: HeaderMap, Json(payload): Json<CreateTodayPlanPayload>) -> Response {
    let user = match authenticate(&state, &headers).await {
        Ok(u) => u,
        Err(r) => return r,
    };
    let today = time_zone::local_date(Utc::now(), user_timezone(&user));

    let cleaned: Vec<String> = payload
        .tasks
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.chars().take(plan::MAX_TASK_LENGTH).collect())
        .collect();

    if cleaned.is_empty() {
        return bad_request("At least one task is required");
    }
    if cleaned.len() > plan::MAX_TASKS {
        return bad_request(format!("Too many tasks (max {})", plan::MAX_TASKS));
    }

    match store::save_plan(&state.pool, user.id, today, &cleaned).await {
        Ok(plan_id) => Json(serde_json::json!({"ok": true, "plan_id": plan_id, "task_count": cleaned.len()})).into_response(),
        Err(e) => {
            error!(error = %e, "saving plan failed");
            internal_error()
        }
    }
}

// ── /tasks/{id}/status ───────────────────────────────────────────────────

#[derive(Deserialize)]
struct TaskStatusUpdatePayload {
    status: Option<String>,
    comment: Option<String>,
}

async fn set_task_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(task_id): Path<i64>,
    Json(payload): Json<TaskStatusUpdatePayload>,
) -> Response {
    let user = match authenticate(&state, &headers).await {
        Ok(u) => u,
        Err(r) => return r,
    };

    match store::task_owned_by_user(&state.pool, task_id, user.id).await {
        Ok(false) => return not_found("Task not found"),
        Err(e) => {
            error!(error = %e, "task ownership check failed");
            return internal_error();
        }
        Ok(true) => {}
    }

    let comment: Option<String> = payload.comment.as_deref().map(|c| c.chars().take(500).collect());

    if let Some(status) = &payload.status {
        let valid = matches!(TaskStatusValue::parse(status), Some(v) if v != TaskStatusValue::Pending);
        if !valid {
            return bad_request("Invalid status");
        }
        if let Err(e) = store::set_task_status(&state.pool, task_id, status, comment.as_deref()).await {
            error!(error = %e, "setting task status failed");
            return internal_error();
        }
    } else if payload.comment.is_some() {
        let comment = comment.filter(|c| !c.is_empty());
        if let Err(e) = store::set_task_comment(&state.pool, task_id, comment.as_deref()).await {
            error!(error = %e, "setting task comment failed");
            return internal_error();
        }
    } else {
        return bad_request("Provide status or comment");
    }

    Json(serde_json::json!({"ok": true})).into_response()
}

// ── /reminders ────────────────────────────────────────────────────────────

async fn list_reminders(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let user = match authenticate(&state, &headers).await {
        Ok(u) => u,
        Err(r) => return r,
    };
    match reminders::list_for_user(&state.pool, user.id).await {
        Ok(rows) => Json(serialize_reminders(&rows)).into_response(),
        Err(e) => {
            error!(error = %e, "listing reminders failed");
            internal_error()
        }
    }
}

fn serialize_reminders(rows: &[crate::models::CustomReminder]) -> serde_json::Value {
    let items: Vec<_> = rows
        .iter()
        .map(|r| {
            serde_json::json!({
                "id": r.id,
                "time_of_day": r.time_of_day,
                "day_of_month": r.day_of_month,
                "description": r.description,
                "repeat_interval_minutes": r.repeat_interval_minutes,
                "max_attempts_per_day": r.max_attempts_per_day,
                "attempts_sent_today": r.attempts_sent_today,
                "done_today": r.done_today,
                "enabled": r.enabled,
            })
        })
        .collect();
    serde_json::json!({"items": items})
}

async fn reminder_stats(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let user = match authenticate(&state, &headers).await {
        Ok(u) => u,
        Err(r) => return r,
    };
    match reminders::stats(&state.pool, user.id).await {
        Ok(s) => Json(serde_json::json!({
            "total": s.total,
            "enabled": s.enabled,
            "disabled": s.disabled,
            "done_today": s.done_today,
            "sent_today": s.sent_today,
        }))
        .into_response(),
        Err(e) => {
            error!(error = %e, "reminder stats failed");
            internal_error()
        }
    }
}

#[derive(Deserialize)]
struct CreateReminderPayload {
    time_of_day: String,
    description: String,
    repeat_interval_minutes: i64,
    max_attempts_per_day: i64,
    day_of_month: Option<i64>,
}

async fn create_reminder(State(state): State<AppState>, headers: HeaderMap, Json(payload): Json<CreateReminderPayload>) -> Response {
    let user = match authenticate(&state, &headers).await {
        Ok(u) => u,
        Err(r) => return r,
    };
    let tz = user_timezone(&user);

    let Ok(time) = time_zone::parse_time_of_day(&payload.time_of_day) else {
        return bad_request("Time format must be HH:MM");
    };
    if payload.description.trim().is_empty() {
        return bad_request("description must not be empty");
    }

    let result = reminders::add_reminder(
        &state.pool,
        user.id,
        tz,
        time,
        payload.description.trim(),
        payload.repeat_interval_minutes,
        payload.max_attempts_per_day,
        payload.day_of_month,
    )
    .await;

    match result {
        Ok(id) => Json(serde_json::json!({"ok": true, "id": id})).into_response(),
        Err(e) => reminder_error_response(e, "creating reminder failed"),
    }
}

#[derive(Deserialize)]
struct UpdateReminderPayload {
    time_of_day: Option<String>,
    description: Option<String>,
    repeat_interval_minutes: Option<i64>,
    max_attempts_per_day: Option<i64>,
    day_of_month: Option<i64>,
    enabled: Option<bool>,
}

async fn update_reminder(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(reminder_id): Path<i64>,
    Json(payload): Json<UpdateReminderPayload>,
) -> Response {
    let user = match authenticate(&state, &headers).await {
        Ok(u) => u,
        Err(r) => return r,
    };
    let tz = user_timezone(&user);

    let time_of_day = match payload.time_of_day.as_deref().map(time_zone::parse_time_of_day) {
        Some(Ok(t)) => Some(t),
        Some(Err(_)) => return bad_request("Time format must be HH:MM"),
        None => None,
    };

    let result = reminders::update(
        &state.pool,
        reminder_id,
        user.id,
        tz,
        time_of_day,
        payload.day_of_month,
        payload.description.as_deref(),
        payload.repeat_interval_minutes,
        payload.max_attempts_per_day,
        payload.enabled,
    )
    .await;

    match result {
        Ok(true) => Json(serde_json::json!({"ok": true})).into_response(),
        Ok(false) => not_found("Reminder not found"),
        Err(e) => reminder_error_response(e, "updating reminder failed"),
    }
}

async fn delete_reminder(State(state): State<AppState>, headers: HeaderMap, Path(reminder_id): Path<i64>) -> Response {
    let user = match authenticate(&state, &headers).await {
        Ok(u) => u,
        Err(r) => return r,
    };
    match reminders::delete(&state.pool, reminder_id, user.id).await {
        Ok(true) => Json(serde_json::json!({"ok": true})).into_response(),
        Ok(false) => not_found("Reminder not found"),
        Err(e) => {
            error!(error = %e, "deleting reminder failed");
            internal_error()
        }
    }
}

fn reminder_error_response(e: anyhow::Error, log_context: &'static str) -> Response {
    match e.downcast::<ReminderError>() {
        Ok(validation) => bad_request(validation.to_string()),
        Err(e) => {
            error!(error = %e, "{}", log_context);
            internal_error()
        }
    }
}
