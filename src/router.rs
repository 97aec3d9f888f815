//! Inbound Event Router.
//!
//! Turns a Telegram update (message or callback query) into a store/service
//! call plus a reply, using the conversation FSM to interpret free-text
//! replies in context. Grounded on the original bot's per-topic handler
//! modules (`start.py`, `plan.py`, `evening.py`, `reminders.py`), collapsed
//! into one dispatcher since aiogram's `Router`/middleware machinery has no
//! counterpart here — a match on FSM state plus command text does the same
//! job for a single-process bot.

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::{error, warn};

use crate::fsm::{ConversationState, FsmStore, SettingsField};
use crate::models::User;
use crate::plan;
use crate::reminders;
use crate::render::{self, Rendered};
use crate::store;
use crate::telegram_client::TelegramClient;
use crate::telegram_types::TgUpdate;
use crate::time_zone;

pub struct RouterContext<'a> {
    pub pool: &'a SqlitePool,
    pub client: &'a TelegramClient,
    pub fsm: &'a dyn FsmStore,
}

pub async fn handle_update(ctx: &RouterContext<'_>, update: TgUpdate) {
    if let Some(message) = update.message {
        let Some(from) = message.from.as_ref() else { return };
        let chat_id = message.chat.id;
        let text = message.text.unwrap_or_default();
        if let Err(e) = handle_message(ctx, from.id, chat_id, &text).await {
            error!(error = %e, "failed handling inbound message");
        }
    } else if let Some(callback) = update.callback_query {
        let Some(message) = &callback.message else { return };
        let chat_id = message.chat.id;
        if let Err(e) = handle_callback(ctx, callback.from.id, chat_id, &callback.id, &callback.data.unwrap_or_default()).await {
            error!(error = %e, "failed handling inbound callback");
        }
    }
}

async fn reply(ctx: &RouterContext<'_>, chat_id: i64, rendered: Rendered) -> anyhow::Result<()> {
    if let Err(e) = ctx.client.send_message(chat_id, &rendered).await {
        warn!(chat_id, error = %e, "failed to reply to inbound update");
    }
    Ok(())
}

async fn handle_message(ctx: &RouterContext<'_>, telegram_id: i64, chat_id: i64, text: &str) -> anyhow::Result<()> {
    let user = store::get_or_create_user(ctx.pool, telegram_id).await?;

    if let Some(command) = text.strip_prefix('/') {
        return handle_command(ctx, &user, chat_id, command).await;
    }

    match ctx.fsm.get(chat_id) {
        ConversationState::Idle => {
            reply(ctx, chat_id, render::plain_help()).await
        }
        ConversationState::OnboardingTimezone => handle_onboarding_timezone(ctx, &user, chat_id, text, true).await,
        ConversationState::OnboardingMorningTime => handle_onboarding_time(ctx, &user, chat_id, text, true, true).await,
        ConversationState::OnboardingEveningTime => handle_onboarding_time(ctx, &user, chat_id, text, false, true).await,
        ConversationState::AwaitingPlan { plan_date } => handle_plan_text(ctx, &user, chat_id, plan_date, text).await,
        ConversationState::AwaitingTaskComment { task_id } => handle_task_comment(ctx, chat_id, task_id, text).await,
        ConversationState::AwaitingSettingsField { field } => handle_settings_field(ctx, &user, chat_id, field, text).await,
    }
}

async fn handle_command(ctx: &RouterContext<'_>, user: &User, chat_id: i64, command: &str) -> anyhow::Result<()> {
    let (name, arg) = command.split_once(char::is_whitespace).unwrap_or((command, ""));
    match name {
        "start" => {
            ctx.fsm.set(chat_id, ConversationState::OnboardingTimezone);
            reply(ctx, chat_id, render::onboarding_timezone_prompt()).await
        }
        "settings" => reply(ctx, chat_id, render::settings_summary(user)).await,
        "timezone" => {
            ctx.fsm.set(chat_id, ConversationState::AwaitingSettingsField { field: SettingsField::Timezone });
            reply(ctx, chat_id, render::onboarding_timezone_prompt()).await
        }
        "set_morning" => {
            ctx.fsm.set(chat_id, ConversationState::AwaitingSettingsField { field: SettingsField::MorningTime });
            reply(ctx, chat_id, render::ask_time_of_day("morning")).await
        }
        "set_evening" => {
            ctx.fsm.set(chat_id, ConversationState::AwaitingSettingsField { field: SettingsField::EveningTime });
            reply(ctx, chat_id, render::ask_time_of_day("evening")).await
        }
        "set_interval" => {
            ctx.fsm.set(chat_id, ConversationState::AwaitingSettingsField { field: SettingsField::ReminderIntervalMinutes });
            reply(ctx, chat_id, render::plain_text("How many minutes between morning reminders? (5-720)")).await
        }
        "set_attempts" => {
            ctx.fsm.set(chat_id, ConversationState::AwaitingSettingsField { field: SettingsField::ReminderMaxAttempts });
            reply(ctx, chat_id, render::plain_text("Max morning reminders per day? (0-10)")).await
        }
        "reminders" => {
            let stats = reminders::stats(ctx.pool, user.id).await?;
            reply(ctx, chat_id, render::reminder_stats_summary(&stats)).await
        }
        "plan" => {
            let today = time_zone::local_date(Utc::now(), user_timezone(user));
            ctx.fsm.set(chat_id, ConversationState::AwaitingPlan { plan_date: today });
            reply(ctx, chat_id, render::morning_prompt()).await
        }
        "help" | "commands" => reply(ctx, chat_id, render::plain_help()).await,
        _ => {
            let _ = arg;
            reply(ctx, chat_id, render::plain_text("Unknown command. Send /help to see what I understand.")).await
        }
    }
}

fn user_timezone(user: &User) -> chrono_tz::Tz {
    time_zone::parse_timezone(&user.timezone).unwrap_or(chrono_tz::UTC)
}

/// Handles a timezone reply both during onboarding (`is_onboarding`,
/// advances to the morning-time step) and from `/timezone` outside of it
/// (just updates the setting and returns to Idle).
async fn handle_onboarding_timezone(ctx: &RouterContext<'_>, user: &User, chat_id: i64, text: &str, is_onboarding: bool) -> anyhow::Result<()> {
    match time_zone::parse_timezone(text.trim()) {
        Ok(_) => {
            store::update_user_settings(
                ctx.pool,
                user.id,
                text.trim(),
                &user.notify_morning_time,
                &user.notify_evening_time,
                user.morning_reminder_interval_minutes,
                user.morning_reminder_max_attempts,
            )
            .await?;

            if is_onboarding {
                store::confirm_onboarding_timezone(ctx.pool, user.id).await?;
                ctx.fsm.set(chat_id, ConversationState::OnboardingMorningTime);
                reply(ctx, chat_id, render::ask_time_of_day("morning")).await
            } else {
                ctx.fsm.clear(chat_id);
                reply(ctx, chat_id, render::plain_text("Timezone updated.")).await
            }
        }
        Err(_) => reply(ctx, chat_id, render::plain_text("I don't recognize that timezone. Send an IANA name, e.g. Europe/Berlin.")).await,
    }
}

/// Handles a time-of-day reply both during onboarding (`is_onboarding`,
/// morning advances to the evening step, evening confirms and clears to
/// Idle) and from `/set_morning`/`/set_evening` outside of it.
async fn handle_onboarding_time(ctx: &RouterContext<'_>, user: &User, chat_id: i64, text: &str, morning: bool, is_onboarding: bool) -> anyhow::Result<()> {
    match time_zone::parse_time_of_day(text.trim()) {
        Ok(_) => {
            let (morning_time, evening_time) = if morning {
                (text.trim(), user.notify_evening_time.as_str())
            } else {
                (user.notify_morning_time.as_str(), text.trim())
            };
            store::update_user_settings(
                ctx.pool,
                user.id,
                &user.timezone,
                morning_time,
                evening_time,
                user.morning_reminder_interval_minutes,
                user.morning_reminder_max_attempts,
            )
            .await?;

            if is_onboarding && morning {
                store::confirm_onboarding_morning(ctx.pool, user.id).await?;
                ctx.fsm.set(chat_id, ConversationState::OnboardingEveningTime);
                reply(ctx, chat_id, render::ask_time_of_day("evening")).await
            } else if is_onboarding {
                store::confirm_onboarding_evening(ctx.pool, user.id).await?;
                ctx.fsm.clear(chat_id);
                reply(ctx, chat_id, render::plain_text("All set. Send /settings any time to review or change your schedule.")).await
            } else {
                ctx.fsm.clear(chat_id);
                reply(ctx, chat_id, render::plain_text("Got it.")).await
            }
        }
        Err(_) => reply(ctx, chat_id, render::plain_text("Please send a time as HH:MM, e.g. 07:30.")).await,
    }
}

async fn handle_plan_text(ctx: &RouterContext<'_>, user: &User, chat_id: i64, plan_date: chrono::NaiveDate, text: &str) -> anyhow::Result<()> {
    match plan::save_plan(ctx.pool, user.id, plan_date, text).await {
        Ok(_) => {
            ctx.fsm.clear(chat_id);
            reply(ctx, chat_id, render::plain_text("Plan saved. I'll check in this evening.")).await
        }
        Err(e) => reply(ctx, chat_id, render::plain_text(&format!("Couldn't save that plan: {e}"))).await,
    }
}

async fn handle_task_comment(ctx: &RouterContext<'_>, chat_id: i64, task_id: i64, text: &str) -> anyhow::Result<()> {
    let comment = text.trim();
    let comment = if comment.is_empty() || comment == "-" { None } else { Some(&comment[..comment.len().min(500)]) };
    store::set_task_comment(ctx.pool, task_id, comment).await?;
    ctx.fsm.clear(chat_id);
    reply(ctx, chat_id, render::plain_text("Noted.")).await
}

async fn handle_settings_field(ctx: &RouterContext<'_>, user: &User, chat_id: i64, field: SettingsField, text: &str) -> anyhow::Result<()> {
    let text = text.trim();
    match field {
        SettingsField::Timezone => handle_onboarding_timezone(ctx, user, chat_id, text, false).await,
        SettingsField::MorningTime => handle_onboarding_time(ctx, user, chat_id, text, true, false).await,
        SettingsField::EveningTime => handle_onboarding_time(ctx, user, chat_id, text, false, false).await,
        SettingsField::ReminderIntervalMinutes => match text.parse::<i64>() {
            Ok(minutes) if reminders::validate_interval(minutes).is_ok() => {
                store::update_user_settings(
                    ctx.pool,
                    user.id,
                    &user.timezone,
                    &user.notify_morning_time,
                    &user.notify_evening_time,
                    minutes,
                    user.morning_reminder_max_attempts,
                )
                .await?;
                ctx.fsm.clear(chat_id);
                reply(ctx, chat_id, render::plain_text("Reminder interval updated.")).await
            }
            _ => reply(ctx, chat_id, render::plain_text("Send a whole number of minutes between 5 and 720.")).await,
        },
        SettingsField::ReminderMaxAttempts => match text.parse::<i64>() {
            Ok(attempts) if reminders::validate_max_attempts(attempts).is_ok() => {
                store::update_user_settings(
                    ctx.pool,
                    user.id,
                    &user.timezone,
                    &user.notify_morning_time,
                    &user.notify_evening_time,
                    user.morning_reminder_interval_minutes,
                    attempts,
                )
                .await?;
                ctx.fsm.clear(chat_id);
                reply(ctx, chat_id, render::plain_text("Reminder cap updated.")).await
            }
            _ => reply(ctx, chat_id, render::plain_text("Send a whole number between 0 and 10.")).await,
        },
    }
}

async fn handle_callback(ctx: &RouterContext<'_>, telegram_id: i64, chat_id: i64, callback_id: &str, data: &str) -> anyhow::Result<()> {
    let user = store::get_or_create_user(ctx.pool, telegram_id).await?;
    let _ = ctx.client.answer_callback_query(callback_id).await;

    if let Some(task_id) = data.strip_prefix("task:done:").and_then(|s| s.parse::<i64>().ok()) {
        store::set_task_status(ctx.pool, task_id, "done", None).await?;
        return reply(ctx, chat_id, render::plain_text("Marked done.")).await;
    }
    if let Some(task_id) = data.strip_prefix("task:partial:").and_then(|s| s.parse::<i64>().ok()) {
        store::set_task_status(ctx.pool, task_id, "partial", None).await?;
        ctx.fsm.set(chat_id, ConversationState::AwaitingTaskComment { task_id });
        return reply(ctx, chat_id, render::plain_text("Marked partial. Anything you want to note? Send a comment, or \"-\" to skip.")).await;
    }
    if let Some(task_id) = data.strip_prefix("task:failed:").and_then(|s| s.parse::<i64>().ok()) {
        store::set_task_status(ctx.pool, task_id, "failed", None).await?;
        ctx.fsm.set(chat_id, ConversationState::AwaitingTaskComment { task_id });
        return reply(ctx, chat_id, render::plain_text("Marked failed. Anything you want to note? Send a comment, or \"-\" to skip.")).await;
    }

    let _ = user;
    Ok(())
}
