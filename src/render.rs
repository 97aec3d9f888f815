//! Message Renderer.
//!
//! Pure functions: entity state in, (text, optional keyboard) out. Kept
//! separate from the delivery gateway so renderings can be unit tested
//! without a network client.

use crate::models::{Task, TaskStatusRow, User};
use crate::reminders::ReminderStats;
use crate::telegram_types::{InlineKeyboardButton, InlineKeyboardMarkup};

pub struct Rendered {
    pub text: String,
    pub keyboard: Option<InlineKeyboardMarkup>,
}

fn plain(text: impl Into<String>) -> Rendered {
    Rendered { text: text.into(), keyboard: None }
}

pub fn morning_prompt() -> Rendered {
    plain(
        "Good morning! What's on your plate today?\n\n\
         Send your tasks for today, one per line. You can number them or not, either works.",
    )
}

pub fn morning_reminder(attempt: i64) -> Rendered {
    let _ = attempt; // attempt number is logged, not shown to the user
    plain("Still waiting on today's plan — send your tasks whenever you're ready, one per line.")
}

pub fn evening_prompt(tasks: &[(Task, TaskStatusRow)]) -> Rendered {
    let mut text = String::from("How did today go? Here's your plan:\n\n");
    let mut buttons = Vec::new();
    for (task, status) in tasks {
        let marker = match status.status.as_str() {
            "done" => "\u{2705}",
            "partial" => "\u{1F7E1}",
            "failed" => "\u{274C}",
            _ => "\u{25AB}",
        };
        text.push_str(&format!("{marker} {}\n", task.text));
        if status.status == "pending" {
            buttons.push(vec![
                InlineKeyboardButton::new("\u{2705} Done", format!("task:done:{}", task.id)),
                InlineKeyboardButton::new("\u{1F7E1} Partial", format!("task:partial:{}", task.id)),
                InlineKeyboardButton::new("\u{274C} Failed", format!("task:failed:{}", task.id)),
            ]);
        }
    }
    Rendered {
        text,
        keyboard: if buttons.is_empty() { None } else { Some(InlineKeyboardMarkup::rows(buttons)) },
    }
}

pub fn evening_reminder() -> Rendered {
    plain("Quick check-in: did you get through today's plan? Tap a task in the earlier message, or just send me an update.")
}

pub fn custom_reminder(description: &str) -> Rendered {
    plain(description.to_string())
}

pub fn delivery_error_notice(context: &str) -> Rendered {
    plain(format!(
        "I ran into a problem delivering a notification ({context}). I'll keep the rest of your schedule running."
    ))
}

pub fn plain_text(text: &str) -> Rendered {
    plain(text.to_string())
}

pub fn plain_help() -> Rendered {
    plain(
        "Commands: /start, /settings, /timezone, /set_morning, /set_evening, \
         /set_interval, /set_attempts, /reminders, /plan, /help",
    )
}

pub fn onboarding_timezone_prompt() -> Rendered {
    plain("What's your timezone? Send an IANA name, e.g. Europe/Berlin or America/New_York.")
}

pub fn ask_time_of_day(which: &str) -> Rendered {
    plain(format!("What time should your {which} check-in arrive? Send it as HH:MM."))
}

pub fn settings_summary(user: &User) -> Rendered {
    plain(format!(
        "Timezone: {}\nMorning check-in: {}\nEvening check-in: {}\nReminder interval: {} min\nReminder cap: {}",
        user.timezone,
        user.notify_morning_time,
        user.notify_evening_time,
        user.morning_reminder_interval_minutes,
        user.morning_reminder_max_attempts,
    ))
}

pub fn reminder_stats_summary(stats: &ReminderStats) -> Rendered {
    plain(format!(
        "Reminders: {} total ({} enabled, {} disabled)\nDone today: {}\nSent today: {}",
        stats.total, stats.enabled, stats.disabled, stats.done_today, stats.sent_today
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TaskStatusRow;

    fn task(id: i64, text: &str) -> Task {
        Task { id, plan_id: 1, position: 0, text: text.to_string() }
    }

    fn status(task_id: i64, status: &str) -> TaskStatusRow {
        TaskStatusRow { id: task_id, task_id, status: status.to_string(), comment: None, responded_at: None }
    }

    #[test]
    fn evening_prompt_only_offers_buttons_for_pending_tasks() {
        let tasks = vec![
            (task(1, "write report"), status(1, "pending")),
            (task(2, "gym"), status(2, "done")),
        ];
        let rendered = evening_prompt(&tasks);
        let keyboard = rendered.keyboard.expect("keyboard present when at least one task is pending");
        assert_eq!(keyboard.inline_keyboard.len(), 1);
    }

    #[test]
    fn evening_prompt_has_no_keyboard_when_all_done() {
        let tasks = vec![(task(1, "write report"), status(1, "done"))];
        let rendered = evening_prompt(&tasks);
        assert!(rendered.keyboard.is_none());
    }
}
