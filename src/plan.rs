//! Plan Service.
//!
//! Parsing is ported semantics-for-semantics from the original
//! implementation's plan-text parser: split on line breaks, trim, drop
//! leading "1." / "2)" numbering, cap per-task and total length.

use anyhow::Result;
use chrono::NaiveDate;
use sqlx::SqlitePool;

use crate::error::PlanError;
use crate::models::{Task, TaskStatusRow};
use crate::store;

pub const MAX_TASK_LENGTH: usize = 500;
pub const MAX_PLAN_LENGTH: usize = 10_000;
pub const MAX_TASKS: usize = 50;

/// Split free text into individual task strings. Never errors; callers that
/// need error messages for user-facing validation should call
/// [`validate_plan_text`] first.
pub fn parse_plan_lines(raw: &str) -> Vec<String> {
    if raw.trim().is_empty() {
        return Vec::new();
    }

    let mut tasks = Vec::new();
    for line in raw.split(['\r', '\n']) {
        let mut s = line.trim();
        if s.is_empty() {
            continue;
        }
        s = strip_leading_numbering(s);
        if s.is_empty() {
            continue;
        }
        let truncated: String = s.chars().take(MAX_TASK_LENGTH).collect();
        tasks.push(truncated);
        if tasks.len() >= MAX_TASKS {
            break;
        }
    }
    tasks
}

/// Strips a leading "1.", "2)", "3 " numbering prefix, if present.
fn strip_leading_numbering(s: &str) -> &str {
    let digits_end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(0);
    if digits_end == 0 {
        return s;
    }
    let rest = &s[digits_end..];
    let rest = rest.strip_prefix('.').or_else(|| rest.strip_prefix(')'));
    match rest {
        Some(rest) => rest.trim_start(),
        None => s,
    }
}

pub fn validate_plan_text(raw: &str) -> Result<(), PlanError> {
    if raw.trim().is_empty() {
        return Err(PlanError::Empty);
    }
    if raw.chars().count() > MAX_PLAN_LENGTH {
        return Err(PlanError::TooLong { max: MAX_PLAN_LENGTH });
    }
    let tasks = parse_plan_lines(raw);
    if tasks.is_empty() {
        return Err(PlanError::NoTasks);
    }
    if tasks.len() > MAX_TASKS {
        return Err(PlanError::TooManyTasks { max: MAX_TASKS });
    }
    Ok(())
}

pub async fn save_plan(pool: &SqlitePool, user_id: i64, plan_date: NaiveDate, raw: &str) -> Result<i64> {
    validate_plan_text(raw)?;
    let tasks = parse_plan_lines(raw);
    store::save_plan(pool, user_id, plan_date, &tasks).await
}

pub async fn get_tasks_with_status(pool: &SqlitePool, plan_id: i64) -> Result<Vec<(Task, TaskStatusRow)>> {
    let tasks = store::get_tasks_for_plan(pool, plan_id).await?;
    let mut out = Vec::with_capacity(tasks.len());
    for task in tasks {
        let status = store::get_task_status(pool, task.id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("task {} has no status row", task.id))?;
        out.push((task, status));
    }
    Ok(out)
}

pub async fn completion_percent(pool: &SqlitePool, plan_id: i64) -> Result<u8> {
    let (done, total) = store::plan_completion(pool, plan_id).await?;
    if total == 0 {
        return Ok(0);
    }
    Ok(((done * 100) / total) as u8)
}

/// Weighted completion (partial tasks count as half) plus the task total,
/// used for history/stats percentages. Callers round `100.0 * done / total`
/// themselves rather than truncating here.
pub async fn completion_weighted(pool: &SqlitePool, plan_id: i64) -> Result<(f64, i64)> {
    let tasks = get_tasks_with_status(pool, plan_id).await?;
    let total = tasks.len() as i64;
    let done: f64 = tasks
        .iter()
        .map(|(_, status)| match status.status.as_str() {
            "done" => 1.0,
            "partial" => 0.5,
            _ => 0.0,
        })
        .sum();
    Ok((done, total))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_numbering_variants() {
        let tasks = parse_plan_lines("1. write report\n2) gym\n3 call mom");
        assert_eq!(tasks, vec!["write report", "gym", "call mom"]);
    }

    #[test]
    fn drops_blank_lines() {
        let tasks = parse_plan_lines("a\n\n\nb\n");
        assert_eq!(tasks, vec!["a", "b"]);
    }

    #[test]
    fn truncates_oversized_task() {
        let long = "x".repeat(600);
        let tasks = parse_plan_lines(&long);
        assert_eq!(tasks[0].chars().count(), MAX_TASK_LENGTH);
    }

    #[test]
    fn caps_at_max_tasks() {
        let raw = (0..60).map(|i| format!("task {i}")).collect::<Vec<_>>().join("\n");
        let tasks = parse_plan_lines(&raw);
        assert_eq!(tasks.len(), MAX_TASKS);
    }

    #[test]
    fn validate_rejects_empty() {
        assert!(matches!(validate_plan_text("   "), Err(PlanError::Empty)));
    }

    #[test]
    fn validate_rejects_numbering_only_lines() {
        // "1." with nothing after it parses to an empty string and is dropped,
        // so a plan consisting only of bare numbering has no tasks.
        assert!(matches!(validate_plan_text("1.\n2)"), Err(PlanError::NoTasks)));
    }
}
