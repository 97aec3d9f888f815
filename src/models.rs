use chrono::NaiveDate;
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: i64,
    pub telegram_id: i64,
    pub timezone: String,
    pub notify_morning_time: String,
    pub notify_evening_time: String,
    pub morning_reminder_interval_minutes: i64,
    pub morning_reminder_max_attempts: i64,
    pub onboarding_tz_confirmed: bool,
    pub onboarding_morning_confirmed: bool,
    pub onboarding_evening_confirmed: bool,
}

impl User {
    pub fn onboarded(&self) -> bool {
        self.onboarding_tz_confirmed && self.onboarding_morning_confirmed && self.onboarding_evening_confirmed
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct Plan {
    pub id: i64,
    pub user_id: i64,
    pub plan_date: NaiveDate,
}

#[derive(Debug, Clone, FromRow)]
pub struct Task {
    pub id: i64,
    pub plan_id: i64,
    pub position: i64,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatusValue {
    Pending,
    Done,
    Partial,
    Failed,
}

impl TaskStatusValue {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatusValue::Pending => "pending",
            TaskStatusValue::Done => "done",
            TaskStatusValue::Partial => "partial",
            TaskStatusValue::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TaskStatusValue::Pending),
            "done" => Some(TaskStatusValue::Done),
            "partial" => Some(TaskStatusValue::Partial),
            "failed" => Some(TaskStatusValue::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct TaskStatusRow {
    pub id: i64,
    pub task_id: i64,
    pub status: String,
    pub comment: Option<String>,
    pub responded_at: Option<String>,
}

#[derive(Debug, Clone, FromRow)]
pub struct NotificationRecord {
    pub id: i64,
    pub user_id: i64,
    pub channel: String,
    pub local_date: String,
    pub kind: String,
    pub outcome: String,
    pub attempt: i64,
    pub payload: String,
    pub created_at: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct CustomReminder {
    pub id: i64,
    pub user_id: i64,
    pub time_of_day: String,
    pub day_of_month: Option<i64>,
    pub description: String,
    pub repeat_interval_minutes: i64,
    pub max_attempts_per_day: i64,
    pub cycle_local_date: Option<String>,
    pub attempts_sent_today: i64,
    pub done_today: bool,
    pub next_fire_at_utc: Option<chrono::NaiveDateTime>,
    pub last_sent_at_utc: Option<chrono::NaiveDateTime>,
    pub locked_until_utc: Option<chrono::NaiveDateTime>,
    pub enabled: bool,
}
