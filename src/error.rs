use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    ReadFile(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("validation error: {0}")]
    Validation(String),
}

#[derive(Debug, Error)]
pub enum ZoneError {
    #[error("unknown IANA timezone '{0}'")]
    UnknownTimezone(String),
    #[error("invalid time of day '{0}': expected HH:MM")]
    InvalidTimeOfDay(String),
}

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("plan text is empty")]
    Empty,
    #[error("plan text is too long (max {max} characters)")]
    TooLong { max: usize },
    #[error("no tasks could be parsed from the plan text")]
    NoTasks,
    #[error("too many tasks (max {max})")]
    TooManyTasks { max: usize },
}

#[derive(Debug, Error)]
pub enum ReminderError {
    #[error("reminder not found")]
    NotFound,
    #[error("repeat_interval_minutes must be in {min}..={max}")]
    IntervalOutOfRange { min: i64, max: i64 },
    #[error("max_attempts_per_day must be in {min}..={max}")]
    MaxAttemptsOutOfRange { min: i64, max: i64 },
    #[error("day_of_month must be in 1..=31")]
    DayOfMonthOutOfRange,
}

/// Errors raised sending a message through the delivery gateway.
///
/// The `Transient`/`Permanent` split drives the sender retry loop: transient
/// failures (network blips, Telegram 5xx, rate limiting) are retried with
/// backoff; permanent failures (bot blocked, chat not found) are not.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("transient delivery failure: {0}")]
    Transient(String),
    #[error("permanent delivery failure: {0}")]
    Permanent(String),
}

impl DeliveryError {
    pub fn is_permanent(&self) -> bool {
        matches!(self, DeliveryError::Permanent(_))
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing X-Telegram-Init-Data header")]
    MissingInitData,
    #[error("initData hash mismatch")]
    BadHash,
    #[error("initData is malformed: {0}")]
    Malformed(String),
    #[error("initData is stale (auth_date too old)")]
    Stale,
}
