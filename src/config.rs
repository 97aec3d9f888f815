use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::error::ConfigError;

#[derive(Debug, Deserialize)]
pub struct Config {
    pub daylog: DaylogConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    pub telegram: TelegramConfig,
}

#[derive(Debug, Deserialize)]
pub struct DaylogConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Minutes after a user's target local time that we still consider the tick "due".
    /// Covers ticker jitter and clock drift between restarts.
    #[serde(default = "default_dispatch_window")]
    pub dispatch_window_minutes: i64,
    #[serde(default = "default_max_concurrent_sends")]
    pub max_concurrent_sends: u32,
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_listen() -> String {
    "0.0.0.0:8080".to_string()
}
fn default_dispatch_window() -> i64 {
    10
}
fn default_max_concurrent_sends() -> u32 {
    8
}

#[derive(Debug, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> String {
    "daylog.db".to_string()
}

#[derive(Debug, Deserialize)]
pub struct TelegramConfig {
    pub bot_token: String,
    #[serde(default)]
    pub webhook_secret: Option<String>,
    #[serde(default)]
    pub webhook_base_url: Option<String>,
    /// "long_poll" or "webhook".
    #[serde(default = "default_mode")]
    pub mode: String,
}

fn default_mode() -> String {
    "long_poll".to_string()
}

impl Config {
    pub fn db_path(&self) -> PathBuf {
        PathBuf::from(&self.database.path)
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .map_err(ConfigError::ReadFile)
        .context("reading config file")?;
    let mut config: Config = toml::from_str(&content).map_err(ConfigError::Parse)?;
    apply_env_overrides(&mut config);
    Ok(config)
}

/// `DAYLOG_`-prefixed environment variables override file values at load time.
/// The file is the source of defaults; the environment wins when set, which
/// keeps secrets (bot token, webhook secret) out of the config file in
/// container deployments.
fn apply_env_overrides(config: &mut Config) {
    if let Ok(v) = std::env::var("DAYLOG_TELEGRAM_BOT_TOKEN") {
        config.telegram.bot_token = v;
    }
    if let Ok(v) = std::env::var("DAYLOG_TELEGRAM_WEBHOOK_SECRET") {
        config.telegram.webhook_secret = Some(v);
    }
    if let Ok(v) = std::env::var("DAYLOG_TELEGRAM_WEBHOOK_BASE_URL") {
        config.telegram.webhook_base_url = Some(v);
    }
    if let Ok(v) = std::env::var("DAYLOG_DATABASE_PATH") {
        config.database.path = v;
    }
    if let Ok(v) = std::env::var("DAYLOG_LOG_LEVEL") {
        config.daylog.log_level = v;
    }
    if let Ok(v) = std::env::var("DAYLOG_LISTEN") {
        config.daylog.listen = v;
    }
}

pub fn validate_config(config: &Config) -> Result<()> {
    if config.telegram.bot_token.trim().is_empty() {
        return Err(ConfigError::Validation("telegram.bot_token must not be empty".to_string()).into());
    }

    match config.telegram.mode.as_str() {
        "long_poll" => {}
        "webhook" => {
            if config
                .telegram
                .webhook_base_url
                .as_deref()
                .is_none_or(str::is_empty)
            {
                return Err(ConfigError::Validation(
                    "telegram.mode = \"webhook\" requires telegram.webhook_base_url".to_string(),
                )
                .into());
            }
        }
        other => {
            return Err(ConfigError::Validation(format!(
                "telegram.mode must be \"long_poll\" or \"webhook\", got '{other}'"
            ))
            .into());
        }
    }

    if config.daylog.dispatch_window_minutes <= 0 || config.daylog.dispatch_window_minutes > 120 {
        return Err(ConfigError::Validation(format!(
            "daylog.dispatch_window_minutes must be in 1..=120, got {}",
            config.daylog.dispatch_window_minutes
        ))
        .into());
    }

    if config.daylog.max_concurrent_sends == 0 {
        return Err(ConfigError::Validation("daylog.max_concurrent_sends must be at least 1".to_string()).into());
    }

    config.daylog.listen.parse::<std::net::SocketAddr>().map_err(|e| {
        ConfigError::Validation(format!("invalid daylog.listen address '{}': {e}", config.daylog.listen))
    })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_bot_token() {
        let config = Config {
            daylog: DaylogConfig {
                log_level: "info".into(),
                listen: "0.0.0.0:8080".into(),
                dispatch_window_minutes: 10,
                max_concurrent_sends: 4,
            },
            database: DatabaseConfig::default(),
            telegram: TelegramConfig {
                bot_token: "".into(),
                webhook_secret: None,
                webhook_base_url: None,
                mode: "long_poll".into(),
            },
        };
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn webhook_mode_requires_base_url() {
        let config = Config {
            daylog: DaylogConfig {
                log_level: "info".into(),
                listen: "0.0.0.0:8080".into(),
                dispatch_window_minutes: 10,
                max_concurrent_sends: 4,
            },
            database: DatabaseConfig::default(),
            telegram: TelegramConfig {
                bot_token: "abc".into(),
                webhook_secret: None,
                webhook_base_url: None,
                mode: "webhook".into(),
            },
        };
        assert!(validate_config(&config).is_err());
    }
}
