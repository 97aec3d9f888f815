use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Executor, Row, SqlitePool};
use tracing::info;

use crate::config::Config;

/// Ordered list of migrations. Each entry is (version, name, sql).
/// Versions must be monotonically increasing.
const MIGRATIONS: &[(i64, &str, &str)] = &[
    (
        1,
        "initial_schema",
        include_str!("../migrations/20260715_000001_initial_schema.sql"),
    ),
    (2, "indexes", include_str!("../migrations/20260716_000002_indexes.sql")),
    (
        3,
        "onboarding_flags",
        include_str!("../migrations/20260720_000003_onboarding_flags.sql"),
    ),
];

pub async fn create_pool(config: &Config) -> Result<SqlitePool> {
    let db_path = config.db_path();

    if let Some(parent) = db_path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).with_context(|| format!("creating data directory: {}", parent.display()))?;
    }

    let options = SqliteConnectOptions::new()
        .filename(&db_path)
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .foreign_keys(true);

    // A single in-memory SQLite connection is invisible to any other connection in
    // the pool, so tests that pass ":memory:" must be pinned to exactly one.
    let max_connections = if db_path.as_os_str() == ":memory:" { 1 } else { 5 };

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await
        .with_context(|| format!("connecting to database: {}", db_path.display()))?;

    info!(path = %db_path.display(), "database connected (WAL mode, foreign keys enabled)");

    run_migrations(&pool).await?;

    Ok(pool)
}

async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    pool.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY NOT NULL,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
        )",
    )
    .await
    .context("creating schema_version table")?;

    let row = sqlx::query("SELECT COALESCE(MAX(version), 0) as v FROM schema_version")
        .fetch_one(pool)
        .await
        .context("querying schema version")?;
    let current_version: i64 = row.get("v");

    let mut applied = 0;
    for &(version, name, sql) in MIGRATIONS {
        if version <= current_version {
            continue;
        }
        pool.execute(sql)
            .await
            .with_context(|| format!("applying migration v{version} ({name})"))?;
        sqlx::query("INSERT INTO schema_version (version, name) VALUES (?, ?)")
            .bind(version)
            .bind(name)
            .execute(pool)
            .await
            .with_context(|| format!("recording migration v{version}"))?;
        applied += 1;
        info!(version, name, "applied migration");
    }

    if applied == 0 {
        info!(current_version, "database schema up to date");
    } else {
        info!(applied, "database migrations applied");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, DatabaseConfig, DaylogConfig, TelegramConfig};

    fn memory_config() -> Config {
        Config {
            daylog: DaylogConfig {
                log_level: "info".to_string(),
                listen: "127.0.0.1:0".to_string(),
                dispatch_window_minutes: 10,
                max_concurrent_sends: 4,
            },
            database: DatabaseConfig {
                path: ":memory:".to_string(),
            },
            telegram: TelegramConfig {
                bot_token: "test-token".to_string(),
                webhook_secret: None,
                webhook_base_url: None,
                mode: "long_poll".to_string(),
            },
        }
    }

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let config = memory_config();
        let pool = create_pool(&config).await.expect("first connect");
        // Re-running against the same (in-memory, single-connection-pool) database
        // must not error even though the schema already exists.
        run_migrations(&pool).await.expect("second run");
    }
}
