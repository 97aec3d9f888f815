use std::sync::Arc;

use anyhow::{Context, Result};
use rand::Rng;
use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::Config;
use crate::fsm::{FsmStore, InMemoryFsmStore};
use crate::jobqueue;
use crate::telegram_client::TelegramClient;
use crate::{db, poller, reminder_dispatcher, senders, server, store, ticker};

const JOB_QUEUE_CAPACITY: usize = 256;

pub async fn run(config: Config) -> Result<()> {
    let pool = db::create_pool(&config).await.context("creating database")?;
    info!(db_path = %config.db_path().display(), "database ready");

    let webhook_secret = bootstrap_webhook_secret(&pool, &config).await?;

    let config = Arc::new(config);
    let cancel = CancellationToken::new();
    let client = Arc::new(TelegramClient::new(&config.telegram.bot_token));
    let fsm: Arc<dyn FsmStore> = Arc::new(InMemoryFsmStore::default());
    let (jobs_tx, jobs_rx) = jobqueue::channel(JOB_QUEUE_CAPACITY);

    let ticker_handle = tokio::spawn(ticker::ticker_loop(
        pool.clone(),
        jobs_tx.clone(),
        config.daylog.dispatch_window_minutes,
        cancel.clone(),
    ));

    let sender_handle = tokio::spawn(senders::sender_loop(
        pool.clone(),
        (*client).clone(),
        jobs_rx,
        config.daylog.max_concurrent_sends as usize,
        cancel.clone(),
    ));

    let reminder_handle = tokio::spawn(reminder_dispatcher::reminder_dispatcher_loop(pool.clone(), jobs_tx.clone(), cancel.clone()));

    let poller_handle = if config.telegram.mode == "long_poll" {
        Some(tokio::spawn(poller::long_poll_loop(pool.clone(), (*client).clone(), fsm.clone(), cancel.clone())))
    } else {
        if let Some(base_url) = &config.telegram.webhook_base_url {
            let webhook_url = format!("{}/webhook", base_url.trim_end_matches('/'));
            client.set_webhook(&webhook_url, webhook_secret.as_deref()).await.context("registering webhook with Telegram")?;
            info!(webhook_url, "webhook registered");
        }
        None
    };

    let app_state = server::AppState {
        pool: pool.clone(),
        client: client.clone(),
        fsm: fsm.clone(),
        bot_token: config.telegram.bot_token.clone(),
        webhook_secret,
    };

    let router = server::build_router(app_state);
    let listener = tokio::net::TcpListener::bind(&config.daylog.listen)
        .await
        .with_context(|| format!("binding to {}", config.daylog.listen))?;

    info!(listen = %config.daylog.listen, "HTTP server listening");

    let server_cancel = cancel.clone();
    let server_handle = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                server_cancel.cancelled().await;
            })
            .await
    });

    wait_for_shutdown().await;
    info!("shutdown signal received");

    cancel.cancel();

    let shutdown_timeout = std::time::Duration::from_secs(10);
    let _ = tokio::time::timeout(shutdown_timeout, async {
        let _ = ticker_handle.await;
        let _ = sender_handle.await;
        let _ = reminder_handle.await;
        if let Some(handle) = poller_handle {
            let _ = handle.await;
        }
        let _ = server_handle.await;
    })
    .await;

    pool.close().await;
    info!("shutdown complete");

    Ok(())
}

/// Priority: config value -> DB stored value -> auto-generate. A generated
/// secret is persisted so restarts keep validating the same webhook calls.
async fn bootstrap_webhook_secret(pool: &SqlitePool, config: &Config) -> Result<Option<String>> {
    if config.telegram.mode != "webhook" {
        return Ok(config.telegram.webhook_secret.clone());
    }

    if let Some(secret) = &config.telegram.webhook_secret {
        store::set_setting(pool, "webhook_secret", secret).await?;
        return Ok(Some(secret.clone()));
    }

    if let Some(secret) = store::get_setting(pool, "webhook_secret").await? {
        return Ok(Some(secret));
    }

    let secret = generate_token();
    store::set_setting(pool, "webhook_secret", &secret).await?;
    info!("webhook secret generated and stored");
    Ok(Some(secret))
}

fn generate_token() -> String {
    use rand::distr::Alphanumeric;
    rand::rng().sample_iter(&Alphanumeric).take(32).map(char::from).collect()
}

async fn wait_for_shutdown() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()).expect("failed to register SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {},
            _ = sigterm.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
