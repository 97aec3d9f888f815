//! Long-Poll Update Loop.
//!
//! Used when `telegram.mode = "long_poll"` instead of a webhook: repeatedly
//! calls `getUpdates` with a long server-side timeout and feeds whatever
//! comes back through the same [`crate::router::handle_update`] the webhook
//! route uses, advancing the offset past whatever it received so Telegram
//! doesn't redeliver. Grounded on the teacher's `poller.rs` loop shape
//! (wake, fetch, process, repeat) with the backoff it already uses for a
//! failing upstream call.

use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::fsm::FsmStore;
use crate::router::{self, RouterContext};
use crate::telegram_client::TelegramClient;

const LONG_POLL_TIMEOUT_SECS: i64 = 30;
const ERROR_BACKOFF_SECS: u64 = 5;

pub async fn long_poll_loop(pool: SqlitePool, client: TelegramClient, fsm: std::sync::Arc<dyn FsmStore>, cancel: CancellationToken) {
    info!("long-poll loop started");
    let mut offset = 0i64;

    loop {
        if cancel.is_cancelled() {
            info!("long-poll loop shutting down");
            return;
        }

        let updates = tokio::select! {
            _ = cancel.cancelled() => return,
            result = client.get_updates(offset, LONG_POLL_TIMEOUT_SECS) => result,
        };

        let updates = match updates {
            Ok(u) => u,
            Err(e) => {
                warn!(error = %e, "getUpdates failed, backing off");
                tokio::time::sleep(std::time::Duration::from_secs(ERROR_BACKOFF_SECS)).await;
                continue;
            }
        };

        for update in updates {
            offset = offset.max(update.update_id + 1);
            let ctx = RouterContext { pool: &pool, client: &client, fsm: &*fsm };
            router::handle_update(&ctx, update).await;
        }
    }
}

#[cfg(test)]
mod tests {
    #[test]
    fn offset_advances_past_highest_update_id() {
        let mut offset = 5i64;
        for update_id in [5i64, 7, 6] {
            offset = offset.max(update_id + 1);
        }
        assert_eq!(offset, 8);
    }
}
