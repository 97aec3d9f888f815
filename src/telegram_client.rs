//! Delivery Gateway Adapter: Telegram Bot API over HTTPS.
//!
//! Grounded on the request/response shape of a reqwest-based Bot API client
//! (check status, deserialize `TelegramResponse<T>`, map failures), extended
//! with the permanent/transient classification the sender retry loop needs.

use anyhow::Context as _;
use tracing::warn;

use crate::error::DeliveryError;
use crate::render::Rendered;
use crate::telegram_types::{TelegramResponse, TgUpdate};

#[derive(Clone)]
pub struct TelegramClient {
    http: reqwest::Client,
    base_url: String,
}

const BOTS_CANT_SEND_TO_BOTS: &str = "bots can't send messages to bots";

impl TelegramClient {
    pub fn new(bot_token: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: format!("https://api.telegram.org/bot{bot_token}"),
        }
    }

    pub async fn send_message(&self, chat_id: i64, rendered: &Rendered) -> Result<(), DeliveryError> {
        let mut body = serde_json::json!({
            "chat_id": chat_id,
            "text": rendered.text,
        });
        if let Some(keyboard) = &rendered.keyboard {
            body["reply_markup"] = serde_json::to_value(keyboard).unwrap_or_default();
        }
        self.call::<serde_json::Value>("sendMessage", &body).await?;
        Ok(())
    }

    pub async fn answer_callback_query(&self, callback_query_id: &str) -> Result<(), DeliveryError> {
        let body = serde_json::json!({ "callback_query_id": callback_query_id });
        self.call::<serde_json::Value>("answerCallbackQuery", &body).await?;
        Ok(())
    }

    pub async fn get_updates(&self, offset: i64, timeout_secs: i64) -> Result<Vec<TgUpdate>, DeliveryError> {
        let body = serde_json::json!({
            "offset": offset,
            "timeout": timeout_secs,
            "allowed_updates": ["message", "callback_query"],
        });
        self.call("getUpdates", &body).await
    }

    pub async fn set_webhook(&self, url: &str, secret_token: Option<&str>) -> Result<(), DeliveryError> {
        let mut body = serde_json::json!({ "url": url });
        if let Some(secret) = secret_token {
            body["secret_token"] = serde_json::Value::String(secret.to_string());
        }
        self.call::<serde_json::Value>("setWebhook", &body).await?;
        Ok(())
    }

    async fn call<T: serde::de::DeserializeOwned>(&self, method: &str, body: &serde_json::Value) -> Result<T, DeliveryError> {
        let url = format!("{}/{method}", self.base_url);
        let response = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| DeliveryError::Transient(format!("request to {method} failed: {e}")))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| DeliveryError::Transient(format!("reading {method} response body failed: {e}")))?;

        let parsed: TelegramResponse<T> = serde_json::from_str(&text)
            .with_context(|| format!("parsing {method} response: {text}"))
            .map_err(|e| DeliveryError::Transient(e.to_string()))?;

        if !parsed.ok {
            let description = parsed.description.unwrap_or_default();
            if is_permanent_telegram_error(&description) {
                return Err(DeliveryError::Permanent(description));
            }
            if status.is_server_error() {
                return Err(DeliveryError::Transient(description));
            }
            warn!(method, status = %status, description = %description, "telegram API call failed");
            return Err(DeliveryError::Transient(description));
        }

        parsed
            .result
            .ok_or_else(|| DeliveryError::Transient(format!("{method}: ok response with no result")))
    }
}

/// Mirrors the original system's permanent-error heuristic: the bot was
/// blocked, the chat is gone, or we're talking to another bot — none of
/// these resolve with a retry.
fn is_permanent_telegram_error(description: &str) -> bool {
    if description.contains(BOTS_CANT_SEND_TO_BOTS) {
        return true;
    }
    description.contains("Forbidden:") && description.to_lowercase().contains("bot")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_bot_to_bot_as_permanent() {
        assert!(is_permanent_telegram_error("Forbidden: bots can't send messages to bots"));
    }

    #[test]
    fn classifies_blocked_as_permanent() {
        assert!(is_permanent_telegram_error("Forbidden: bot was blocked by the user"));
    }

    #[test]
    fn classifies_rate_limit_as_transient() {
        assert!(!is_permanent_telegram_error("Too Many Requests: retry after 3"));
    }
}
