//! Telegram WebApp initData validation.
//!
//! Ported from the original system's `validate_webapp_init_data`: the
//! standard Telegram WebApp HMAC scheme, double-keyed (`HMAC-SHA256(bot
//! token, "WebAppData")` as the secret, then `HMAC-SHA256(secret,
//! data-check-string)` as the signature), compared in constant time.

use std::collections::BTreeMap;

use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::AuthError;

type HmacSha256 = Hmac<Sha256>;

const MAX_AGE_SECONDS: i64 = 24 * 3600;

pub struct WebAppAuth {
    pub telegram_user_id: i64,
    pub auth_date: i64,
}

pub fn validate_init_data(init_data: &str, bot_token: &str) -> Result<WebAppAuth, AuthError> {
    let pairs = parse_query_string(init_data);

    let received_hash = pairs.get("hash").ok_or(AuthError::Malformed("missing hash".into()))?;

    let data_check_string = pairs
        .iter()
        .filter(|(k, _)| k.as_str() != "hash")
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("\n");

    let mut secret_mac = HmacSha256::new_from_slice(b"WebAppData").expect("hmac accepts any key length");
    secret_mac.update(bot_token.as_bytes());
    let secret_key = secret_mac.finalize().into_bytes();

    let mut mac = HmacSha256::new_from_slice(&secret_key).expect("hmac accepts any key length");
    mac.update(data_check_string.as_bytes());
    let calculated = hex_encode(&mac.finalize().into_bytes());

    if !constant_time_eq(&calculated, received_hash) {
        return Err(AuthError::BadHash);
    }

    let auth_date: i64 = pairs
        .get("auth_date")
        .ok_or(AuthError::Malformed("missing auth_date".into()))?
        .parse()
        .map_err(|_| AuthError::Malformed("auth_date is not an integer".into()))?;

    if Utc::now().timestamp() - auth_date > MAX_AGE_SECONDS {
        return Err(AuthError::Stale);
    }

    let user_raw = pairs.get("user").ok_or(AuthError::Malformed("missing user".into()))?;
    let user_json: serde_json::Value =
        serde_json::from_str(user_raw).map_err(|e| AuthError::Malformed(format!("invalid user JSON: {e}")))?;
    let telegram_user_id = user_json
        .get("id")
        .and_then(|v| v.as_i64())
        .ok_or(AuthError::Malformed("user.id missing or not an integer".into()))?;

    Ok(WebAppAuth { telegram_user_id, auth_date })
}

fn parse_query_string(s: &str) -> BTreeMap<String, String> {
    let mut pairs = BTreeMap::new();
    for part in s.split('&') {
        if part.is_empty() {
            continue;
        }
        let (key, value) = part.split_once('=').unwrap_or((part, ""));
        pairs.insert(urlencoding::decode(key).unwrap_or_default().into_owned(), urlencoding::decode(value).unwrap_or_default().into_owned());
    }
    pairs
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    a.len() == b.len() && a.as_bytes().ct_eq(b.as_bytes()).into()
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(s, "{b:02x}");
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(bot_token: &str, data_check_string: &str) -> String {
        let mut secret_mac = HmacSha256::new_from_slice(b"WebAppData").unwrap();
        secret_mac.update(bot_token.as_bytes());
        let secret_key = secret_mac.finalize().into_bytes();
        let mut mac = HmacSha256::new_from_slice(&secret_key).unwrap();
        mac.update(data_check_string.as_bytes());
        hex_encode(&mac.finalize().into_bytes())
    }

    #[test]
    fn validates_correctly_signed_init_data() {
        let bot_token = "123:ABC";
        let auth_date = Utc::now().timestamp();
        let user = r#"{"id":42,"first_name":"A"}"#;
        let data_check_string = format!("auth_date={auth_date}\nuser={user}");
        let hash = sign(bot_token, &data_check_string);
        let init_data = format!("auth_date={auth_date}&user={}&hash={hash}", urlencoding::encode(user));

        let result = validate_init_data(&init_data, bot_token).unwrap();
        assert_eq!(result.telegram_user_id, 42);
    }

    #[test]
    fn rejects_tampered_hash() {
        let init_data = "auth_date=1&user=%7B%22id%22%3A1%7D&hash=deadbeef";
        assert!(matches!(validate_init_data(init_data, "token"), Err(AuthError::BadHash)));
    }

    #[test]
    fn rejects_stale_auth_date() {
        let bot_token = "123:ABC";
        let auth_date = Utc::now().timestamp() - MAX_AGE_SECONDS - 60;
        let user = r#"{"id":7}"#;
        let data_check_string = format!("auth_date={auth_date}\nuser={user}");
        let hash = sign(bot_token, &data_check_string);
        let init_data = format!("auth_date={auth_date}&user={}&hash={hash}", urlencoding::encode(user));
        assert!(matches!(validate_init_data(&init_data, bot_token), Err(AuthError::Stale)));
    }
}
