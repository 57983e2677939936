use actix_web::HttpRequest;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::models::common::now_ms;

type HmacSha256 = Hmac<Sha256>;

pub const ADMIN_COOKIE_NAME: &str = "fanbroj_admin_session";
pub const ADMIN_SESSION_MAX_AGE_MS: i64 = 7 * 24 * 60 * 60 * 1000;

/// Signed admin session value, format `"<millis>.<hex hmac>"`.
pub fn create_admin_session_value(secret: &str) -> String {
    let timestamp = now_ms().to_string();
    format!("{}.{}", timestamp, sign(secret, &timestamp))
}

fn sign(secret: &str, timestamp: &str) -> String {
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(timestamp.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Validates the signature (constant-time) and the 7-day session window.
pub fn verify_admin_session_value(secret: &str, value: &str) -> bool {
    let Some((timestamp, provided)) = value.split_once('.') else {
        return false;
    };
    let Ok(provided_bytes) = hex::decode(provided) else {
        return false;
    };

    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(timestamp.as_bytes());
    if mac.verify_slice(&provided_bytes).is_err() {
        return false;
    }

    let Ok(issued_at) = timestamp.parse::<i64>() else {
        return false;
    };
    let age = now_ms() - issued_at;
    age >= 0 && age < ADMIN_SESSION_MAX_AGE_MS
}

/// Gate every admin handler on this before touching anything else.
pub fn is_admin_authenticated(req: &HttpRequest, secret: &str) -> bool {
    if secret.is_empty() {
        return false;
    }
    req.cookie(ADMIN_COOKIE_NAME)
        .map(|cookie| verify_admin_session_value(secret, cookie.value()))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_session_round_trips() {
        let value = create_admin_session_value("test-secret");
        assert!(verify_admin_session_value("test-secret", &value));
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let value = create_admin_session_value("test-secret");
        assert!(!verify_admin_session_value("other-secret", &value));
    }

    #[test]
    fn tampered_timestamp_is_rejected() {
        let value = create_admin_session_value("test-secret");
        let (_, hmac) = value.split_once('.').unwrap();
        let forged = format!("{}.{}", now_ms() + 60_000, hmac);
        assert!(!verify_admin_session_value("test-secret", &forged));
    }

    #[test]
    fn stale_session_is_rejected() {
        let old_timestamp = (now_ms() - ADMIN_SESSION_MAX_AGE_MS - 1).to_string();
        let value = format!("{}.{}", old_timestamp, sign("test-secret", &old_timestamp));
        assert!(!verify_admin_session_value("test-secret", &value));
    }

    #[test]
    fn garbage_values_are_rejected() {
        assert!(!verify_admin_session_value("test-secret", "authenticated"));
        assert!(!verify_admin_session_value("test-secret", "123."));
        assert!(!verify_admin_session_value("test-secret", ".abcdef"));
    }
}
