use anyhow::{anyhow, Result};
use reqwest::Client;
use rust_decimal::{Decimal, RoundingStrategy};
use serde_json::{json, Value};
use std::time::Duration;

use crate::config::SifaloConfig;

/// Sifalo Pay processing fee for mobile-money checkouts, charged on top so
/// the merchant nets the listed price.
const FEE_PERCENT: Decimal = Decimal::from_parts(1, 0, 0, false, 2); // 0.01

const SUCCESS_STATUSES: &[&str] = &[
    "success",
    "successful",
    "completed",
    "complete",
    "paid",
    "approved",
];
const PENDING_STATUSES: &[&str] = &["pending", "processing", "in_progress", "awaiting", "waiting"];

/// Hosted-checkout client for the Sifalo Pay gateway (EVC / Zaad / Sahal).
#[derive(Clone)]
pub struct SifaloPayService {
    client: Client,
    config: SifaloConfig,
}

#[derive(Debug, Clone)]
pub struct SifaloCheckout {
    pub key: String,
    pub token: String,
    pub checkout_url: String,
}

impl SifaloPayService {
    pub fn new(config: SifaloConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { client, config }
    }

    pub fn is_configured(&self) -> bool {
        self.config.is_configured()
    }

    /// Create a hosted checkout session. Returns the redirect URL the client
    /// should be sent to.
    pub async fn create_checkout(
        &self,
        amount: Decimal,
        order_id: &str,
        return_url: &str,
        callback_url: &str,
    ) -> Result<SifaloCheckout> {
        let response = self
            .client
            .post(format!("{}/", self.config.api_url))
            .basic_auth(&self.config.username, Some(&self.config.password))
            .json(&json!({
                "amount": amount.to_string(),
                "gateway": "checkout",
                "currency": "USD",
                "return_url": return_url,
                "callback_url": callback_url,
                "order_id": order_id,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("Sifalo checkout error {}: {}", status, body));
        }

        let payload: Value = response.json().await?;
        let key = payload
            .get("key")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("Sifalo response missing 'key'"))?
            .to_string();
        let token = payload
            .get("token")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("Sifalo response missing 'token'"))?
            .to_string();

        let checkout_url = format!("https://pay.sifalo.com/checkout/?key={}&token={}", key, token);
        Ok(SifaloCheckout {
            key,
            token,
            checkout_url,
        })
    }

    /// Ask the gateway for the current state of a transaction.
    pub async fn verify(&self, sid: &str) -> Result<Value> {
        let response = self
            .client
            .post(format!("{}/verify.php", self.config.api_url))
            .basic_auth(&self.config.username, Some(&self.config.password))
            .json(&json!({ "sid": sid }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("Sifalo verify error {}: {}", status, body));
        }

        Ok(response.json().await?)
    }
}

/// Checkout fee rounded up to the cent, plus the resulting total.
pub fn checkout_total_with_fee(base: Decimal) -> (Decimal, Decimal) {
    let fee = (base * FEE_PERCENT).round_dp_with_strategy(2, RoundingStrategy::ToPositiveInfinity);
    let total = (base + fee).round_dp(2);
    (fee, total)
}

fn normalize_text(value: Option<&Value>) -> Option<String> {
    let text = value?.as_str()?.trim().to_lowercase();
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

/// The gateway spells its status field several ways depending on the payment
/// type; collect every candidate before classifying.
pub fn extract_status_candidates(payload: &Value) -> Vec<String> {
    let data = payload.get("data");
    let result = payload.get("result");

    [
        payload.get("status"),
        payload.get("payment_status"),
        payload.get("paymentStatus"),
        payload.get("state"),
        data.and_then(|d| d.get("status")),
        data.and_then(|d| d.get("payment_status")),
        result.and_then(|r| r.get("status")),
    ]
    .into_iter()
    .filter_map(|candidate| normalize_text(candidate))
    .collect()
}

pub fn is_successful_verification(payload: &Value) -> bool {
    let statuses = extract_status_candidates(payload);
    if statuses.iter().any(|s| SUCCESS_STATUSES.contains(&s.as_str())) {
        return true;
    }

    // Numeric result code 601 is the gateway's "paid" code.
    let code = payload
        .get("code")
        .or_else(|| payload.get("data").and_then(|d| d.get("code")))
        .or_else(|| payload.get("resultCode"));
    match code {
        Some(Value::Number(n)) => n.as_i64() == Some(601),
        Some(Value::String(s)) => s.trim() == "601",
        _ => false,
    }
}

pub fn is_pending_verification(payload: &Value) -> bool {
    extract_status_candidates(payload)
        .iter()
        .any(|s| PENDING_STATUSES.contains(&s.as_str()))
}

pub fn gateway_message(payload: &Value) -> Option<String> {
    payload
        .get("message")
        .and_then(Value::as_str)
        .or_else(|| {
            payload
                .get("data")
                .and_then(|d| d.get("message"))
                .and_then(Value::as_str)
        })
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub fn gateway_payment_type(payload: &Value) -> Option<String> {
    payload
        .get("payment_type")
        .and_then(Value::as_str)
        .or_else(|| {
            payload
                .get("data")
                .and_then(|d| d.get("payment_type"))
                .and_then(Value::as_str)
        })
        .map(|s| s.to_string())
}

pub fn gateway_code(payload: &Value) -> Option<String> {
    let code = payload
        .get("code")
        .or_else(|| payload.get("data").and_then(|d| d.get("code")))?;
    match code {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => Some(s.clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_by_status_word() {
        let payload = json!({ "status": "Completed" });
        assert!(is_successful_verification(&payload));
        assert!(!is_pending_verification(&payload));
    }

    #[test]
    fn success_by_nested_code() {
        let payload = json!({ "data": { "status": "unknown", "code": 601 } });
        assert!(is_successful_verification(&payload));

        let string_code = json!({ "code": "601" });
        assert!(is_successful_verification(&string_code));
    }

    #[test]
    fn pending_states_are_not_success() {
        let payload = json!({ "data": { "payment_status": "processing" } });
        assert!(is_pending_verification(&payload));
        assert!(!is_successful_verification(&payload));
    }

    #[test]
    fn declined_is_neither() {
        let payload = json!({ "status": "declined", "message": "Insufficient funds" });
        assert!(!is_successful_verification(&payload));
        assert!(!is_pending_verification(&payload));
        assert_eq!(gateway_message(&payload).as_deref(), Some("Insufficient funds"));
    }

    #[test]
    fn fee_rounds_up_to_the_cent() {
        // 1% of $3.20 = $0.032 -> $0.04 fee -> $3.24 total.
        let (fee, total) = checkout_total_with_fee(Decimal::new(320, 2));
        assert_eq!(fee, Decimal::new(4, 2));
        assert_eq!(total, Decimal::new(324, 2));

        let (fee, total) = checkout_total_with_fee(Decimal::new(100, 2));
        assert_eq!(fee, Decimal::new(1, 2));
        assert_eq!(total, Decimal::new(101, 2));
    }
}
