use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::models::common::{now_ms, PlanId};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Success,
    Failed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Gateway {
    /// Sifalo hosted checkout (EVC / Zaad / Sahal mobile money).
    Checkout,
    /// Manual M-Pesa reference submission, confirmed by an admin.
    Mpesa,
    /// Manual PayPal transaction submission, confirmed by an admin.
    Paypal,
    /// External billing system pushing through /internal/activate.
    StripeWebhook,
}

impl Gateway {
    /// Manual gateways sit in `pending` until an admin approves them.
    pub fn is_manual(&self) -> bool {
        matches!(self, Gateway::Mpesa | Gateway::Paypal)
    }
}

impl std::fmt::Display for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Gateway::Checkout => write!(f, "checkout"),
            Gateway::Mpesa => write!(f, "mpesa"),
            Gateway::Paypal => write!(f, "paypal"),
            Gateway::StripeWebhook => write!(f, "stripe_webhook"),
        }
    }
}

/// One row per payment attempt per gateway. Immutable identity (`order_id`,
/// gateway reference); status moves `pending -> success | failed`, both
/// terminal. Entitlement linkage fields are written on the success path only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub order_id: String,
    pub device_id: String,
    pub user_id: Option<String>,
    pub plan: PlanId,
    pub amount: Decimal,
    pub base_amount: Option<Decimal>,
    pub currency: String,
    pub gateway: Gateway,
    pub status: PaymentStatus,

    pub sifalo_sid: Option<String>,
    pub sifalo_key: Option<String>,
    pub sifalo_token: Option<String>,
    pub mpesa_tx_id: Option<String>,
    pub paypal_tx_id: Option<String>,
    pub stripe_customer_id: Option<String>,
    pub payment_type: Option<String>,

    pub bonus_days: i64,
    pub offer_code: Option<String>,
    pub geo_country: Option<String>,
    pub geo_multiplier: Option<Decimal>,

    pub access_code: Option<String>,
    pub access_code_id: Option<String>,
    pub subscription_id: Option<String>,

    pub verify_attempts: i64,
    pub last_checked_at: i64,
    pub last_gateway_status: Option<String>,
    pub last_gateway_code: Option<String>,
    pub last_gateway_message: Option<String>,
    pub failure_reason: Option<String>,

    pub created_at: i64,
    pub completed_at: Option<i64>,
    pub failed_at: Option<i64>,
}

impl Payment {
    pub fn new_pending(
        order_id: String,
        device_id: String,
        plan: PlanId,
        amount: Decimal,
        gateway: Gateway,
    ) -> Self {
        Self {
            order_id,
            device_id,
            user_id: None,
            plan,
            amount,
            base_amount: None,
            currency: "USD".to_string(),
            gateway,
            status: PaymentStatus::Pending,
            sifalo_sid: None,
            sifalo_key: None,
            sifalo_token: None,
            mpesa_tx_id: None,
            paypal_tx_id: None,
            stripe_customer_id: None,
            payment_type: None,
            bonus_days: 0,
            offer_code: None,
            geo_country: None,
            geo_multiplier: None,
            access_code: None,
            access_code_id: None,
            subscription_id: None,
            verify_attempts: 0,
            last_checked_at: 0,
            last_gateway_status: None,
            last_gateway_code: None,
            last_gateway_message: None,
            failure_reason: None,
            created_at: now_ms(),
            completed_at: None,
            failed_at: None,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct CheckoutRequest {
    pub plan: String,
    #[validate(length(min = 6, max = 128))]
    pub device_id: String,
    pub offer_bonus_days: Option<i64>,
    pub offer_code: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ManualSubmitRequest {
    pub plan: String,
    #[validate(length(min = 6, max = 128))]
    pub device_id: String,
    /// M-Pesa confirmation code or PayPal transaction id, depending on route.
    #[validate(length(min = 1, max = 64))]
    pub tx_id: String,
    pub offer_bonus_days: Option<i64>,
    pub offer_code: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    pub order_id: Option<String>,
    pub sid: Option<String>,
    pub device_id: String,
}

#[derive(Debug, Deserialize)]
pub struct WebhookPayload {
    pub sid: Option<String>,
    pub order_id: Option<String>,
    pub status: Option<String>,
    pub payment_type: Option<String>,
    pub key: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub device_id: String,
    pub limit: Option<u32>,
}

/// Monthly checkouts may carry an exit-intent bonus, capped at a week.
pub fn clamp_bonus_days(plan: PlanId, requested: Option<i64>) -> i64 {
    if plan != PlanId::Monthly {
        return 0;
    }
    requested.unwrap_or(0).clamp(0, 7)
}

pub fn normalize_offer_code(bonus_days: i64, offer_code: Option<String>) -> Option<String> {
    if bonus_days <= 0 {
        return None;
    }
    Some(
        offer_code
            .filter(|code| !code.trim().is_empty())
            .unwrap_or_else(|| "MONTHLY_EXIT_7D".to_string()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bonus_days_only_for_monthly() {
        assert_eq!(clamp_bonus_days(PlanId::Monthly, Some(5)), 5);
        assert_eq!(clamp_bonus_days(PlanId::Monthly, Some(30)), 7);
        assert_eq!(clamp_bonus_days(PlanId::Monthly, Some(-3)), 0);
        assert_eq!(clamp_bonus_days(PlanId::Yearly, Some(5)), 0);
    }

    #[test]
    fn offer_code_defaults_when_bonus_present() {
        assert_eq!(
            normalize_offer_code(7, None),
            Some("MONTHLY_EXIT_7D".to_string())
        );
        assert_eq!(
            normalize_offer_code(7, Some("SUMMER".to_string())),
            Some("SUMMER".to_string())
        );
        assert_eq!(normalize_offer_code(0, Some("SUMMER".to_string())), None);
    }

    #[test]
    fn manual_gateways_flagged() {
        assert!(Gateway::Mpesa.is_manual());
        assert!(Gateway::Paypal.is_manual());
        assert!(!Gateway::Checkout.is_manual());
    }
}
