use serde::{Deserialize, Serialize};

use crate::models::common::{now_ms, PlanId, DAY_MS};
use crate::models::user::new_record_id;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    Active,
    Expired,
    Revoked,
}

/// Prepaid access window. Superseded rows are expired, never deleted; the
/// application keeps at most one active unexpired row per user by expiring
/// priors in the same call that creates a new one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub subscription_id: String,
    pub user_id: String,
    pub plan: PlanId,
    pub duration_days: i64,
    pub max_devices: u32,
    pub status: SubscriptionStatus,
    pub expires_at: i64,
    pub activated_at: Option<i64>,
    pub cancelled_at: Option<i64>,
    pub code_id: Option<String>,
    pub stripe_customer_id: Option<String>,
    pub created_at: i64,
}

impl Subscription {
    pub fn new_active(
        user_id: String,
        plan: PlanId,
        duration_days: i64,
        max_devices: u32,
        code_id: Option<String>,
    ) -> Self {
        let now = now_ms();
        Self {
            subscription_id: new_record_id(),
            user_id,
            plan,
            duration_days,
            max_devices,
            status: SubscriptionStatus::Active,
            expires_at: now + duration_days * DAY_MS,
            activated_at: Some(now),
            cancelled_at: None,
            code_id,
            stripe_customer_id: None,
            created_at: now,
        }
    }

    pub fn is_active_at(&self, at_ms: i64) -> bool {
        self.status == SubscriptionStatus::Active && self.expires_at > at_ms
    }

    pub fn days_remaining(&self, at_ms: i64) -> i64 {
        ((self.expires_at - at_ms).max(0)) / DAY_MS
    }
}

#[derive(Debug, Deserialize)]
pub struct SubscriptionStatusQuery {
    pub device_id: String,
}

#[derive(Debug, Serialize)]
pub struct SubscriptionView {
    pub subscription_id: String,
    pub plan: PlanId,
    pub status: SubscriptionStatus,
    pub expires_at: i64,
    pub max_devices: u32,
    pub days_remaining: i64,
}

impl SubscriptionView {
    pub fn from_subscription(sub: &Subscription, at_ms: i64) -> Self {
        Self {
            subscription_id: sub.subscription_id.clone(),
            plan: sub.plan,
            status: sub.status,
            expires_at: sub.expires_at,
            max_devices: sub.max_devices,
            days_remaining: sub.days_remaining(at_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_active_window() {
        let sub = Subscription::new_active(new_record_id(), PlanId::Monthly, 30, 3, None);
        assert_eq!(sub.status, SubscriptionStatus::Active);
        assert!(sub.is_active_at(now_ms()));
        assert_eq!(sub.expires_at - sub.created_at, 30 * DAY_MS);
    }

    #[test]
    fn expired_window_is_not_active() {
        let mut sub = Subscription::new_active(new_record_id(), PlanId::Weekly, 7, 2, None);
        sub.expires_at = now_ms() - 1;
        assert!(!sub.is_active_at(now_ms()));
        assert_eq!(sub.days_remaining(now_ms()), 0);
    }

    #[test]
    fn revoked_is_terminal_regardless_of_expiry() {
        let mut sub = Subscription::new_active(new_record_id(), PlanId::Yearly, 365, 5, None);
        sub.status = SubscriptionStatus::Revoked;
        assert!(!sub.is_active_at(now_ms()));
    }
}
