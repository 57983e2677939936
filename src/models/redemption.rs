use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::models::common::{now_ms, PlanId};
use crate::models::user::new_record_id;

/// Where a code came from. Auto-minted codes are the entitlement artifact of
/// a confirmed payment; admin codes are handed out manually.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RedemptionSource {
    AutoPayment,
    Admin,
}

/// Code-backed grant record. Unique on `code`; auto-minted rows are also
/// unique on `payment_order_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Redemption {
    pub redemption_id: String,
    pub code: String,
    pub plan: PlanId,
    pub duration_days: i64,
    pub max_devices: u32,
    pub source: Option<RedemptionSource>,
    pub payment_order_id: Option<String>,
    pub expires_at: Option<i64>,
    pub used_by_user_id: Option<String>,
    pub used_at: Option<i64>,
    pub revoked_at: Option<i64>,
    pub created_at: i64,
}

impl Redemption {
    pub fn new_auto(
        code: String,
        plan: PlanId,
        duration_days: i64,
        max_devices: u32,
        payment_order_id: String,
        used_by_user_id: String,
    ) -> Self {
        let now = now_ms();
        Self {
            redemption_id: new_record_id(),
            code,
            plan,
            duration_days,
            max_devices,
            source: Some(RedemptionSource::AutoPayment),
            payment_order_id: Some(payment_order_id),
            expires_at: None,
            used_by_user_id: Some(used_by_user_id),
            used_at: Some(now),
            revoked_at: None,
            created_at: now,
        }
    }

    pub fn new_admin(
        code: String,
        plan: PlanId,
        duration_days: i64,
        max_devices: u32,
        expires_at: Option<i64>,
    ) -> Self {
        Self {
            redemption_id: new_record_id(),
            code,
            plan,
            duration_days,
            max_devices,
            source: Some(RedemptionSource::Admin),
            payment_order_id: None,
            expires_at,
            used_by_user_id: None,
            used_at: None,
            revoked_at: None,
            created_at: now_ms(),
        }
    }

    pub fn is_used(&self) -> bool {
        self.used_by_user_id.is_some()
    }

    pub fn is_expired_at(&self, at_ms: i64) -> bool {
        self.expires_at.map_or(false, |expires| expires < at_ms)
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct RedeemRequest {
    #[validate(length(min = 4, max = 32))]
    pub code: String,
    #[validate(length(min = 6, max = 128))]
    pub device_id: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateRedemptionsRequest {
    pub plan: String,
    #[validate(range(min = 1, max = 100))]
    pub count: u32,
    pub duration_days: Option<i64>,
    pub max_devices: Option<u32>,
    pub expires_at: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_redemption_is_born_used() {
        let redemption = Redemption::new_auto(
            "ABCD2345".to_string(),
            PlanId::Monthly,
            30,
            3,
            "FBJ-MONTHLY-1-X".to_string(),
            new_record_id(),
        );
        assert!(redemption.is_used());
        assert_eq!(redemption.source, Some(RedemptionSource::AutoPayment));
        assert!(!redemption.is_expired_at(now_ms()));
    }

    #[test]
    fn admin_redemption_starts_unused() {
        let redemption =
            Redemption::new_admin("WXYZ2345".to_string(), PlanId::Weekly, 7, 2, None);
        assert!(!redemption.is_used());
        assert!(redemption.payment_order_id.is_none());
    }

    #[test]
    fn expiry_check_uses_wall_clock() {
        let mut redemption =
            Redemption::new_admin("QRST2345".to_string(), PlanId::Weekly, 7, 2, None);
        redemption.expires_at = Some(now_ms() - 1);
        assert!(redemption.is_expired_at(now_ms()));
    }
}
