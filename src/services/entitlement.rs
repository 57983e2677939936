use rand::Rng;
use serde_json::{json, Value};

use crate::errors::{DbError, DbResult};
use crate::models::{
    common::{now_ms, PlanId},
    redemption::{Redemption, RedemptionSource},
    subscription::Subscription,
};
use crate::services::database::DatabaseService;

/// Code alphabet drops the lookalikes (I, O, 0, 1) so support can read codes
/// over the phone.
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const CODE_LENGTH: usize = 8;
const MAX_CODE_ATTEMPTS: usize = 32;

fn generate_candidate_code() -> String {
    let mut rng = rand::thread_rng();
    (0..CODE_LENGTH)
        .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

fn to_base36(mut value: i64) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value <= 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

/// Deterministic fallback after repeated collisions. Never observed outside
/// tests, but it keeps the mint path total.
fn fallback_code(at_ms: i64) -> String {
    let base36 = to_base36(at_ms).to_uppercase();
    let tail: String = base36
        .chars()
        .rev()
        .take(6)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("FBJ{}", tail)
}

pub async fn generate_unique_redemption_code(db: &DatabaseService) -> DbResult<String> {
    for _ in 0..MAX_CODE_ATTEMPTS {
        let code = generate_candidate_code();
        if !db.redemption_code_exists(&code).await? {
            return Ok(code);
        }
    }
    Ok(fallback_code(now_ms()))
}

#[derive(Debug, Clone)]
pub struct AutoRedemptionInput {
    pub payment_order_id: String,
    pub user_id: String,
    pub plan: PlanId,
    pub duration_days: i64,
    pub max_devices: u32,
}

#[derive(Debug, Clone)]
pub struct AutoRedemption {
    pub code: String,
    pub redemption_id: String,
}

/// Idempotent entitlement mint. The first call for an order id creates the
/// redemption row; every later call returns the stored code unchanged, only
/// backfilling `used_by_user_id` / `used_at` / `source` when unset. The
/// record key is derived from the order id, so two concurrent first calls
/// cannot both insert — the loser re-reads the winner's row.
pub async fn get_or_create_auto_payment_redemption(
    db: &DatabaseService,
    input: &AutoRedemptionInput,
) -> DbResult<AutoRedemption> {
    if let Some(existing) = db
        .get_redemption_by_payment_order(&input.payment_order_id)
        .await?
    {
        return backfill_existing(db, existing, input).await;
    }

    let code = generate_unique_redemption_code(db).await?;
    let redemption = Redemption::new_auto(
        code,
        input.plan,
        input.duration_days,
        input.max_devices,
        input.payment_order_id.clone(),
        input.user_id.clone(),
    );

    match db
        .create_auto_redemption(&input.payment_order_id, &redemption)
        .await
    {
        Ok(created) => Ok(AutoRedemption {
            code: created.code,
            redemption_id: created.redemption_id,
        }),
        Err(DbError::Conflict(_)) => {
            // Lost the race against a concurrent duplicate delivery.
            let existing = db
                .get_redemption_by_payment_order(&input.payment_order_id)
                .await?
                .ok_or_else(|| {
                    DbError::Other(anyhow::anyhow!(
                        "redemption for {} vanished after conflict",
                        input.payment_order_id
                    ))
                })?;
            backfill_existing(db, existing, input).await
        }
        Err(err) => Err(err),
    }
}

async fn backfill_existing(
    db: &DatabaseService,
    existing: Redemption,
    input: &AutoRedemptionInput,
) -> DbResult<AutoRedemption> {
    let mut patch = serde_json::Map::new();
    if existing.used_by_user_id.is_none() {
        patch.insert("used_by_user_id".to_string(), json!(input.user_id.clone()));
    }
    if existing.used_at.is_none() {
        patch.insert("used_at".to_string(), json!(now_ms()));
    }
    if existing.source.is_none() {
        patch.insert("source".to_string(), json!(RedemptionSource::AutoPayment));
    }
    if !patch.is_empty() {
        db.merge_redemption(&existing.redemption_id, Value::Object(patch))
            .await?;
    }

    Ok(AutoRedemption {
        code: existing.code,
        redemption_id: existing.redemption_id,
    })
}

#[derive(Debug, Clone)]
pub struct ActivationInput {
    pub order_id: String,
    pub user_id: String,
    pub plan: PlanId,
    pub bonus_days: i64,
    pub stripe_customer_id: Option<String>,
    /// Gateway-specific fields folded into the ledger row alongside the
    /// standard success linkage (sid, payment type, ...).
    pub payment_patch: Value,
}

#[derive(Debug, Clone)]
pub struct Activation {
    pub code: String,
    pub redemption_id: String,
    pub subscription: Subscription,
    pub duration_days: i64,
}

/// The single success path every gateway converges on: mint the redemption,
/// create the active subscription (expiring priors), link the ledger row.
pub async fn activate_entitlement(
    db: &DatabaseService,
    input: ActivationInput,
) -> DbResult<Activation> {
    let duration_days = input.plan.duration_days() + input.bonus_days.max(0);
    let max_devices = input.plan.max_devices();

    let access = get_or_create_auto_payment_redemption(
        db,
        &AutoRedemptionInput {
            payment_order_id: input.order_id.clone(),
            user_id: input.user_id.clone(),
            plan: input.plan,
            duration_days,
            max_devices,
        },
    )
    .await?;

    let mut subscription = Subscription::new_active(
        input.user_id.clone(),
        input.plan,
        duration_days,
        max_devices,
        Some(access.redemption_id.clone()),
    );
    subscription.stripe_customer_id = input.stripe_customer_id.clone();
    let subscription = db.create_active_subscription(&subscription).await?;

    let mut patch = json!({
        "status": "success",
        "user_id": input.user_id.clone(),
        "subscription_id": subscription.subscription_id.clone(),
        "access_code": access.code.clone(),
        "access_code_id": access.redemption_id.clone(),
        "completed_at": now_ms(),
        "failure_reason": null,
    });
    if let (Value::Object(target), Value::Object(extra)) = (&mut patch, &input.payment_patch) {
        for (key, value) in extra {
            target.insert(key.clone(), value.clone());
        }
    }
    db.merge_payment(&input.order_id, patch).await?;

    Ok(Activation {
        code: access.code,
        redemption_id: access.redemption_id,
        subscription,
        duration_days,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::common::DAY_MS;
    use crate::models::payment::{Gateway, Payment, PaymentStatus};
    use crate::models::user::new_record_id;
    use rust_decimal::Decimal;

    async fn test_db() -> DatabaseService {
        DatabaseService::new("memory://").await.unwrap()
    }

    fn mint_input(order_id: &str, user_id: &str) -> AutoRedemptionInput {
        AutoRedemptionInput {
            payment_order_id: order_id.to_string(),
            user_id: user_id.to_string(),
            plan: PlanId::Monthly,
            duration_days: 30,
            max_devices: 3,
        }
    }

    #[test]
    fn candidate_codes_use_the_safe_alphabet() {
        for _ in 0..50 {
            let code = generate_candidate_code();
            assert_eq!(code.len(), CODE_LENGTH);
            assert!(code
                .bytes()
                .all(|byte| CODE_ALPHABET.contains(&byte)));
        }
    }

    #[test]
    fn fallback_code_is_deterministic() {
        let code = fallback_code(1_700_000_000_000);
        assert!(code.starts_with("FBJ"));
        assert_eq!(code, fallback_code(1_700_000_000_000));
        assert_eq!(code.len(), 9);
    }

    #[test]
    fn base36_encoding() {
        assert_eq!(to_base36(0), "0");
        assert_eq!(to_base36(35), "z");
        assert_eq!(to_base36(36), "10");
    }

    #[tokio::test]
    async fn minting_twice_returns_the_same_code() {
        let db = test_db().await;
        let user = new_record_id();

        let first = get_or_create_auto_payment_redemption(&db, &mint_input("FBJ-M-1", &user))
            .await
            .unwrap();
        let second = get_or_create_auto_payment_redemption(&db, &mint_input("FBJ-M-1", &user))
            .await
            .unwrap();

        assert_eq!(first.code, second.code);
        assert_eq!(first.redemption_id, second.redemption_id);
    }

    #[tokio::test]
    async fn second_caller_with_other_user_does_not_steal_the_code() {
        let db = test_db().await;
        let owner = new_record_id();
        let other = new_record_id();

        let first = get_or_create_auto_payment_redemption(&db, &mint_input("FBJ-M-2", &owner))
            .await
            .unwrap();
        let second = get_or_create_auto_payment_redemption(&db, &mint_input("FBJ-M-2", &other))
            .await
            .unwrap();
        assert_eq!(first.redemption_id, second.redemption_id);

        // used_by_user_id was already set by the first mint; it stays.
        let stored = db
            .get_redemption_by_payment_order("FBJ-M-2")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.used_by_user_id, Some(owner));
    }

    #[tokio::test]
    async fn activation_links_ledger_and_keeps_one_active_row() {
        let db = test_db().await;
        let user = new_record_id();

        let payment = Payment::new_pending(
            "FBJ-MONTHLY-7-Q".to_string(),
            "device-7".to_string(),
            PlanId::Monthly,
            Decimal::new(320, 2),
            Gateway::Checkout,
        );
        db.create_payment(&payment).await.unwrap();

        let activation = activate_entitlement(
            &db,
            ActivationInput {
                order_id: "FBJ-MONTHLY-7-Q".to_string(),
                user_id: user.clone(),
                plan: PlanId::Monthly,
                bonus_days: 7,
                stripe_customer_id: None,
                payment_patch: json!({ "sifalo_sid": "SID-1", "payment_type": "evc" }),
            },
        )
        .await
        .unwrap();

        assert_eq!(activation.duration_days, 37);
        assert_eq!(
            activation.subscription.expires_at - activation.subscription.created_at,
            37 * DAY_MS
        );

        let stored = db.get_payment("FBJ-MONTHLY-7-Q").await.unwrap().unwrap();
        assert_eq!(stored.status, PaymentStatus::Success);
        assert_eq!(stored.access_code.as_deref(), Some(activation.code.as_str()));
        assert_eq!(stored.sifalo_sid.as_deref(), Some("SID-1"));
        assert_eq!(
            stored.subscription_id.as_deref(),
            Some(activation.subscription.subscription_id.as_str())
        );

        assert_eq!(db.count_active_unexpired(&user, now_ms()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn repeated_activation_is_idempotent_on_the_code() {
        let db = test_db().await;
        let user = new_record_id();
        let payment = Payment::new_pending(
            "FBJ-WEEKLY-3-R".to_string(),
            "device-3".to_string(),
            PlanId::Weekly,
            Decimal::new(100, 2),
            Gateway::Checkout,
        );
        db.create_payment(&payment).await.unwrap();

        let make_input = || ActivationInput {
            order_id: "FBJ-WEEKLY-3-R".to_string(),
            user_id: user.clone(),
            plan: PlanId::Weekly,
            bonus_days: 0,
            stripe_customer_id: None,
            payment_patch: json!({}),
        };

        let first = activate_entitlement(&db, make_input()).await.unwrap();
        let second = activate_entitlement(&db, make_input()).await.unwrap();

        assert_eq!(first.code, second.code);
        assert_eq!(db.count_active_unexpired(&user, now_ms()).await.unwrap(), 1);
    }
}
