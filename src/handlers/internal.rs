use actix_web::web::{Data, Json};
use actix_web::{post, HttpRequest, HttpResponse, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;

use crate::config::Config;
use crate::handlers::db_error_response;
use crate::models::common::{now_ms, PlanId};
use crate::models::payment::{Gateway, Payment};
use crate::services::database::DatabaseService;
use crate::services::entitlement::{activate_entitlement, ActivationInput};

pub const INTERNAL_KEY_HEADER: &str = "x-internal-key";

#[derive(Debug, Deserialize)]
pub struct InternalActivateRequest {
    pub customer_id: Option<String>,
    pub device_id: Option<String>,
    pub event: Option<String>,
    pub plan: Option<String>,
}

fn internal_key_matches(req: &HttpRequest, secret: &str) -> bool {
    if secret.is_empty() {
        return false;
    }
    req.headers()
        .get(INTERNAL_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(|value| value == secret)
        .unwrap_or(false)
}

// POST /activate — external billing system pushes subscription events here.
#[post("/activate")]
pub async fn activate(
    req: HttpRequest,
    db: Data<DatabaseService>,
    config: Data<Config>,
    payload: Json<InternalActivateRequest>,
) -> Result<HttpResponse> {
    if !internal_key_matches(&req, &config.internal_secret) {
        return Ok(HttpResponse::Unauthorized().json(json!({ "error": "Unauthorized" })));
    }

    // Cancellation event: revoke every active row for the customer.
    if payload.event.as_deref() == Some("customer.subscription.deleted") {
        let Some(customer_id) = payload.customer_id.as_deref().filter(|id| !id.is_empty())
        else {
            return Ok(
                HttpResponse::BadRequest().json(json!({ "error": "customer_id required" }))
            );
        };
        return match db.revoke_active_for_stripe_customer(customer_id).await {
            Ok(revoked) => {
                log::info!(
                    "internal/activate: revoked {} subscription(s) for customer {}",
                    revoked,
                    customer_id
                );
                Ok(HttpResponse::Ok().json(json!({ "ok": true, "revoked": revoked })))
            }
            Err(err) => Ok(db_error_response(err)),
        };
    }

    let Some(plan) = payload.plan.as_deref().and_then(PlanId::parse) else {
        return Ok(
            HttpResponse::BadRequest().json(json!({ "error": "plan and device_id required" }))
        );
    };
    let Some(device_id) = payload.device_id.as_deref().filter(|id| !id.is_empty()) else {
        return Ok(
            HttpResponse::BadRequest().json(json!({ "error": "plan and device_id required" }))
        );
    };

    let device = match db.get_device(device_id).await {
        Ok(Some(device)) => device,
        Ok(None) => {
            return Ok(HttpResponse::NotFound().json(json!({ "error": "Device not found" })))
        }
        Err(err) => return Ok(db_error_response(err)),
    };

    let customer_tag = payload
        .customer_id
        .clone()
        .unwrap_or_else(|| "unknown".to_string());
    let order_id = format!("STRIPE-WEBHOOK-{}-{}", customer_tag, now_ms());

    // Ledger row first, then the shared activation path links it.
    let mut payment = Payment::new_pending(
        order_id.clone(),
        device_id.to_string(),
        plan,
        Decimal::ZERO,
        Gateway::StripeWebhook,
    );
    payment.user_id = Some(device.user_id.clone());
    payment.stripe_customer_id = payload.customer_id.clone();
    if let Err(err) = db.create_payment(&payment).await {
        return Ok(db_error_response(err));
    }

    let activation = match activate_entitlement(
        &db,
        ActivationInput {
            order_id: order_id.clone(),
            user_id: device.user_id.clone(),
            plan,
            bonus_days: 0,
            stripe_customer_id: payload.customer_id.clone(),
            payment_patch: json!({ "payment_type": "stripe_subscription" }),
        },
    )
    .await
    {
        Ok(activation) => activation,
        Err(err) => return Ok(db_error_response(err)),
    };

    log::info!(
        "internal/activate: activated {} for device {} (event: {:?})",
        plan,
        device_id,
        payload.event
    );
    Ok(HttpResponse::Ok().json(json!({ "ok": true, "code": activation.code })))
}
