use actix_web::web::{Data, Json, Query};
use actix_web::{get, post, HttpRequest, HttpResponse, Result};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde_json::json;
use std::time::Duration;

use crate::config::Config;
use crate::handlers::{db_error_response, validation_error_response};
use crate::models::common::{now_ms, PlanId};
use crate::models::engagement::ConversionEvent;
use crate::models::payment::{
    clamp_bonus_days, normalize_offer_code, CheckoutRequest, Gateway, HistoryQuery,
    ManualSubmitRequest, Payment, PaymentStatus, VerifyRequest, WebhookPayload,
};
use crate::services::database::DatabaseService;
use crate::services::entitlement::{
    activate_entitlement, get_or_create_auto_payment_redemption, ActivationInput,
    AutoRedemptionInput,
};
use crate::services::geo::GeoService;
use crate::services::rate_limit::{client_ip, RateLimiter};
use crate::services::sifalo::{
    self, checkout_total_with_fee, SifaloPayService,
};
use validator::Validate;

const MANUAL_SUBMIT_MAX: u32 = 5;
const MANUAL_SUBMIT_WINDOW: Duration = Duration::from_secs(60 * 60);

fn order_nonce() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(char::from)
        .collect::<String>()
        .to_uppercase()
}

fn new_order_id(gateway_tag: Option<&str>, plan: PlanId) -> String {
    let plan_tag = plan.to_string().to_uppercase();
    match gateway_tag {
        Some(tag) => format!("FBJ-{}-{}-{}-{}", tag, plan_tag, now_ms(), order_nonce()),
        None => format!("FBJ-{}-{}-{}", plan_tag, now_ms(), order_nonce()),
    }
}

// POST /checkout — hosted mobile-money checkout via Sifalo
#[post("/checkout")]
pub async fn checkout(
    db: Data<DatabaseService>,
    sifalo_service: Data<SifaloPayService>,
    config: Data<Config>,
    payload: Json<CheckoutRequest>,
) -> Result<HttpResponse> {
    if let Err(errors) = payload.validate() {
        return Ok(validation_error_response(errors));
    }
    let Some(plan) = PlanId::parse(&payload.plan) else {
        return Ok(HttpResponse::BadRequest().json(json!({ "error": "Invalid plan" })));
    };

    let base_amount = plan.base_price(&config.plans);
    if base_amount <= rust_decimal::Decimal::ZERO {
        return Ok(HttpResponse::BadRequest()
            .json(json!({ "error": "Price not configured for this plan" })));
    }

    if !sifalo_service.is_configured() {
        log::error!("Sifalo Pay credentials not configured");
        return Ok(HttpResponse::InternalServerError()
            .json(json!({ "error": "Payment system not configured" })));
    }

    let bonus_days = clamp_bonus_days(plan, payload.offer_bonus_days);
    let offer_code = normalize_offer_code(bonus_days, payload.offer_code.clone());

    // 1% gateway fee is charged on top so the merchant nets the list price.
    let (_fee, total_amount) = checkout_total_with_fee(base_amount);

    let order_id = new_order_id(None, plan);
    let return_url = format!("{}/pay?order_id={}", config.site_url, order_id);
    let webhook_url = format!("{}/api/v1/pay/webhook", config.site_url);

    let checkout_session = match sifalo_service
        .create_checkout(total_amount, &order_id, &return_url, &webhook_url)
        .await
    {
        Ok(session) => session,
        Err(err) => {
            log::error!("Sifalo checkout failed: {:#}", err);
            return Ok(
                HttpResponse::BadGateway().json(json!({ "error": "Payment gateway error" }))
            );
        }
    };

    let mut payment = Payment::new_pending(
        order_id.clone(),
        payload.device_id.clone(),
        plan,
        base_amount,
        Gateway::Checkout,
    );
    payment.base_amount = Some(base_amount);
    payment.sifalo_key = Some(checkout_session.key.clone());
    payment.sifalo_token = Some(checkout_session.token.clone());
    payment.bonus_days = bonus_days;
    payment.offer_code = offer_code.clone();

    if let Err(err) = db.create_payment(&payment).await {
        return Ok(db_error_response(err));
    }

    let mut event = ConversionEvent::new("purchase_started", "pricing", "checkout_api");
    event.device_id = Some(payload.device_id.clone());
    event.plan = Some(plan.to_string());
    event.order_id = Some(order_id.clone());
    event.metadata = Some(json!({
        "base_amount": base_amount,
        "total_amount": total_amount,
        "bonus_days": bonus_days,
        "offer_code": offer_code,
    }));
    if let Err(err) = db.record_event(&event).await {
        log::warn!("checkout conversion event write failed: {}", err);
    }

    Ok(HttpResponse::Ok().json(json!({
        "checkout_url": checkout_session.checkout_url,
        "order_id": order_id,
    })))
}

async fn submit_manual_payment(
    req: &HttpRequest,
    db: &DatabaseService,
    geo: &GeoService,
    limiter: &dyn RateLimiter,
    config: &Config,
    payload: &ManualSubmitRequest,
    gateway: Gateway,
) -> Result<HttpResponse> {
    if let Err(errors) = payload.validate() {
        return Ok(validation_error_response(errors));
    }

    let ip = client_ip(req);
    let decision = limiter.check(
        &format!("manual-submit:{}", ip),
        MANUAL_SUBMIT_MAX,
        MANUAL_SUBMIT_WINDOW,
    );
    if !decision.allowed {
        return Ok(HttpResponse::TooManyRequests()
            .json(json!({ "error": "Too many submissions, try again later" })));
    }

    let Some(plan) = PlanId::parse(&payload.plan) else {
        return Ok(HttpResponse::BadRequest().json(json!({ "error": "Invalid plan" })));
    };

    let tx_id = payload.tx_id.trim().to_uppercase();
    if tx_id.len() < 6 {
        let label = match gateway {
            Gateway::Mpesa => "Invalid M-Pesa Transaction Code",
            _ => "Invalid transaction id",
        };
        return Ok(HttpResponse::BadRequest().json(json!({ "error": label })));
    }

    // Replayed references must not double-credit.
    let duplicate = match gateway {
        Gateway::Mpesa => db.find_payment_by_mpesa_tx(&tx_id).await,
        Gateway::Paypal => db.find_payment_by_paypal_tx(&tx_id).await,
        _ => Ok(None),
    };
    match duplicate {
        Ok(Some(_)) => {
            let message = match gateway {
                Gateway::Mpesa => "This M-Pesa transaction code has already been submitted.",
                _ => "This transaction id has already been submitted.",
            };
            return Ok(HttpResponse::BadRequest().json(json!({ "error": message })));
        }
        Ok(None) => {}
        Err(err) => return Ok(db_error_response(err)),
    }

    let base_amount = plan.base_price(&config.plans);
    let bonus_days = clamp_bonus_days(plan, payload.offer_bonus_days);
    let offer_code = normalize_offer_code(bonus_days, payload.offer_code.clone());

    let request_geo = geo.request_geo(req).await;
    let final_amount = (base_amount * request_geo.multiplier).round_dp(2);

    let gateway_tag = gateway.to_string().to_uppercase();
    let order_id = new_order_id(Some(&gateway_tag), plan);

    let mut payment = Payment::new_pending(
        order_id.clone(),
        payload.device_id.clone(),
        plan,
        final_amount,
        gateway,
    );
    payment.base_amount = Some(base_amount);
    payment.bonus_days = bonus_days;
    payment.offer_code = offer_code;
    payment.geo_country = request_geo.country.clone();
    payment.geo_multiplier = Some(request_geo.multiplier);
    match gateway {
        Gateway::Mpesa => payment.mpesa_tx_id = Some(tx_id),
        Gateway::Paypal => payment.paypal_tx_id = Some(tx_id),
        _ => {}
    }

    if let Err(err) = db.create_payment(&payment).await {
        return Ok(db_error_response(err));
    }

    Ok(HttpResponse::Ok().json(json!({ "success": true, "order_id": order_id })))
}

// POST /mpesa/submit — manual M-Pesa reference, pending until admin approval
#[post("/mpesa/submit")]
pub async fn mpesa_submit(
    req: HttpRequest,
    db: Data<DatabaseService>,
    geo: Data<GeoService>,
    limiter: Data<dyn RateLimiter>,
    config: Data<Config>,
    payload: Json<ManualSubmitRequest>,
) -> Result<HttpResponse> {
    submit_manual_payment(
        &req,
        &db,
        &geo,
        limiter.get_ref(),
        &config,
        &payload,
        Gateway::Mpesa,
    )
    .await
}

// POST /paypal/submit — manual PayPal transaction id, same contract
#[post("/paypal/submit")]
pub async fn paypal_submit(
    req: HttpRequest,
    db: Data<DatabaseService>,
    geo: Data<GeoService>,
    limiter: Data<dyn RateLimiter>,
    config: Data<Config>,
    payload: Json<ManualSubmitRequest>,
) -> Result<HttpResponse> {
    submit_manual_payment(
        &req,
        &db,
        &geo,
        limiter.get_ref(),
        &config,
        &payload,
        Gateway::Paypal,
    )
    .await
}

// GET /history?device_id= — recent ledger rows for a device
#[get("/history")]
pub async fn history(db: Data<DatabaseService>, query: Query<HistoryQuery>) -> Result<HttpResponse> {
    let limit = query.limit.unwrap_or(20);
    match db.payments_for_device(&query.device_id, limit).await {
        Ok(payments) => Ok(HttpResponse::Ok().json(json!({ "payments": payments }))),
        Err(err) => Ok(db_error_response(err)),
    }
}

/// Resolve the code for an already-successful row, minting late if the
/// ledger predates code minting.
async fn resolve_existing_code(
    db: &DatabaseService,
    payment: &Payment,
    device_id: &str,
) -> Result<Option<String>, crate::errors::DbError> {
    if let Some(code) = &payment.access_code {
        return Ok(Some(code.clone()));
    }
    if let Some(linked) = db.get_redemption_by_payment_order(&payment.order_id).await? {
        return Ok(Some(linked.code));
    }

    let Some(device) = db.get_device(device_id).await? else {
        return Ok(None);
    };

    let duration_days = payment.plan.duration_days() + payment.bonus_days.max(0);
    let access = get_or_create_auto_payment_redemption(
        db,
        &AutoRedemptionInput {
            payment_order_id: payment.order_id.clone(),
            user_id: device.user_id.clone(),
            plan: payment.plan,
            duration_days,
            max_devices: payment.plan.max_devices(),
        },
    )
    .await?;
    db.merge_payment(
        &payment.order_id,
        json!({
            "access_code": access.code.clone(),
            "access_code_id": access.redemption_id.clone(),
        }),
    )
    .await?;
    Ok(Some(access.code))
}

// POST /verify — reconcile a pending payment against the gateway
#[post("/verify")]
pub async fn verify(
    db: Data<DatabaseService>,
    sifalo_service: Data<SifaloPayService>,
    payload: Json<VerifyRequest>,
) -> Result<HttpResponse> {
    if payload.device_id.trim().is_empty() {
        return Ok(HttpResponse::BadRequest().json(json!({ "error": "device_id is required" })));
    }
    if payload.order_id.is_none() && payload.sid.is_none() {
        return Ok(
            HttpResponse::BadRequest().json(json!({ "error": "sid or order_id is required" }))
        );
    }

    let mut payment = None;
    if let Some(order_id) = &payload.order_id {
        payment = match db.get_payment(order_id).await {
            Ok(found) => found,
            Err(err) => return Ok(db_error_response(err)),
        };
    }
    if payment.is_none() {
        if let Some(sid) = &payload.sid {
            payment = match db.find_payment_by_sid(sid).await {
                Ok(found) => found,
                Err(err) => return Ok(db_error_response(err)),
            };
        }
    }
    let Some(payment) = payment else {
        return Ok(HttpResponse::NotFound().json(json!({ "error": "Payment record not found" })));
    };

    // Already verified: idempotent short-circuit.
    if payment.status == PaymentStatus::Success {
        let code = match resolve_existing_code(&db, &payment, &payload.device_id).await {
            Ok(code) => code,
            Err(err) => return Ok(db_error_response(err)),
        };
        return Ok(HttpResponse::Ok().json(json!({
            "success": true,
            "message": "Payment already verified",
            "plan": payment.plan,
            "code": code,
        })));
    }

    // Manual gateways wait for an admin, not a gateway API.
    if payment.gateway.is_manual() {
        return Ok(HttpResponse::Ok().json(json!({
            "success": false,
            "status": "pending",
            "manual": true,
            "message": "Payment received. Our team confirms within 30-40 minutes, \
                        then premium unlocks automatically.",
        })));
    }

    let verify_sid = payload.sid.clone().or_else(|| payment.sifalo_sid.clone());
    let Some(verify_sid) = verify_sid else {
        return Ok(HttpResponse::Ok().json(json!({
            "success": false,
            "status": "pending",
            "message": "No transaction ID to verify",
        })));
    };

    if !sifalo_service.is_configured() {
        return Ok(HttpResponse::InternalServerError()
            .json(json!({ "error": "Payment system not configured" })));
    }

    let verdict = match sifalo_service.verify(&verify_sid).await {
        Ok(verdict) => verdict,
        Err(err) => {
            log::error!("Sifalo verify error: {:#}", err);
            return Ok(
                HttpResponse::BadGateway().json(json!({ "error": "Verification failed" }))
            );
        }
    };

    // Audit trail on every attempt, success or not.
    let audit_patch = json!({
        "last_checked_at": now_ms(),
        "verify_attempts": payment.verify_attempts + 1,
        "sifalo_sid": verify_sid.clone(),
        "last_gateway_status": sifalo::extract_status_candidates(&verdict).first(),
        "last_gateway_code": sifalo::gateway_code(&verdict),
        "last_gateway_message": sifalo::gateway_message(&verdict),
    });
    if let Err(err) = db.merge_payment(&payment.order_id, audit_patch).await {
        return Ok(db_error_response(err));
    }

    if sifalo::is_successful_verification(&verdict) {
        let device = match db.get_device(&payload.device_id).await {
            Ok(Some(device)) => device,
            Ok(None) => {
                return Ok(HttpResponse::NotFound()
                    .json(json!({ "error": "Device not found, please contact support" })))
            }
            Err(err) => return Ok(db_error_response(err)),
        };

        let activation = match activate_entitlement(
            &db,
            ActivationInput {
                order_id: payment.order_id.clone(),
                user_id: device.user_id.clone(),
                plan: payment.plan,
                bonus_days: payment.bonus_days,
                stripe_customer_id: None,
                payment_patch: json!({
                    "sifalo_sid": verify_sid.clone(),
                    "payment_type": sifalo::gateway_payment_type(&verdict).unwrap_or_else(|| "unknown".to_string()),
                }),
            },
        )
        .await
        {
            Ok(activation) => activation,
            Err(err) => return Ok(db_error_response(err)),
        };

        let mut event = ConversionEvent::new("purchase_completed", "payment", "verify_api");
        event.user_id = Some(device.user_id.clone());
        event.device_id = Some(payload.device_id.clone());
        event.plan = Some(payment.plan.to_string());
        event.order_id = Some(payment.order_id.clone());
        event.metadata = Some(json!({
            "sid": verify_sid.clone(),
            "bonus_days": payment.bonus_days,
            "duration_days": activation.duration_days,
        }));
        if let Err(err) = db.record_event(&event).await {
            log::warn!("verify conversion event write failed: {}", err);
        }

        return Ok(HttpResponse::Ok().json(json!({
            "success": true,
            "message": "Payment verified and subscription activated!",
            "plan": payment.plan,
            "expires_in": format!("{} days", activation.duration_days),
            "code": activation.code,
        })));
    }

    if sifalo::is_pending_verification(&verdict) {
        return Ok(HttpResponse::Ok().json(json!({
            "success": false,
            "status": "pending",
            "message": "Payment is still pending",
        })));
    }

    let failure_reason =
        sifalo::gateway_message(&verdict).unwrap_or_else(|| "Payment declined".to_string());
    let failed_patch = json!({
        "status": "failed",
        "failed_at": now_ms(),
        "failure_reason": failure_reason,
    });
    if let Err(err) = db.merge_payment(&payment.order_id, failed_patch).await {
        return Ok(db_error_response(err));
    }

    let mut event = ConversionEvent::new("purchase_failed", "payment", "verify_api");
    event.device_id = Some(payload.device_id.clone());
    event.plan = Some(payment.plan.to_string());
    event.order_id = Some(payment.order_id.clone());
    if let Err(err) = db.record_event(&event).await {
        log::warn!("verify failure conversion event write failed: {}", err);
    }

    Ok(HttpResponse::Ok().json(json!({
        "success": false,
        "status": "failed",
        "message": "Payment failed or was declined",
    })))
}

// POST /webhook — Sifalo Pay callback
#[post("/webhook")]
pub async fn webhook(
    db: Data<DatabaseService>,
    payload: Json<WebhookPayload>,
) -> Result<HttpResponse> {
    log::info!(
        "Sifalo webhook received: order_id={:?} sid={:?} status={:?}",
        payload.order_id,
        payload.sid,
        payload.status
    );

    if payload.sid.is_none() && payload.order_id.is_none() {
        return Ok(HttpResponse::BadRequest().json(json!({ "error": "Missing sid or order_id" })));
    }

    let mut payment = None;
    if let Some(order_id) = &payload.order_id {
        payment = match db.get_payment(order_id).await {
            Ok(found) => found,
            Err(err) => return Ok(db_error_response(err)),
        };
    }
    if payment.is_none() {
        if let Some(sid) = &payload.sid {
            payment = match db.find_payment_by_sid(sid).await {
                Ok(found) => found,
                Err(err) => return Ok(db_error_response(err)),
            };
        }
    }
    if payment.is_none() {
        if let Some(key) = &payload.key {
            payment = match db.find_payment_by_sifalo_key(key).await {
                Ok(found) => found,
                Err(err) => return Ok(db_error_response(err)),
            };
        }
    }
    let Some(payment) = payment else {
        log::warn!(
            "webhook: payment not found for order_id={:?} sid={:?}",
            payload.order_id,
            payload.sid
        );
        return Ok(HttpResponse::NotFound().json(json!({ "error": "Payment not found" })));
    };

    // Replayed delivery of an already-settled payment.
    if payment.status == PaymentStatus::Success {
        return Ok(HttpResponse::Ok().json(json!({ "message": "Already processed" })));
    }

    if let Some(sid) = &payload.sid {
        if let Err(err) = db
            .merge_payment(&payment.order_id, json!({ "sifalo_sid": sid }))
            .await
        {
            return Ok(db_error_response(err));
        }
    }

    let status = payload
        .status
        .as_deref()
        .unwrap_or("")
        .trim()
        .to_lowercase();
    let is_success = matches!(status.as_str(), "success" | "completed" | "paid");
    let is_failure = matches!(status.as_str(), "failed" | "declined" | "cancelled");

    if is_success {
        match db.get_device(&payment.device_id).await {
            Ok(Some(device)) => {
                let activation = activate_entitlement(
                    &db,
                    ActivationInput {
                        order_id: payment.order_id.clone(),
                        user_id: device.user_id.clone(),
                        plan: payment.plan,
                        bonus_days: payment.bonus_days,
                        stripe_customer_id: None,
                        payment_patch: json!({
                            "payment_type": payload.payment_type.clone().unwrap_or_else(|| "unknown".to_string()),
                        }),
                    },
                )
                .await;
                match activation {
                    Ok(activation) => log::info!(
                        "webhook: payment {} settled, subscription {} active",
                        payment.order_id,
                        activation.subscription.subscription_id
                    ),
                    Err(err) => return Ok(db_error_response(err)),
                }
            }
            Ok(None) => {
                // Settle the ledger even when the device vanished; support
                // recovers the entitlement later through /pay/verify.
                let patch = json!({
                    "status": "success",
                    "payment_type": payload.payment_type.clone().unwrap_or_else(|| "unknown".to_string()),
                    "completed_at": now_ms(),
                });
                if let Err(err) = db.merge_payment(&payment.order_id, patch).await {
                    return Ok(db_error_response(err));
                }
                log::warn!(
                    "webhook: payment {} settled but device {} not found",
                    payment.order_id,
                    payment.device_id
                );
            }
            Err(err) => return Ok(db_error_response(err)),
        }
    } else if is_failure {
        let patch = json!({
            "status": "failed",
            "failed_at": now_ms(),
            "failure_reason": format!("Gateway reported {}", status),
        });
        if let Err(err) = db.merge_payment(&payment.order_id, patch).await {
            return Ok(db_error_response(err));
        }
        log::info!("webhook: payment {} marked as failed", payment.order_id);
    } else {
        log::info!(
            "webhook: unhandled status {:?} for {}",
            payload.status,
            payment.order_id
        );
    }

    Ok(HttpResponse::Ok().json(json!({ "success": true })))
}
