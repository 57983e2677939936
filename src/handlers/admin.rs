use actix_web::cookie::{time::Duration as CookieDuration, Cookie, SameSite};
use actix_web::web::{Data, Json, Path, Query};
use actix_web::{get, post, put, HttpRequest, HttpResponse, Result};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use validator::Validate;

use crate::config::Config;
use crate::handlers::{db_error_response, validation_error_response};
use crate::models::common::{now_ms, PaginatedResponse, PaginationQuery, PlanId};
use crate::models::payment::PaymentStatus;
use crate::models::redemption::{CreateRedemptionsRequest, Redemption, RedemptionSource};
use crate::services::admin_auth::{
    create_admin_session_value, is_admin_authenticated, ADMIN_COOKIE_NAME,
};
use crate::services::database::DatabaseService;
use crate::services::entitlement::{
    activate_entitlement, generate_unique_redemption_code, ActivationInput,
};

#[derive(Debug, Deserialize)]
pub struct AdminLoginRequest {
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct AdminPaymentsQuery {
    pub status: Option<String>,
    pub search: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct RejectRequest {
    pub reason: Option<String>,
}

fn parse_status_filter(raw: Option<&str>) -> Result<Option<PaymentStatus>, String> {
    match raw.map(|s| s.trim().to_lowercase()) {
        None => Ok(None),
        Some(status) if status.is_empty() || status == "all" => Ok(None),
        Some(status) => match status.as_str() {
            "pending" => Ok(Some(PaymentStatus::Pending)),
            "success" => Ok(Some(PaymentStatus::Success)),
            "failed" => Ok(Some(PaymentStatus::Failed)),
            other => Err(format!("Unknown status filter: {}", other)),
        },
    }
}

// POST /login — issue the signed admin cookie
#[post("/login")]
pub async fn login(config: Data<Config>, payload: Json<AdminLoginRequest>) -> Result<HttpResponse> {
    if config.admin_secret.is_empty() || payload.password != config.admin_secret {
        return Ok(HttpResponse::Unauthorized().json(json!({ "error": "Invalid credentials" })));
    }

    let value = create_admin_session_value(&config.admin_secret);
    let cookie = Cookie::build(ADMIN_COOKIE_NAME, value)
        .http_only(true)
        .same_site(SameSite::Lax)
        .path("/")
        .max_age(CookieDuration::days(7))
        .finish();

    let mut response = HttpResponse::Ok().json(json!({ "success": true }));
    if let Err(err) = response.add_cookie(&cookie) {
        log::warn!("failed to attach admin cookie: {}", err);
    }
    Ok(response)
}

// GET /payments — ledger listing with linked codes and status tallies
#[get("/payments")]
pub async fn list_payments(
    req: HttpRequest,
    db: Data<DatabaseService>,
    config: Data<Config>,
    query: Query<AdminPaymentsQuery>,
) -> Result<HttpResponse> {
    if !is_admin_authenticated(&req, &config.admin_secret) {
        return Ok(HttpResponse::Unauthorized().json(json!({ "error": "Unauthorized" })));
    }

    let status = match parse_status_filter(query.status.as_deref()) {
        Ok(status) => status,
        Err(message) => {
            return Ok(HttpResponse::BadRequest().json(json!({ "error": message })))
        }
    };
    let search = query
        .search
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty());

    let pagination = PaginationQuery {
        page: query.page,
        limit: query.limit,
    };
    let page = pagination.page();
    let limit = pagination.limit();
    let offset = (page - 1) * limit;

    let (payments, total) = match db.list_payments(status, search, limit, offset).await {
        Ok(result) => result,
        Err(err) => return Ok(db_error_response(err)),
    };

    let order_ids: Vec<String> = payments.iter().map(|p| p.order_id.clone()).collect();
    let redemptions = match db.redemptions_for_orders(&order_ids).await {
        Ok(redemptions) => redemptions,
        Err(err) => return Ok(db_error_response(err)),
    };
    let code_by_order: HashMap<String, &Redemption> = redemptions
        .iter()
        .filter_map(|r| r.payment_order_id.as_ref().map(|o| (o.clone(), r)))
        .collect();

    let rows: Vec<Value> = payments
        .iter()
        .map(|payment| {
            let linked = code_by_order.get(&payment.order_id);
            let access_code = payment
                .access_code
                .clone()
                .or_else(|| linked.map(|r| r.code.clone()));
            let debug_reason = payment
                .failure_reason
                .clone()
                .or_else(|| payment.last_gateway_message.clone())
                .unwrap_or_else(|| {
                    if payment.status == PaymentStatus::Pending {
                        "Awaiting payment callback/verify".to_string()
                    } else {
                        String::new()
                    }
                });

            let mut row = serde_json::to_value(payment).unwrap_or_else(|_| json!({}));
            row["access_code"] = json!(access_code);
            row["code_source"] = json!(linked.and_then(|r| r.source).or_else(|| {
                payment.access_code.as_ref().map(|_| RedemptionSource::AutoPayment)
            }));
            row["code_used_at"] = json!(linked.and_then(|r| r.used_at));
            row["debug_reason"] = json!(debug_reason);
            row
        })
        .collect();

    let status_counts = match db.payment_status_counts().await {
        Ok(counts) => counts,
        Err(err) => return Ok(db_error_response(err)),
    };
    let mut stats = json!({ "pending": 0, "success": 0, "failed": 0 });
    for row in status_counts {
        let key = match row.status {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Success => "success",
            PaymentStatus::Failed => "failed",
        };
        stats[key] = json!(row.count);
    }
    match db.stale_pending_count(15 * 60 * 1000).await {
        Ok(stale) => stats["stale_pending"] = json!(stale),
        Err(err) => return Ok(db_error_response(err)),
    }

    let total_pages = total.div_ceil(limit as u64);
    Ok(HttpResponse::Ok().json(json!({
        "payments": PaginatedResponse {
            data: rows,
            total,
            page,
            limit,
            total_pages,
        },
        "stats": stats,
    })))
}

// PUT /payments/{order_id}/approve — manual reconciliation for stuck rows
#[put("/payments/{order_id}/approve")]
pub async fn approve_payment(
    req: HttpRequest,
    db: Data<DatabaseService>,
    config: Data<Config>,
    path: Path<String>,
) -> Result<HttpResponse> {
    if !is_admin_authenticated(&req, &config.admin_secret) {
        return Ok(HttpResponse::Unauthorized().json(json!({ "error": "Unauthorized" })));
    }
    let order_id = path.into_inner();

    let payment = match db.get_payment(&order_id).await {
        Ok(Some(payment)) => payment,
        Ok(None) => {
            return Ok(HttpResponse::NotFound().json(json!({ "error": "Payment not found" })))
        }
        Err(err) => return Ok(db_error_response(err)),
    };
    if payment.status != PaymentStatus::Pending {
        return Ok(HttpResponse::BadRequest().json(json!({ "error": "Payment is not pending" })));
    }

    // Resolve the owner: the ledger row's user if set, else via the device.
    let user_id = match payment.user_id {
        Some(user_id) => user_id,
        None => match db.get_device(&payment.device_id).await {
            Ok(Some(device)) => device.user_id,
            Ok(None) => {
                return Ok(HttpResponse::NotFound()
                    .json(json!({ "error": "Device not found, cannot resolve user" })))
            }
            Err(err) => return Ok(db_error_response(err)),
        },
    };

    let activation = match activate_entitlement(
        &db,
        ActivationInput {
            order_id: order_id.clone(),
            user_id: user_id.clone(),
            plan: payment.plan,
            bonus_days: payment.bonus_days,
            stripe_customer_id: None,
            payment_patch: json!({ "payment_type": "manual_admin" }),
        },
    )
    .await
    {
        Ok(activation) => activation,
        Err(err) => return Ok(db_error_response(err)),
    };

    log::info!("admin approved payment {} for user {}", order_id, user_id);
    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "code": activation.code,
        "subscription_id": activation.subscription.subscription_id,
        "expires_at": activation.subscription.expires_at,
    })))
}

// PUT /payments/{order_id}/reject — terminal failure for a stuck row
#[put("/payments/{order_id}/reject")]
pub async fn reject_payment(
    req: HttpRequest,
    db: Data<DatabaseService>,
    config: Data<Config>,
    path: Path<String>,
    payload: Json<RejectRequest>,
) -> Result<HttpResponse> {
    if !is_admin_authenticated(&req, &config.admin_secret) {
        return Ok(HttpResponse::Unauthorized().json(json!({ "error": "Unauthorized" })));
    }
    let order_id = path.into_inner();

    let payment = match db.get_payment(&order_id).await {
        Ok(Some(payment)) => payment,
        Ok(None) => {
            return Ok(HttpResponse::NotFound().json(json!({ "error": "Payment not found" })))
        }
        Err(err) => return Ok(db_error_response(err)),
    };
    if payment.status != PaymentStatus::Pending {
        return Ok(HttpResponse::BadRequest().json(json!({ "error": "Payment is not pending" })));
    }

    let reason = payload
        .reason
        .clone()
        .filter(|r| !r.trim().is_empty())
        .unwrap_or_else(|| "Rejected by admin".to_string());
    let patch = json!({
        "status": "failed",
        "failed_at": now_ms(),
        "failure_reason": reason,
    });
    if let Err(err) = db.merge_payment(&order_id, patch).await {
        return Ok(db_error_response(err));
    }

    log::info!("admin rejected payment {}", order_id);
    Ok(HttpResponse::Ok().json(json!({ "success": true })))
}

// POST /redemptions — batch-mint unused codes for manual distribution
#[post("/redemptions")]
pub async fn create_redemptions(
    req: HttpRequest,
    db: Data<DatabaseService>,
    config: Data<Config>,
    payload: Json<CreateRedemptionsRequest>,
) -> Result<HttpResponse> {
    if !is_admin_authenticated(&req, &config.admin_secret) {
        return Ok(HttpResponse::Unauthorized().json(json!({ "error": "Unauthorized" })));
    }
    if let Err(errors) = payload.validate() {
        return Ok(validation_error_response(errors));
    }
    let Some(plan) = PlanId::parse(&payload.plan) else {
        return Ok(HttpResponse::BadRequest().json(json!({ "error": "Invalid plan" })));
    };

    let duration_days = payload.duration_days.unwrap_or_else(|| plan.duration_days());
    let max_devices = payload.max_devices.unwrap_or_else(|| plan.max_devices());
    if duration_days <= 0 {
        return Ok(
            HttpResponse::BadRequest().json(json!({ "error": "duration_days must be positive" }))
        );
    }

    let mut codes = Vec::with_capacity(payload.count as usize);
    for _ in 0..payload.count {
        let code = match generate_unique_redemption_code(&db).await {
            Ok(code) => code,
            Err(err) => return Ok(db_error_response(err)),
        };
        let redemption = Redemption::new_admin(
            code.clone(),
            plan,
            duration_days,
            max_devices,
            payload.expires_at,
        );
        if let Err(err) = db.create_admin_redemption(&redemption).await {
            return Ok(db_error_response(err));
        }
        codes.push(code);
    }

    Ok(HttpResponse::Created().json(json!({
        "success": true,
        "plan": plan,
        "duration_days": duration_days,
        "max_devices": max_devices,
        "codes": codes,
    })))
}
