use actix_web::web::{Data, Json};
use actix_web::{post, HttpRequest, HttpResponse, Result};
use serde_json::json;
use std::time::Duration;
use validator::Validate;

use crate::handlers::{db_error_response, validation_error_response};
use crate::models::common::now_ms;
use crate::models::redemption::RedeemRequest;
use crate::models::subscription::{Subscription, SubscriptionView};
use crate::services::database::DatabaseService;
use crate::services::identity::get_or_create_device_user;
use crate::services::rate_limit::{client_ip, RateLimiter};

const REDEEM_MAX: u32 = 10;
const REDEEM_WINDOW: Duration = Duration::from_secs(5 * 60);

// POST /redeem — turn an unused code into an active subscription
#[post("/redeem")]
pub async fn redeem(
    req: HttpRequest,
    db: Data<DatabaseService>,
    limiter: Data<dyn RateLimiter>,
    payload: Json<RedeemRequest>,
) -> Result<HttpResponse> {
    if let Err(errors) = payload.validate() {
        return Ok(validation_error_response(errors));
    }

    let ip = client_ip(&req);
    let decision = limiter
        .get_ref()
        .check(&format!("redeem:{}", ip), REDEEM_MAX, REDEEM_WINDOW);
    if !decision.allowed {
        return Ok(HttpResponse::TooManyRequests()
            .json(json!({ "error": "Too many attempts, try again later" })));
    }

    let redemption = match db.get_redemption_by_code(&payload.code).await {
        Ok(Some(redemption)) => redemption,
        Ok(None) => {
            return Ok(HttpResponse::NotFound().json(json!({ "error": "Invalid code" })))
        }
        Err(err) => return Ok(db_error_response(err)),
    };

    if redemption.is_used() {
        return Ok(HttpResponse::BadRequest().json(json!({ "error": "Code already used" })));
    }
    if redemption.revoked_at.is_some() {
        return Ok(HttpResponse::BadRequest().json(json!({ "error": "Code revoked" })));
    }
    let now = now_ms();
    if redemption.is_expired_at(now) {
        return Ok(HttpResponse::BadRequest().json(json!({ "error": "Code expired" })));
    }

    let resolved = match get_or_create_device_user(&db, &payload.device_id, None).await {
        Ok(resolved) => resolved,
        Err(err) => return Ok(db_error_response(err)),
    };

    if let Err(err) = db
        .merge_redemption(
            &redemption.redemption_id,
            json!({
                "used_by_user_id": resolved.user.user_id.clone(),
                "used_at": now,
            }),
        )
        .await
    {
        return Ok(db_error_response(err));
    }

    let subscription = Subscription::new_active(
        resolved.user.user_id.clone(),
        redemption.plan,
        redemption.duration_days,
        redemption.max_devices,
        Some(redemption.redemption_id.clone()),
    );
    let subscription = match db.create_active_subscription(&subscription).await {
        Ok(subscription) => subscription,
        Err(err) => return Ok(db_error_response(err)),
    };

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "subscription": SubscriptionView::from_subscription(&subscription, now),
        "plan": redemption.plan,
        "duration_days": redemption.duration_days,
        "expires_at": subscription.expires_at,
    })))
}
