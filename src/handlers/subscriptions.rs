use actix_web::web::{Data, Query};
use actix_web::{get, HttpResponse, Result};
use serde_json::json;

use crate::handlers::db_error_response;
use crate::models::common::now_ms;
use crate::models::subscription::{SubscriptionStatusQuery, SubscriptionView};
use crate::services::database::DatabaseService;

// GET /status?device_id= — resolve device -> user -> active subscription
#[get("/status")]
pub async fn status(
    db: Data<DatabaseService>,
    query: Query<SubscriptionStatusQuery>,
) -> Result<HttpResponse> {
    let device = match db.get_device(&query.device_id).await {
        Ok(Some(device)) => device,
        Ok(None) => {
            return Ok(HttpResponse::Ok().json(json!({ "subscription": null })));
        }
        Err(err) => return Ok(db_error_response(err)),
    };

    let now = now_ms();
    match db.active_subscription_for_user(&device.user_id, now).await {
        Ok(subscription) => Ok(HttpResponse::Ok().json(json!({
            "subscription": subscription
                .map(|sub| SubscriptionView::from_subscription(&sub, now)),
        }))),
        Err(err) => Ok(db_error_response(err)),
    }
}
