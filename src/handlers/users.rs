use actix_web::web::{Data, Json, Path};
use actix_web::{get, post, put, HttpResponse, Result};
use serde::Deserialize;
use serde_json::json;
use validator::Validate;

use crate::handlers::{db_error_response, validation_error_response};
use crate::models::common::now_ms;
use crate::models::subscription::SubscriptionView;
use crate::models::user::{
    is_valid_record_id, is_valid_username, RegisterDeviceRequest, UserView,
};
use crate::services::database::DatabaseService;
use crate::services::identity::get_or_create_device_user;

// POST /register — get-or-create a user for a device fingerprint
#[post("/register")]
pub async fn register_device(
    db: Data<DatabaseService>,
    payload: Json<RegisterDeviceRequest>,
) -> Result<HttpResponse> {
    if let Err(errors) = payload.validate() {
        return Ok(validation_error_response(errors));
    }

    let resolved =
        match get_or_create_device_user(&db, &payload.device_id, payload.user_agent.as_deref())
            .await
        {
            Ok(resolved) => resolved,
            Err(err) => return Ok(db_error_response(err)),
        };

    let subscription = match db
        .active_subscription_for_user(&resolved.user.user_id, now_ms())
        .await
    {
        Ok(subscription) => subscription,
        Err(err) => return Ok(db_error_response(err)),
    };

    let body = json!({
        "user": UserView::from(resolved.user),
        "subscription": subscription
            .map(|sub| SubscriptionView::from_subscription(&sub, now_ms())),
        "is_new": resolved.is_new,
    });

    if resolved.is_new {
        Ok(HttpResponse::Created().json(body))
    } else {
        Ok(HttpResponse::Ok().json(body))
    }
}

#[get("/{user_id}")]
pub async fn get_user(db: Data<DatabaseService>, path: Path<String>) -> Result<HttpResponse> {
    let user_id = path.into_inner();
    if !is_valid_record_id(&user_id) {
        return Ok(HttpResponse::BadRequest().json(json!({ "error": "Invalid user id" })));
    }
    match db.get_user(&user_id).await {
        Ok(Some(user)) => Ok(HttpResponse::Ok().json(UserView::from(user))),
        Ok(None) => Ok(HttpResponse::NotFound().json(json!({ "error": "User not found" }))),
        Err(err) => Ok(db_error_response(err)),
    }
}

#[get("/by-referral/{code}")]
pub async fn get_user_by_referral(
    db: Data<DatabaseService>,
    path: Path<String>,
) -> Result<HttpResponse> {
    let code = path.into_inner();
    match db.get_user_by_referral_code(&code).await {
        Ok(Some(user)) => Ok(HttpResponse::Ok().json(UserView::from(user))),
        Ok(None) => Ok(HttpResponse::NotFound().json(json!({ "error": "User not found" }))),
        Err(err) => Ok(db_error_response(err)),
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdateUserRequest {
    pub user_id: String,
    pub username: Option<String>,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
}

// PUT / — allowlisted profile fields only
#[put("")]
pub async fn update_profile(
    db: Data<DatabaseService>,
    payload: Json<UpdateUserRequest>,
) -> Result<HttpResponse> {
    if !is_valid_record_id(&payload.user_id) {
        return Ok(HttpResponse::BadRequest().json(json!({ "error": "Invalid user id" })));
    }

    let mut user = match db.get_user(&payload.user_id).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            return Ok(HttpResponse::NotFound().json(json!({ "error": "User not found" })))
        }
        Err(err) => return Ok(db_error_response(err)),
    };

    let mut changed = false;

    if let Some(avatar_url) = payload.avatar_url.as_deref().map(str::trim) {
        if !avatar_url.is_empty() {
            user.avatar_url = Some(avatar_url.to_string());
            changed = true;
        }
    }

    if let Some(display_name) = payload.display_name.as_deref().map(str::trim) {
        if !display_name.is_empty() {
            user.display_name = Some(display_name.chars().take(50).collect());
            changed = true;
        }
    }

    if let Some(username) = payload.username.as_deref().map(str::trim) {
        if !is_valid_username(username) {
            return Ok(HttpResponse::BadRequest().json(json!({
                "error": "Username must be 3-20 chars and use only letters, numbers, or underscore.",
            })));
        }
        let username_lower = username.to_lowercase();
        match db.get_user_by_username(&username_lower).await {
            Ok(Some(existing)) if existing.user_id != user.user_id => {
                return Ok(
                    HttpResponse::Conflict().json(json!({ "error": "Username already taken." }))
                )
            }
            Ok(_) => {}
            Err(err) => return Ok(db_error_response(err)),
        }
        user.username = Some(username.to_string());
        user.username_lower = Some(username_lower);
        user.display_name = Some(username.to_string());
        changed = true;
    }

    if !changed {
        return Ok(
            HttpResponse::BadRequest().json(json!({ "error": "No valid fields to update" }))
        );
    }

    match db.update_user(&user).await {
        Ok(user) => Ok(HttpResponse::Ok().json(UserView::from(user))),
        Err(err) => Ok(db_error_response(err)),
    }
}

#[get("/by-device/{device_id}")]
pub async fn get_user_by_device(
    db: Data<DatabaseService>,
    path: Path<String>,
) -> Result<HttpResponse> {
    let device_id = path.into_inner();

    let device = match db.get_device(&device_id).await {
        Ok(Some(device)) => device,
        Ok(None) => {
            return Ok(HttpResponse::NotFound().json(json!({ "error": "Device not found" })))
        }
        Err(err) => return Ok(db_error_response(err)),
    };

    match db.get_user(&device.user_id).await {
        Ok(Some(user)) => Ok(HttpResponse::Ok().json(UserView::from(user))),
        Ok(None) => Ok(HttpResponse::NotFound().json(json!({ "error": "User not found" }))),
        Err(err) => Ok(db_error_response(err)),
    }
}
