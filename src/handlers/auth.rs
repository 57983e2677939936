use actix_web::cookie::{time::Duration as CookieDuration, Cookie, SameSite};
use actix_web::web::{Data, Json};
use actix_web::{get, post, HttpRequest, HttpResponse, Result};
use serde_json::json;
use validator::Validate;

use crate::handlers::{db_error_response, validation_error_response};
use crate::models::common::now_ms;
use crate::models::subscription::SubscriptionView;
use crate::models::user::{
    new_record_id, normalize_email, LoginRequest, SignupRequest, UserSession, UserView,
};
use crate::services::auth::{
    create_session_token, hash_password, hash_session_token, verify_password,
    USER_SESSION_COOKIE, USER_SESSION_TTL_MS,
};
use crate::services::database::DatabaseService;
use crate::services::identity::{get_or_create_device_user, merge_user_identity, rebind_device};
use crate::services::rate_limit::client_ip;

fn session_cookie(token: &str) -> Cookie<'_> {
    Cookie::build(USER_SESSION_COOKIE, token)
        .http_only(true)
        .same_site(SameSite::Lax)
        .path("/")
        .max_age(CookieDuration::milliseconds(USER_SESSION_TTL_MS))
        .finish()
}

async fn open_session(
    db: &DatabaseService,
    user_id: String,
    device_id: Option<&str>,
    ip: String,
    user_agent: Option<String>,
) -> Result<String, crate::errors::DbError> {
    let token = create_session_token();
    let now = now_ms();
    db.create_session(&UserSession {
        session_id: new_record_id(),
        user_id,
        token_hash: hash_session_token(&token),
        device_id: device_id.map(|s| s.to_string()),
        ip: Some(ip),
        user_agent,
        created_at: now,
        last_seen_at: now,
        expires_at: now + USER_SESSION_TTL_MS,
    })
    .await?;
    Ok(token)
}

// POST /signup — attach credentials to the device's account
#[post("/signup")]
pub async fn signup(
    req: HttpRequest,
    db: Data<DatabaseService>,
    payload: Json<SignupRequest>,
) -> Result<HttpResponse> {
    if let Err(errors) = payload.validate() {
        return Ok(validation_error_response(errors));
    }

    let email_lower = normalize_email(&payload.email);
    match db.get_user_by_email(&email_lower).await {
        Ok(Some(_)) => {
            return Ok(HttpResponse::Conflict()
                .json(json!({ "error": "An account with this email already exists" })))
        }
        Ok(None) => {}
        Err(err) => return Ok(db_error_response(err)),
    }

    let resolved =
        match get_or_create_device_user(&db, &payload.device_id, payload.user_agent.as_deref())
            .await
        {
            Ok(resolved) => resolved,
            Err(err) => return Ok(db_error_response(err)),
        };

    let mut user = resolved.user;
    if user.email.is_some() {
        return Ok(HttpResponse::Conflict()
            .json(json!({ "error": "This device is already linked to an account" })));
    }

    let password_hash = match hash_password(&payload.password) {
        Ok(hash) => hash,
        Err(err) => {
            log::error!("password hashing failed: {:#}", err);
            return Ok(HttpResponse::InternalServerError()
                .json(json!({ "error": "Internal server error" })));
        }
    };

    user.email = Some(payload.email.trim().to_string());
    user.email_lower = Some(email_lower);
    user.password_hash = Some(password_hash);
    if user.display_name.is_none() {
        let local = payload.email.split('@').next().unwrap_or("");
        let cleaned: String = local
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
            .take(20)
            .collect();
        if !cleaned.is_empty() {
            user.display_name = Some(cleaned);
        }
    }

    let user = match db.update_user(&user).await {
        Ok(user) => user,
        Err(err) => return Ok(db_error_response(err)),
    };

    let token = match open_session(
        &db,
        user.user_id.clone(),
        Some(&payload.device_id),
        client_ip(&req),
        payload.user_agent.clone(),
    )
    .await
    {
        Ok(token) => token,
        Err(err) => return Ok(db_error_response(err)),
    };

    let mut response = HttpResponse::Created().json(json!({
        "success": true,
        "user": UserView::from(user),
        "token": token,
    }));
    if let Err(err) = response.add_cookie(&session_cookie(&token)) {
        log::warn!("failed to attach session cookie: {}", err);
    }
    Ok(response)
}

// POST /login — credential check; a device switching owners triggers the
// identity merge before it is rebound (last login wins).
#[post("/login")]
pub async fn login(
    req: HttpRequest,
    db: Data<DatabaseService>,
    payload: Json<LoginRequest>,
) -> Result<HttpResponse> {
    if let Err(errors) = payload.validate() {
        return Ok(validation_error_response(errors));
    }

    let email_lower = normalize_email(&payload.email);
    let user = match db.get_user_by_email(&email_lower).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            return Ok(
                HttpResponse::Unauthorized().json(json!({ "error": "Invalid email or password" }))
            )
        }
        Err(err) => return Ok(db_error_response(err)),
    };

    let Some(password_hash) = user.password_hash.clone() else {
        return Ok(HttpResponse::Unauthorized()
            .json(json!({ "error": "No password set for this account" })));
    };
    match verify_password(&password_hash, &payload.password) {
        Ok(true) => {}
        Ok(false) => {
            return Ok(
                HttpResponse::Unauthorized().json(json!({ "error": "Invalid email or password" }))
            )
        }
        Err(err) => {
            log::error!("password verification failed: {:#}", err);
            return Ok(HttpResponse::InternalServerError()
                .json(json!({ "error": "Internal server error" })));
        }
    }

    if let Some(device_id) = payload.device_id.as_deref().filter(|id| !id.is_empty()) {
        if let Ok(Some(device)) = db.get_device(device_id).await {
            if device.user_id != user.user_id {
                if let Err(err) = merge_user_identity(&db, &device.user_id, &user.user_id).await {
                    return Ok(db_error_response(err));
                }
            }
        }
        if let Err(err) =
            rebind_device(&db, device_id, &user.user_id, payload.user_agent.as_deref()).await
        {
            return Ok(db_error_response(err));
        }
    }

    let token = match open_session(
        &db,
        user.user_id.clone(),
        payload.device_id.as_deref(),
        client_ip(&req),
        payload.user_agent.clone(),
    )
    .await
    {
        Ok(token) => token,
        Err(err) => return Ok(db_error_response(err)),
    };

    let subscription = match db
        .active_subscription_for_user(&user.user_id, now_ms())
        .await
    {
        Ok(subscription) => subscription,
        Err(err) => return Ok(db_error_response(err)),
    };

    let mut response = HttpResponse::Ok().json(json!({
        "success": true,
        "user": UserView::from(user),
        "subscription": subscription
            .map(|sub| SubscriptionView::from_subscription(&sub, now_ms())),
        "token": token,
    }));
    if let Err(err) = response.add_cookie(&session_cookie(&token)) {
        log::warn!("failed to attach session cookie: {}", err);
    }
    Ok(response)
}

fn extract_session_token(req: &HttpRequest) -> Option<String> {
    if let Some(cookie) = req.cookie(USER_SESSION_COOKIE) {
        return Some(cookie.value().to_string());
    }
    let header = req.headers().get("authorization")?.to_str().ok()?;
    header
        .strip_prefix("Bearer ")
        .map(|token| token.trim().to_string())
}

// GET /session — resolve the caller's session to a user + subscription
#[get("/session")]
pub async fn session(req: HttpRequest, db: Data<DatabaseService>) -> Result<HttpResponse> {
    let Some(token) = extract_session_token(&req) else {
        return Ok(HttpResponse::Unauthorized().json(json!({ "error": "Not signed in" })));
    };

    let token_hash = hash_session_token(&token);
    let session = match db.get_valid_session(&token_hash).await {
        Ok(Some(session)) => session,
        Ok(None) => {
            return Ok(
                HttpResponse::Unauthorized().json(json!({ "error": "Session expired" }))
            )
        }
        Err(err) => return Ok(db_error_response(err)),
    };

    if let Err(err) = db.touch_session(&token_hash).await {
        log::warn!("failed to touch session: {}", err);
    }

    let user = match db.get_user(&session.user_id).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            return Ok(HttpResponse::Unauthorized().json(json!({ "error": "Session expired" })))
        }
        Err(err) => return Ok(db_error_response(err)),
    };

    let subscription = match db
        .active_subscription_for_user(&user.user_id, now_ms())
        .await
    {
        Ok(subscription) => subscription,
        Err(err) => return Ok(db_error_response(err)),
    };

    Ok(HttpResponse::Ok().json(json!({
        "user": UserView::from(user),
        "subscription": subscription
            .map(|sub| SubscriptionView::from_subscription(&sub, now_ms())),
    })))
}
