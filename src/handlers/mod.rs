use actix_web::HttpResponse;
use serde_json::json;

use crate::errors::DbError;

pub mod admin;
pub mod auth;
pub mod cron;
pub mod health;
pub mod internal;
pub mod payments;
pub mod pricing;
pub mod redemptions;
pub mod subscriptions;
pub mod users;

/// Boundary mapping from the service error taxonomy onto HTTP statuses.
/// Storage errors are logged and flattened to a generic 500 body.
pub fn db_error_response(err: DbError) -> HttpResponse {
    match err {
        DbError::Validation(msg) => HttpResponse::BadRequest().json(json!({ "error": msg })),
        DbError::NotFound(msg) => HttpResponse::NotFound().json(json!({ "error": msg })),
        DbError::Conflict(msg) => HttpResponse::Conflict().json(json!({ "error": msg })),
        DbError::Storage(err) => {
            log::error!("storage error: {}", err);
            HttpResponse::InternalServerError().json(json!({ "error": "Internal server error" }))
        }
        DbError::Other(err) => {
            log::error!("unhandled error: {:#}", err);
            HttpResponse::InternalServerError().json(json!({ "error": "Internal server error" }))
        }
    }
}

/// 400 with field-level details from a validator failure.
pub fn validation_error_response(errors: validator::ValidationErrors) -> HttpResponse {
    HttpResponse::BadRequest().json(json!({
        "error": "Validation failed",
        "details": errors.to_string(),
    }))
}
