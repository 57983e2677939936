use actix_web::HttpResponse;
use serde_json::json;

pub async fn health_check() -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "status": "ok",
        "service": "fanbroj-api",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
