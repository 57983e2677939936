mod config;
mod errors;
mod handlers;
mod models;
mod services;

use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};
use dotenv::dotenv;
use std::env;
use std::sync::Arc;

use services::{
    database::DatabaseService,
    email::EmailService,
    geo::GeoService,
    rate_limit::{FixedWindowLimiter, RateLimiter},
    sifalo::SifaloPayService,
};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv().ok();
    env_logger::init();

    let config = config::Config::from_env().expect("Failed to load configuration");

    let database_service = DatabaseService::new(&config.database_url)
        .await
        .expect("Failed to initialize database");
    let sifalo_service = SifaloPayService::new(config.sifalo.clone());
    let email_service = EmailService::new(config.email.clone());
    let geo_service = GeoService::new(config.geo.clone());
    let rate_limiter: Arc<dyn RateLimiter> = Arc::new(FixedWindowLimiter::new());

    let port = env::var("PORT").unwrap_or_else(|_| "8080".to_string());
    let bind_address = format!("0.0.0.0:{}", port);
    log::info!("starting fanbroj-api on {}", bind_address);

    let config_data = web::Data::new(config);
    let db_data = web::Data::new(database_service);
    let sifalo_data = web::Data::new(sifalo_service);
    let email_data = web::Data::new(email_service);
    let geo_data = web::Data::new(geo_service);
    let limiter_data = web::Data::from(rate_limiter);

    HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .wrap(
                Cors::default()
                    .allow_any_origin()
                    .allow_any_method()
                    .allow_any_header()
                    .supports_credentials(),
            )
            .app_data(config_data.clone())
            .app_data(db_data.clone())
            .app_data(sifalo_data.clone())
            .app_data(email_data.clone())
            .app_data(geo_data.clone())
            .app_data(limiter_data.clone())
            .service(
                web::scope("/api/v1")
                    // Identity
                    .service(
                        web::scope("/users")
                            .service(handlers::users::register_device)
                            .service(handlers::users::update_profile)
                            .service(handlers::users::get_user_by_device)
                            .service(handlers::users::get_user_by_referral)
                            .service(handlers::users::get_user),
                    )
                    .service(
                        web::scope("/auth")
                            .service(handlers::auth::signup)
                            .service(handlers::auth::login)
                            .service(handlers::auth::session),
                    )
                    // Payment ledger + reconciliation
                    .service(
                        web::scope("/pay")
                            .service(handlers::payments::checkout)
                            .service(handlers::payments::mpesa_submit)
                            .service(handlers::payments::paypal_submit)
                            .service(handlers::payments::verify)
                            .service(handlers::payments::webhook)
                            .service(handlers::payments::history),
                    )
                    // Subscription state
                    .service(
                        web::scope("/subscriptions").service(handlers::subscriptions::status),
                    )
                    // Redemption codes
                    .service(web::scope("/redemptions").service(handlers::redemptions::redeem))
                    // Geo pricing
                    .service(web::scope("/pricing").service(handlers::pricing::quote))
                    // External billing bridge
                    .service(web::scope("/internal").service(handlers::internal::activate))
                    // Scheduled jobs (external cron)
                    .service(
                        web::scope("/cron")
                            .service(handlers::cron::checkout_recovery)
                            .service(handlers::cron::renewal_reminders),
                    )
                    // Admin reconciliation surface
                    .service(
                        web::scope("/admin")
                            .service(handlers::admin::login)
                            .service(handlers::admin::list_payments)
                            .service(handlers::admin::approve_payment)
                            .service(handlers::admin::reject_payment)
                            .service(handlers::admin::create_redemptions),
                    )
                    .route("/health", web::get().to(handlers::health::health_check)),
            )
    })
    .bind(&bind_address)?
    .run()
    .await
}
