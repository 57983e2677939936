use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database_url: String,
    pub site_url: String,
    pub admin_secret: String,
    pub internal_secret: String,
    pub cron_secret: String,
    pub sifalo: SifaloConfig,
    pub email: EmailConfig,
    pub geo: GeoConfig,
    pub plans: PlanPricing,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SifaloConfig {
    pub api_url: String,
    pub username: String,
    pub password: String,
}

impl SifaloConfig {
    /// Checkout and verify both require merchant credentials.
    pub fn is_configured(&self) -> bool {
        !self.username.is_empty() && !self.password.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    pub api_url: String,
    pub api_key: String,
    pub from: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoConfig {
    pub api_url: String,
    pub cache_ttl_secs: u64,
}

/// Base USD prices per legacy plan. Geo multipliers and gateway fees are
/// applied on top at checkout time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanPricing {
    pub price_match: Decimal,
    pub price_weekly: Decimal,
    pub price_monthly: Decimal,
    pub price_yearly: Decimal,
}

impl Default for PlanPricing {
    fn default() -> Self {
        Self {
            price_match: Decimal::new(20, 2),    // $0.20
            price_weekly: Decimal::new(100, 2),  // $1.00
            price_monthly: Decimal::new(320, 2), // $3.20
            price_yearly: Decimal::new(1199, 2), // $11.99
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_decimal_or(key: &str, default: Decimal) -> Decimal {
    env::var(key)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Result<Self, env::VarError> {
        let defaults = PlanPricing::default();

        Ok(Config {
            database_url: env_or("DATABASE_URL", "file://fanbroj.db"),
            site_url: env_or("SITE_URL", "https://fanbroj.net"),
            admin_secret: env_or("ADMIN_TOKEN", ""),
            internal_secret: env_or("INTERNAL_SECRET", ""),
            cron_secret: env_or("CRON_SECRET", ""),

            sifalo: SifaloConfig {
                api_url: env_or("SIFALO_PAY_API_URL", "https://api.sifalopay.com/gateway"),
                username: env_or("SIFALO_PAY_USERNAME", ""),
                password: env_or("SIFALO_PAY_PASSWORD", ""),
            },

            email: EmailConfig {
                api_url: env_or("RESEND_API_URL", "https://api.resend.com/emails"),
                api_key: env_or("RESEND_API_KEY", ""),
                from: env_or("EMAIL_FROM", "Fanbroj <no-reply@fanbroj.net>"),
            },

            geo: GeoConfig {
                api_url: env_or("GEO_API_URL", "http://ip-api.com/json"),
                cache_ttl_secs: env_or("GEO_CACHE_TTL_SECS", "86400")
                    .parse()
                    .unwrap_or(86_400),
            },

            plans: PlanPricing {
                price_match: env_decimal_or("PRICE_MATCH", defaults.price_match),
                price_weekly: env_decimal_or("PRICE_WEEKLY", defaults.price_weekly),
                price_monthly: env_decimal_or("PRICE_MONTHLY", defaults.price_monthly),
                price_yearly: env_decimal_or("PRICE_YEARLY", defaults.price_yearly),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_prices_match_published_plans() {
        let plans = PlanPricing::default();
        assert_eq!(plans.price_match, Decimal::new(20, 2));
        assert_eq!(plans.price_yearly, Decimal::new(1199, 2));
    }
}
