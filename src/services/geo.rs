use actix_web::HttpRequest;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration;

use crate::config::GeoConfig;
use crate::services::cache::TtlCache;
use crate::services::pricing;
use crate::services::rate_limit::client_ip;

#[derive(Debug, Clone)]
pub struct RequestGeo {
    pub ip: String,
    pub country: Option<String>,
    pub tier: pricing::TierLevel,
    pub multiplier: Decimal,
}

#[derive(Debug, Deserialize)]
struct IpApiResponse {
    status: String,
    #[serde(rename = "countryCode")]
    country_code: Option<String>,
}

/// Resolves request IPs to country codes via ip-api, with a TTL cache so a
/// hot IP costs one upstream call a day. Lookup failures degrade to default
/// pricing rather than erroring the request.
#[derive(Clone)]
pub struct GeoService {
    client: Client,
    cache: TtlCache<String>,
    config: GeoConfig,
}

impl GeoService {
    pub fn new(config: GeoConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(3))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            cache: TtlCache::new(),
            config,
        }
    }

    pub async fn lookup_country(&self, ip: &str) -> Option<String> {
        if ip.is_empty() || ip == "unknown" || ip == "127.0.0.1" || ip == "::1" {
            return None;
        }

        if let Some(country) = self.cache.get(ip).await {
            return Some(country);
        }

        let url = format!("{}/{}?fields=status,countryCode", self.config.api_url, ip);
        let response = match self.client.get(&url).send().await {
            Ok(response) if response.status().is_success() => response,
            Ok(_) | Err(_) => return None,
        };

        let payload: IpApiResponse = response.json().await.ok()?;
        if payload.status != "success" {
            return None;
        }
        let country = payload.country_code?;

        self.cache
            .insert(
                ip.to_string(),
                country.clone(),
                Duration::from_secs(self.config.cache_ttl_secs),
            )
            .await;
        Some(country)
    }

    pub async fn request_geo(&self, req: &HttpRequest) -> RequestGeo {
        let ip = client_ip(req);
        let country = self.lookup_country(&ip).await;
        let tier = pricing::geo_tier_level(country.as_deref());
        let multiplier = pricing::geo_multiplier(country.as_deref());
        RequestGeo {
            ip,
            country,
            tier,
            multiplier,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn local_and_unknown_ips_skip_lookup() {
        let service = GeoService::new(GeoConfig {
            api_url: "http://127.0.0.1:1".to_string(),
            cache_ttl_secs: 60,
        });
        assert_eq!(service.lookup_country("unknown").await, None);
        assert_eq!(service.lookup_country("127.0.0.1").await, None);
        assert_eq!(service.lookup_country("").await, None);
    }

    #[tokio::test]
    async fn unreachable_resolver_degrades_to_none() {
        let service = GeoService::new(GeoConfig {
            api_url: "http://127.0.0.1:1".to_string(),
            cache_ttl_secs: 60,
        });
        assert_eq!(service.lookup_country("203.0.113.10").await, None);
    }
}
