use actix_web::HttpRequest;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use crate::models::common::now_ms;

#[derive(Debug, Clone, Copy)]
pub struct RateDecision {
    pub allowed: bool,
    pub remaining: u32,
    pub reset_at: i64,
}

/// Pluggable rate limiting. The in-process implementation below is correct
/// for a single instance; a shared-storage implementation can be swapped in
/// behind this trait without touching the handlers.
pub trait RateLimiter: Send + Sync {
    fn check(&self, key: &str, max: u32, window: Duration) -> RateDecision;
}

struct WindowRecord {
    count: u32,
    reset_at: i64,
}

/// Fixed-window counter keyed by caller-supplied strings (typically
/// "route:ip"). Stale windows are dropped lazily on access.
pub struct FixedWindowLimiter {
    store: Mutex<HashMap<String, WindowRecord>>,
}

impl FixedWindowLimiter {
    pub fn new() -> Self {
        Self {
            store: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for FixedWindowLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter for FixedWindowLimiter {
    fn check(&self, key: &str, max: u32, window: Duration) -> RateDecision {
        let now = now_ms();
        let mut store = self.store.lock().unwrap();

        // Opportunistic purge keeps the map bounded without a sweeper task.
        if store.len() > 10_000 {
            store.retain(|_, record| record.reset_at > now);
        }

        if let Some(record) = store.get_mut(key) {
            if now <= record.reset_at {
                if record.count >= max {
                    return RateDecision {
                        allowed: false,
                        remaining: 0,
                        reset_at: record.reset_at,
                    };
                }
                record.count += 1;
                return RateDecision {
                    allowed: true,
                    remaining: max - record.count,
                    reset_at: record.reset_at,
                };
            }
        }

        let reset_at = now + window.as_millis() as i64;
        store.insert(key.to_string(), WindowRecord { count: 1, reset_at });
        RateDecision {
            allowed: true,
            remaining: max.saturating_sub(1),
            reset_at,
        }
    }
}

/// Real client IP behind the reverse proxy.
pub fn client_ip(req: &HttpRequest) -> String {
    if let Some(forwarded) = req.headers().get("x-forwarded-for") {
        if let Ok(value) = forwarded.to_str() {
            if let Some(first) = value.split(',').next() {
                let trimmed = first.trim();
                if !trimmed.is_empty() {
                    return trimmed.to_string();
                }
            }
        }
    }
    if let Some(real_ip) = req.headers().get("x-real-ip") {
        if let Ok(value) = real_ip.to_str() {
            return value.trim().to_string();
        }
    }
    req.peer_addr()
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_max_within_window() {
        let limiter = FixedWindowLimiter::new();
        for i in 0..3 {
            let decision = limiter.check("redeem:1.2.3.4", 3, Duration::from_secs(60));
            assert!(decision.allowed, "call {} should pass", i);
        }
        let decision = limiter.check("redeem:1.2.3.4", 3, Duration::from_secs(60));
        assert!(!decision.allowed);
        assert_eq!(decision.remaining, 0);
    }

    #[test]
    fn separate_keys_do_not_interfere() {
        let limiter = FixedWindowLimiter::new();
        assert!(limiter.check("a", 1, Duration::from_secs(60)).allowed);
        assert!(!limiter.check("a", 1, Duration::from_secs(60)).allowed);
        assert!(limiter.check("b", 1, Duration::from_secs(60)).allowed);
    }

    #[test]
    fn window_reset_restores_budget() {
        let limiter = FixedWindowLimiter::new();
        assert!(limiter.check("k", 1, Duration::from_millis(20)).allowed);
        assert!(!limiter.check("k", 1, Duration::from_millis(20)).allowed);
        std::thread::sleep(Duration::from_millis(30));
        assert!(limiter.check("k", 1, Duration::from_millis(20)).allowed);
    }
}
