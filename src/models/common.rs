use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::config::PlanPricing;

/// Epoch milliseconds. All ledger timestamps use this representation.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

pub const DAY_MS: i64 = 24 * 60 * 60 * 1000;

/// Legacy plan identifiers. Every ledger and subscription row carries one of
/// these; the marketing-facing plan cards map onto them via `NewPlanId`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PlanId {
    Match,
    Weekly,
    Monthly,
    Yearly,
}

impl PlanId {
    pub fn duration_days(&self) -> i64 {
        match self {
            PlanId::Match => 1,
            PlanId::Weekly => 7,
            PlanId::Monthly => 30,
            PlanId::Yearly => 365,
        }
    }

    pub fn max_devices(&self) -> u32 {
        match self {
            PlanId::Match => 1,
            PlanId::Weekly => 2,
            PlanId::Monthly => 3,
            PlanId::Yearly => 5,
        }
    }

    pub fn base_price(&self, plans: &PlanPricing) -> Decimal {
        match self {
            PlanId::Match => plans.price_match,
            PlanId::Weekly => plans.price_weekly,
            PlanId::Monthly => plans.price_monthly,
            PlanId::Yearly => plans.price_yearly,
        }
    }

    /// Accepts both legacy ids and the new card names used by the pricing
    /// page and the external billing system.
    pub fn parse(raw: &str) -> Option<PlanId> {
        match raw.trim().to_lowercase().as_str() {
            "match" | "starter" => Some(PlanId::Match),
            "weekly" | "basic" => Some(PlanId::Weekly),
            "monthly" | "pro" => Some(PlanId::Monthly),
            "yearly" | "elite" => Some(PlanId::Yearly),
            _ => None,
        }
    }
}

impl std::fmt::Display for PlanId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlanId::Match => write!(f, "match"),
            PlanId::Weekly => write!(f, "weekly"),
            PlanId::Monthly => write!(f, "monthly"),
            PlanId::Yearly => write!(f, "yearly"),
        }
    }
}

/// Plan ids used by the pricing page.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NewPlanId {
    Starter,
    Basic,
    Pro,
    Elite,
}

impl NewPlanId {
    pub fn legacy(&self) -> PlanId {
        match self {
            NewPlanId::Starter => PlanId::Match,
            NewPlanId::Basic => PlanId::Weekly,
            NewPlanId::Pro => PlanId::Monthly,
            NewPlanId::Elite => PlanId::Yearly,
        }
    }

    /// Advertised access window for monthly billing.
    pub fn duration_days(&self) -> i64 {
        match self {
            NewPlanId::Starter => 3,
            NewPlanId::Basic => 7,
            NewPlanId::Pro => 30,
            NewPlanId::Elite => 365,
        }
    }

    pub fn parse(raw: &str) -> Option<NewPlanId> {
        match raw.trim().to_lowercase().as_str() {
            "starter" => Some(NewPlanId::Starter),
            "basic" => Some(NewPlanId::Basic),
            "pro" => Some(NewPlanId::Pro),
            "elite" => Some(NewPlanId::Elite),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BillingCycle {
    Monthly,
    Yearly,
}

impl BillingCycle {
    pub fn parse(raw: &str) -> Option<BillingCycle> {
        match raw.trim().to_lowercase().as_str() {
            "monthly" => Some(BillingCycle::Monthly),
            "yearly" => Some(BillingCycle::Yearly),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaginationQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

impl PaginationQuery {
    pub fn page(&self) -> u32 {
        self.page.unwrap_or(1).max(1)
    }

    pub fn limit(&self) -> u32 {
        self.limit.unwrap_or(20).clamp(1, 100)
    }
}

#[derive(Debug, Serialize)]
pub struct PaginatedResponse<T> {
    pub data: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub limit: u32,
    pub total_pages: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_parse_accepts_both_namings() {
        assert_eq!(PlanId::parse("pro"), Some(PlanId::Monthly));
        assert_eq!(PlanId::parse("MONTHLY"), Some(PlanId::Monthly));
        assert_eq!(PlanId::parse("starter"), Some(PlanId::Match));
        assert_eq!(PlanId::parse("gold"), None);
    }

    #[test]
    fn plan_duration_and_quota_tables() {
        assert_eq!(PlanId::Yearly.duration_days(), 365);
        assert_eq!(PlanId::Yearly.max_devices(), 5);
        assert_eq!(PlanId::Match.duration_days(), 1);
        assert_eq!(NewPlanId::Starter.duration_days(), 3);
    }

    #[test]
    fn pagination_clamps_limits() {
        let q = PaginationQuery {
            page: Some(0),
            limit: Some(500),
        };
        assert_eq!(q.page(), 1);
        assert_eq!(q.limit(), 100);
    }
}
