//! Geo-based pricing tiers with absolute prices per plan.
//!
//! Tier 0 — Somalia / Djibouti       -> local gateway (EVC/Zaad/Sahal), no card
//! Tier 1 — East Africa / South Asia -> mixed (M-Pesa, local + card)
//! Tier 2 — Middle East / Gulf / EE  -> card / PayPal
//! Tier 3 — Western / high-income    -> card / PayPal, $1 trial eligible
//! Unknown country                   -> Tier 2 pricing, never the Tier 0 base.

use rust_decimal::Decimal;

use crate::models::common::{BillingCycle, NewPlanId};

pub type TierLevel = u8;

pub const DEFAULT_TIER: TierLevel = 2;

struct CountryTier {
    code: &'static str,
    name: &'static str,
    tier: TierLevel,
    /// Multiplier in tenths; kept for the legacy checkout routes.
    multiplier_tenths: i64,
}

const fn ct(code: &'static str, name: &'static str, tier: TierLevel, multiplier_tenths: i64) -> CountryTier {
    CountryTier {
        code,
        name,
        tier,
        multiplier_tenths,
    }
}

static GEO_TIERS: &[CountryTier] = &[
    // Tier 0 — Somalia & Djibouti (local gateway only)
    ct("SO", "Somalia", 0, 10),
    ct("DJ", "Djibouti", 0, 10),
    // Tier 1 — East Africa / South Asia / low-income
    ct("KE", "Kenya", 1, 18),
    ct("ET", "Ethiopia", 1, 15),
    ct("UG", "Uganda", 1, 15),
    ct("TZ", "Tanzania", 1, 15),
    ct("ER", "Eritrea", 1, 13),
    ct("SD", "Sudan", 1, 13),
    ct("SS", "South Sudan", 1, 13),
    ct("RW", "Rwanda", 1, 15),
    ct("BI", "Burundi", 1, 13),
    ct("MG", "Madagascar", 1, 13),
    ct("MZ", "Mozambique", 1, 13),
    ct("ZW", "Zimbabwe", 1, 15),
    ct("ZM", "Zambia", 1, 15),
    ct("MW", "Malawi", 1, 13),
    ct("CM", "Cameroon", 1, 15),
    ct("GH", "Ghana", 1, 18),
    ct("NG", "Nigeria", 1, 18),
    ct("SN", "Senegal", 1, 15),
    ct("CI", "Côte d'Ivoire", 1, 15),
    ct("ML", "Mali", 1, 15),
    ct("CD", "Congo - Kinshasa", 1, 15),
    ct("AO", "Angola", 1, 15),
    ct("GN", "Guinea", 1, 15),
    ct("MR", "Mauritania", 1, 15),
    ct("SZ", "Eswatini", 1, 15),
    ct("GQ", "Equatorial Guinea", 1, 15),
    ct("IN", "India", 1, 18),
    ct("PK", "Pakistan", 1, 15),
    ct("BD", "Bangladesh", 1, 15),
    ct("NP", "Nepal", 1, 13),
    ct("PH", "Philippines", 1, 18),
    ct("ID", "Indonesia", 1, 18),
    ct("AF", "Afghanistan", 1, 15),
    ct("MM", "Myanmar", 1, 15),
    ct("LA", "Laos", 1, 15),
    ct("KH", "Cambodia", 1, 15),
    ct("BT", "Bhutan", 1, 15),
    ct("ZA", "South Africa", 1, 20),
    // Tier 2 — Middle East / Gulf / Eastern Europe / SE Asia / LatAm
    ct("AE", "UAE", 2, 25),
    ct("SA", "Saudi Arabia", 2, 25),
    ct("QA", "Qatar", 2, 25),
    ct("KW", "Kuwait", 2, 25),
    ct("BH", "Bahrain", 2, 25),
    ct("OM", "Oman", 2, 25),
    ct("YE", "Yemen", 2, 15),
    ct("IR", "Iran", 2, 20),
    ct("JO", "Jordan", 2, 20),
    ct("LB", "Lebanon", 2, 20),
    ct("IQ", "Iraq", 2, 20),
    ct("EG", "Egypt", 2, 18),
    ct("MA", "Morocco", 2, 20),
    ct("DZ", "Algeria", 2, 20),
    ct("TN", "Tunisia", 2, 20),
    ct("LY", "Libya", 2, 20),
    ct("TR", "Turkey", 2, 20),
    ct("LK", "Sri Lanka", 2, 20),
    ct("VN", "Vietnam", 2, 20),
    ct("MY", "Malaysia", 2, 25),
    ct("SG", "Singapore", 2, 25),
    ct("TH", "Thailand", 2, 20),
    ct("HK", "Hong Kong", 2, 25),
    ct("CN", "China", 2, 25),
    ct("TW", "Taiwan", 2, 25),
    ct("MX", "Mexico", 2, 20),
    ct("BR", "Brazil", 2, 20),
    ct("AR", "Argentina", 2, 20),
    ct("CL", "Chile", 2, 20),
    ct("CO", "Colombia", 2, 20),
    ct("PE", "Peru", 2, 20),
    ct("RU", "Russia", 2, 20),
    ct("BY", "Belarus", 2, 20),
    ct("KZ", "Kazakhstan", 2, 20),
    ct("KG", "Kyrgyzstan", 2, 20),
    ct("UZ", "Uzbekistan", 2, 20),
    ct("AZ", "Azerbaijan", 2, 20),
    ct("GE", "Georgia", 2, 20),
    ct("AM", "Armenia", 2, 20),
    ct("VE", "Venezuela", 2, 20),
    ct("YT", "Mayotte", 2, 20),
    ct("RE", "Réunion", 2, 20),
    ct("JP", "Japan", 2, 25),
    ct("KR", "South Korea", 2, 25),
    ct("RO", "Romania", 2, 20),
    ct("BG", "Bulgaria", 2, 20),
    ct("RS", "Serbia", 2, 20),
    ct("UA", "Ukraine", 2, 20),
    ct("AL", "Albania", 2, 20),
    // Tier 3 — Western / high-income (diaspora, $1 trial eligible)
    ct("US", "USA", 3, 30),
    ct("CA", "Canada", 3, 30),
    ct("GB", "United Kingdom", 3, 30),
    ct("SE", "Sweden", 3, 30),
    ct("NO", "Norway", 3, 30),
    ct("DK", "Denmark", 3, 30),
    ct("FI", "Finland", 3, 30),
    ct("DE", "Germany", 3, 30),
    ct("NL", "Netherlands", 3, 30),
    ct("FR", "France", 3, 30),
    ct("CH", "Switzerland", 3, 30),
    ct("AT", "Austria", 3, 30),
    ct("BE", "Belgium", 3, 30),
    ct("LU", "Luxembourg", 3, 30),
    ct("AU", "Australia", 3, 30),
    ct("NZ", "New Zealand", 3, 30),
    ct("IE", "Ireland", 3, 30),
    ct("IS", "Iceland", 3, 30),
    ct("IL", "Israel", 3, 30),
    ct("IT", "Italy", 3, 25),
    ct("ES", "Spain", 3, 25),
    ct("PT", "Portugal", 3, 25),
    ct("PL", "Poland", 3, 25),
    ct("GR", "Greece", 3, 25),
    ct("CZ", "Czech Republic", 3, 25),
    ct("HU", "Hungary", 3, 25),
    ct("SK", "Slovakia", 3, 25),
    ct("HR", "Croatia", 3, 25),
    ct("SI", "Slovenia", 3, 25),
    ct("LV", "Latvia", 3, 25),
    ct("LI", "Liechtenstein", 3, 30),
    ct("CY", "Cyprus", 3, 25),
    ct("MT", "Malta", 3, 25),
    ct("MC", "Monaco", 3, 30),
    ct("AD", "Andorra", 3, 30),
    ct("SM", "San Marino", 3, 30),
    ct("VA", "Vatican City", 3, 30),
];

fn lookup(country: Option<&str>) -> Option<&'static CountryTier> {
    let code = country?.trim().to_uppercase();
    GEO_TIERS.iter().find(|entry| entry.code == code)
}

pub fn default_multiplier() -> Decimal {
    Decimal::new(25, 1)
}

pub fn geo_tier_level(country: Option<&str>) -> TierLevel {
    lookup(country).map_or(DEFAULT_TIER, |entry| entry.tier)
}

pub fn geo_multiplier(country: Option<&str>) -> Decimal {
    lookup(country).map_or_else(default_multiplier, |entry| {
        Decimal::new(entry.multiplier_tenths, 1)
    })
}

pub fn geo_country_name(country: Option<&str>) -> Option<&'static str> {
    lookup(country).map(|entry| entry.name)
}

/// Whether this tier qualifies for the $1 / 3-day card trial.
pub fn is_tier_trial_eligible(tier: TierLevel) -> bool {
    tier >= 2
}

/// Absolute display prices in USD cents per plan / cycle / tier. Card-fee
/// padding is already baked into the Tier 2 and 3 columns.
fn tier_price_cents(plan: NewPlanId, cycle: BillingCycle, tier: TierLevel) -> i64 {
    let column = tier.min(3) as usize;
    let row: [i64; 4] = match (plan, cycle) {
        (NewPlanId::Starter, BillingCycle::Monthly) => [50, 100, 150, 200],
        (NewPlanId::Starter, BillingCycle::Yearly) => [50, 100, 150, 200],
        (NewPlanId::Basic, BillingCycle::Monthly) => [100, 200, 300, 400],
        (NewPlanId::Basic, BillingCycle::Yearly) => [900, 1700, 2600, 3600],
        (NewPlanId::Pro, BillingCycle::Monthly) => [250, 400, 600, 800],
        (NewPlanId::Pro, BillingCycle::Yearly) => [2000, 3500, 5200, 7200],
        (NewPlanId::Elite, BillingCycle::Monthly) => [350, 600, 900, 1200],
        (NewPlanId::Elite, BillingCycle::Yearly) => [3000, 5000, 8000, 10000],
    };
    row[column]
}

pub fn tier_price(plan: NewPlanId, cycle: BillingCycle, tier: TierLevel) -> Decimal {
    Decimal::new(tier_price_cents(plan, cycle, tier), 2)
}

/// Effective per-month cost when paying yearly.
pub fn yearly_monthly_equivalent(plan: NewPlanId, tier: TierLevel) -> Decimal {
    (tier_price(plan, BillingCycle::Yearly, tier) / Decimal::from(12)).round_dp(2)
}

/// Discount of the yearly price versus paying monthly twelve times.
pub fn yearly_saving_percent(plan: NewPlanId, tier: TierLevel) -> i64 {
    let monthly12 = tier_price_cents(plan, BillingCycle::Monthly, tier) * 12;
    if monthly12 == 0 {
        return 0;
    }
    let yearly = tier_price_cents(plan, BillingCycle::Yearly, tier);
    (((monthly12 - yearly) as f64 / monthly12 as f64) * 100.0).round() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_countries_map_to_their_tier() {
        assert_eq!(geo_tier_level(Some("SO")), 0);
        assert_eq!(geo_tier_level(Some("ke")), 1);
        assert_eq!(geo_tier_level(Some("AE")), 2);
        assert_eq!(geo_tier_level(Some("US")), 3);
        assert_eq!(geo_multiplier(Some("KE")), Decimal::new(18, 1));
        assert_eq!(geo_country_name(Some("dj")), Some("Djibouti"));
    }

    #[test]
    fn unknown_countries_fall_back_to_tier_two() {
        assert_eq!(geo_tier_level(Some("XX")), DEFAULT_TIER);
        assert_eq!(geo_tier_level(None), DEFAULT_TIER);
        assert_eq!(geo_multiplier(None), Decimal::new(25, 1));
        assert_eq!(geo_country_name(Some("XX")), None);
    }

    #[test]
    fn tier_prices_are_monotonic_across_tiers() {
        for cycle in [BillingCycle::Monthly, BillingCycle::Yearly] {
            for plan in [
                NewPlanId::Starter,
                NewPlanId::Basic,
                NewPlanId::Pro,
                NewPlanId::Elite,
            ] {
                for tier in 0..3u8 {
                    assert!(
                        tier_price(plan, cycle, tier) <= tier_price(plan, cycle, tier + 1),
                        "{:?}/{:?} tier {} should not out-price tier {}",
                        plan,
                        cycle,
                        tier,
                        tier + 1
                    );
                }
            }
        }
    }

    #[test]
    fn yearly_helpers() {
        assert_eq!(
            yearly_monthly_equivalent(NewPlanId::Elite, 3),
            Decimal::new(833, 2)
        );
        // Pro tier 3: 12 x $8 = $96 monthly vs $72 yearly -> 25% saving.
        assert_eq!(yearly_saving_percent(NewPlanId::Pro, 3), 25);
    }

    #[test]
    fn trial_eligibility_starts_at_tier_two() {
        assert!(!is_tier_trial_eligible(0));
        assert!(!is_tier_trial_eligible(1));
        assert!(is_tier_trial_eligible(2));
        assert!(is_tier_trial_eligible(3));
    }
}
