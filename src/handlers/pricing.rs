use actix_web::web::{Data, Query};
use actix_web::{get, HttpRequest, HttpResponse, Result};
use serde::Deserialize;
use serde_json::json;

use crate::models::common::{BillingCycle, NewPlanId};
use crate::services::geo::GeoService;
use crate::services::pricing;

#[derive(Debug, Deserialize)]
pub struct PricingQuery {
    pub plan: Option<String>,
    pub cycle: Option<String>,
}

// GET / — geo-resolved pricing for the caller, optionally quoting one plan
#[get("")]
pub async fn quote(
    req: HttpRequest,
    geo: Data<GeoService>,
    query: Query<PricingQuery>,
) -> Result<HttpResponse> {
    let request_geo = geo.request_geo(&req).await;
    let tier = request_geo.tier;

    let mut body = json!({
        "country": request_geo.country,
        "country_name": pricing::geo_country_name(request_geo.country.as_deref()),
        "tier": tier,
        "multiplier": request_geo.multiplier,
        "trial_eligible": pricing::is_tier_trial_eligible(tier),
    });

    if let Some(plan_raw) = &query.plan {
        let Some(plan) = NewPlanId::parse(plan_raw) else {
            return Ok(HttpResponse::BadRequest().json(json!({ "error": "Invalid plan" })));
        };
        let cycle = match &query.cycle {
            Some(cycle_raw) => match BillingCycle::parse(cycle_raw) {
                Some(cycle) => cycle,
                None => {
                    return Ok(
                        HttpResponse::BadRequest().json(json!({ "error": "Invalid cycle" }))
                    )
                }
            },
            None => BillingCycle::Monthly,
        };

        body["quote"] = json!({
            "plan": plan,
            "cycle": cycle,
            "price": pricing::tier_price(plan, cycle, tier),
            "yearly_monthly_equivalent": pricing::yearly_monthly_equivalent(plan, tier),
            "yearly_saving_percent": pricing::yearly_saving_percent(plan, tier),
            "duration_days": plan.duration_days(),
            "legacy_plan": plan.legacy(),
        });
    }

    Ok(HttpResponse::Ok().json(body))
}
