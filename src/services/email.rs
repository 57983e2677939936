use anyhow::{anyhow, Result};
use reqwest::Client;
use serde_json::json;
use std::time::Duration;

use crate::config::EmailConfig;
use crate::models::common::PlanId;

/// Transactional mail through the Resend HTTP API. Callers treat a send
/// failure as a per-item skip, never a batch abort.
#[derive(Clone)]
pub struct EmailService {
    client: Client,
    config: EmailConfig,
}

impl EmailService {
    pub fn new(config: EmailConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { client, config }
    }

    pub fn is_configured(&self) -> bool {
        !self.config.api_key.is_empty()
    }

    pub async fn send(&self, to: &str, subject: &str, html: &str) -> Result<()> {
        if !self.is_configured() {
            return Err(anyhow!("email delivery not configured"));
        }

        let response = self
            .client
            .post(&self.config.api_url)
            .bearer_auth(&self.config.api_key)
            .json(&json!({
                "from": self.config.from,
                "to": [to],
                "subject": subject,
                "html": html,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("email send failed {}: {}", status, body));
        }
        Ok(())
    }
}

/// Subject + body for the abandoned-checkout recovery mail.
pub fn build_checkout_recovery_email(plan: PlanId) -> (String, String) {
    let subject = "Your Fanbroj premium upgrade is waiting".to_string();
    let html = format!(
        "<p>You started a <b>{}</b> upgrade but the payment never arrived. \
         Your checkout is still open — finish it any time from the pricing page.</p>",
        plan
    );
    (subject, html)
}

/// Subject + body for the renewal reminder mail.
pub fn build_renewal_reminder_email(plan: PlanId, days_left: i64) -> (String, String) {
    let subject = if days_left <= 1 {
        "Your Fanbroj premium expires tomorrow".to_string()
    } else {
        format!("Your Fanbroj premium expires in {} days", days_left)
    };
    let html = format!(
        "<p>Your <b>{}</b> plan expires in {} day(s). Renew now to keep \
         watching without interruption.</p>",
        plan, days_left
    );
    (subject, html)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unconfigured_service_refuses_to_send() {
        let service = EmailService::new(EmailConfig {
            api_url: "https://api.resend.com/emails".to_string(),
            api_key: String::new(),
            from: "test@example.com".to_string(),
        });
        assert!(!service.is_configured());
    }

    #[test]
    fn reminder_subject_tracks_urgency() {
        let (tomorrow, _) = build_renewal_reminder_email(PlanId::Monthly, 1);
        assert!(tomorrow.contains("tomorrow"));
        let (five_days, _) = build_renewal_reminder_email(PlanId::Monthly, 5);
        assert!(five_days.contains("5 days"));
    }
}
