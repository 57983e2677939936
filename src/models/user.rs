use once_cell::sync::Lazy;
use rand::Rng;
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::models::common::now_ms;

static USERNAME_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9_]{3,20}$").expect("username regex"));

pub fn is_valid_username(raw: &str) -> bool {
    USERNAME_REGEX.is_match(raw)
}

pub fn normalize_email(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// Record ids are UUID strings at the storage boundary; handlers validate
/// the shape at the API edge.
pub fn new_record_id() -> String {
    Uuid::new_v4().to_string()
}

pub fn is_valid_record_id(raw: &str) -> bool {
    Uuid::parse_str(raw).is_ok()
}

/// Identity anchor. Accounts start anonymous (device-only) and may later be
/// claimed with an email + password via signup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub user_id: String,
    pub email: Option<String>,
    pub email_lower: Option<String>,
    pub username: Option<String>,
    pub username_lower: Option<String>,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    /// Never leaves the service: responses go through [`UserView`].
    pub password_hash: Option<String>,
    pub referral_code: String,
    pub referred_by: Option<String>,
    pub referral_count: i64,
    pub is_trial_used: bool,
    pub trial_expires_at: Option<i64>,
    pub created_at: i64,
}

impl User {
    pub fn new_anonymous() -> Self {
        Self {
            user_id: new_record_id(),
            email: None,
            email_lower: None,
            username: None,
            username_lower: None,
            display_name: None,
            avatar_url: None,
            password_hash: None,
            referral_code: generate_referral_code(),
            referred_by: None,
            referral_count: 0,
            is_trial_used: false,
            trial_expires_at: None,
            created_at: now_ms(),
        }
    }
}

/// 8-char uppercase hex, same shape the web client has always handed out.
pub fn generate_referral_code() -> String {
    let bytes: [u8; 4] = rand::thread_rng().gen();
    hex::encode(bytes).to_uppercase()
}

/// A fingerprinted client. Belongs to exactly one user; rebinding to another
/// user triggers an identity merge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub device_id: String,
    pub user_id: String,
    pub user_agent: Option<String>,
    pub last_seen_at: i64,
    pub created_at: i64,
}

impl Device {
    pub fn new(device_id: String, user_id: String, user_agent: Option<String>) -> Self {
        let now = now_ms();
        Self {
            device_id,
            user_id,
            user_agent,
            last_seen_at: now,
            created_at: now,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSession {
    pub session_id: String,
    pub user_id: String,
    pub token_hash: String,
    pub device_id: Option<String>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: i64,
    pub last_seen_at: i64,
    pub expires_at: i64,
}

#[derive(Debug, Deserialize, Validate)]
pub struct RegisterDeviceRequest {
    #[validate(length(min = 6, max = 128))]
    pub device_id: String,
    pub user_agent: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct SignupRequest {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 6, max = 128))]
    pub password: String,
    #[validate(length(min = 6, max = 128))]
    pub device_id: String,
    pub user_agent: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 1))]
    pub password: String,
    pub device_id: Option<String>,
    pub user_agent: Option<String>,
}

/// User shape returned to clients: credential material stripped.
#[derive(Debug, Serialize)]
pub struct UserView {
    pub user_id: String,
    pub email: Option<String>,
    pub username: Option<String>,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub referral_code: String,
    pub referral_count: i64,
    pub is_trial_used: bool,
    pub created_at: i64,
}

impl From<User> for UserView {
    fn from(user: User) -> Self {
        Self {
            user_id: user.user_id,
            email: user.email,
            username: user.username,
            display_name: user.display_name,
            avatar_url: user.avatar_url,
            referral_code: user.referral_code,
            referral_count: user.referral_count,
            is_trial_used: user.is_trial_used,
            created_at: user.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anonymous_user_gets_referral_code() {
        let user = User::new_anonymous();
        assert_eq!(user.referral_code.len(), 8);
        assert!(is_valid_record_id(&user.user_id));
        assert!(user.email.is_none());
        assert!(!user.is_trial_used);
    }

    #[test]
    fn username_rules() {
        assert!(is_valid_username("abdi_99"));
        assert!(!is_valid_username("ab"));
        assert!(!is_valid_username("has space"));
        assert!(!is_valid_username("way-too-long-for-a-username-here"));
    }

    #[test]
    fn email_normalization() {
        assert_eq!(normalize_email("  User@Example.COM "), "user@example.com");
    }

    #[test]
    fn record_id_validation() {
        assert!(is_valid_record_id(&new_record_id()));
        assert!(!is_valid_record_id("not-a-uuid"));
    }
}
