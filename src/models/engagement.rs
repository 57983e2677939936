use serde::{Deserialize, Serialize};

use crate::models::common::now_ms;
use crate::models::user::new_record_id;

/// List buckets a title can sit in. Historical rows carried free-form
/// variants ("favorites", "watch-later", ...), so deserialization is
/// lenient: anything unrecognized collapses to the default list.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MyListType {
    Mylist,
    Favourites,
    WatchLater,
}

pub fn normalize_my_list_type(raw: Option<&str>) -> MyListType {
    match raw.unwrap_or("").trim().to_lowercase().as_str() {
        "favourite" | "favourites" | "favorite" | "favorites" => MyListType::Favourites,
        "watchlater" | "watch-later" | "watch_later" | "later" => MyListType::WatchLater,
        _ => MyListType::Mylist,
    }
}

impl<'de> serde::Deserialize<'de> for MyListType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(normalize_my_list_type(Some(&raw)))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MyListEntry {
    pub entry_id: String,
    pub user_id: String,
    pub list_type: MyListType,
    pub content_type: String,
    pub content_id: String,
    pub added_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchProgress {
    pub progress_id: String,
    pub user_id: String,
    pub content_type: String,
    pub content_id: String,
    pub series_id: Option<String>,
    pub progress_seconds: i64,
    pub duration_seconds: i64,
    pub is_finished: bool,
    pub updated_at: i64,
}

/// Funnel / delivery log. Doubles as the cron de-duplication record: an
/// event row with a matching order or subscription key means "already sent".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionEvent {
    pub event_id: String,
    pub event_name: String,
    pub user_id: Option<String>,
    pub device_id: Option<String>,
    pub page_type: String,
    pub plan: Option<String>,
    pub source: String,
    pub order_id: Option<String>,
    pub subscription_id: Option<String>,
    pub days_left: Option<i64>,
    pub metadata: Option<serde_json::Value>,
    /// Calendar day (YYYY-MM-DD) for dashboard grouping.
    pub date: String,
    pub created_at: i64,
}

impl ConversionEvent {
    pub fn new(event_name: impl Into<String>, page_type: impl Into<String>, source: impl Into<String>) -> Self {
        let now = now_ms();
        Self {
            event_id: new_record_id(),
            event_name: event_name.into(),
            user_id: None,
            device_id: None,
            page_type: page_type.into(),
            plan: None,
            source: source.into(),
            order_id: None,
            subscription_id: None,
            days_left: None,
            metadata: None,
            date: chrono::Utc::now().format("%Y-%m-%d").to_string(),
            created_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_type_aliases_collapse() {
        assert_eq!(normalize_my_list_type(Some("favorites")), MyListType::Favourites);
        assert_eq!(normalize_my_list_type(Some("watch-later")), MyListType::WatchLater);
        assert_eq!(normalize_my_list_type(Some("LATER")), MyListType::WatchLater);
        assert_eq!(normalize_my_list_type(Some("")), MyListType::Mylist);
        assert_eq!(normalize_my_list_type(None), MyListType::Mylist);
    }

    #[test]
    fn legacy_list_rows_deserialize_leniently() {
        let favourites: MyListType = serde_json::from_str("\"favorites\"").unwrap();
        assert_eq!(favourites, MyListType::Favourites);
        let default: MyListType = serde_json::from_str("\"anything\"").unwrap();
        assert_eq!(default, MyListType::Mylist);
    }

    #[test]
    fn event_carries_calendar_date() {
        let event = ConversionEvent::new("purchase_started", "pricing", "checkout_api");
        assert_eq!(event.date.len(), 10);
        assert!(event.order_id.is_none());
    }
}
