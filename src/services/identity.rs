use serde::Serialize;
use serde_json::json;

use crate::errors::DbResult;
use crate::models::{
    common::now_ms,
    engagement::{MyListEntry, WatchProgress},
    subscription::SubscriptionStatus,
    user::{new_record_id, Device, User},
};
use crate::services::database::DatabaseService;

#[derive(Debug)]
pub struct DeviceUser {
    pub user: User,
    pub device: Device,
    pub is_new: bool,
}

/// Device-fingerprint identity resolution: a known device returns its user,
/// an unknown one gets a fresh anonymous account. Stale device rows whose
/// user vanished are dropped and recreated.
pub async fn get_or_create_device_user(
    db: &DatabaseService,
    device_id: &str,
    user_agent: Option<&str>,
) -> DbResult<DeviceUser> {
    if let Some(device) = db.get_device(device_id).await? {
        db.touch_device(device_id, user_agent).await?;
        if let Some(user) = db.get_user(&device.user_id).await? {
            return Ok(DeviceUser {
                user,
                device,
                is_new: false,
            });
        }
        db.delete_device(device_id).await?;
    }

    let user = db.create_user(&User::new_anonymous()).await?;
    let device = db
        .upsert_device(&Device::new(
            device_id.to_string(),
            user.user_id.clone(),
            user_agent.map(|s| s.to_string()),
        ))
        .await?;

    log::info!("created user {} for device {}", user.user_id, device_id);
    Ok(DeviceUser {
        user,
        device,
        is_new: true,
    })
}

#[derive(Debug, Default, Serialize)]
pub struct MergeSummary {
    pub merged: bool,
    pub moved_my_list: usize,
    pub moved_watch_progress: usize,
    pub moved_payments: usize,
    pub moved_redemptions: usize,
    pub moved_subscription: bool,
}

/// Folds one account's history into another when a shared device switches
/// owners. List rows keep the newest `added_at`, watch progress keeps the
/// furthest position, and the longer-lived active subscription survives
/// (the loser is expired, never deleted).
pub async fn merge_user_identity(
    db: &DatabaseService,
    from: &str,
    to: &str,
) -> DbResult<MergeSummary> {
    if from == to {
        return Ok(MergeSummary::default());
    }

    let mut summary = MergeSummary {
        merged: true,
        ..MergeSummary::default()
    };

    for row in db.my_list_for_user(from).await? {
        if row.content_type.is_empty() || row.content_id.is_empty() {
            continue;
        }
        match db
            .find_my_list_entry(to, row.list_type, &row.content_type, &row.content_id)
            .await?
        {
            None => {
                let entry = MyListEntry {
                    entry_id: new_record_id(),
                    user_id: to.to_string(),
                    list_type: row.list_type,
                    content_type: row.content_type.clone(),
                    content_id: row.content_id.clone(),
                    added_at: row.added_at,
                };
                db.create_my_list_entry(&entry).await?;
                summary.moved_my_list += 1;
            }
            Some(existing) if row.added_at > existing.added_at => {
                db.merge_my_list_entry(&existing.entry_id, json!({ "added_at": row.added_at }))
                    .await?;
            }
            Some(_) => {}
        }
    }
    db.delete_my_list_for_user(from).await?;

    for row in db.watch_progress_for_user(from).await? {
        if row.content_type.is_empty() || row.content_id.is_empty() {
            continue;
        }
        match db
            .find_watch_progress(to, &row.content_type, &row.content_id)
            .await?
        {
            None => {
                let progress = WatchProgress {
                    progress_id: new_record_id(),
                    user_id: to.to_string(),
                    content_type: row.content_type.clone(),
                    content_id: row.content_id.clone(),
                    series_id: row.series_id.clone(),
                    progress_seconds: row.progress_seconds,
                    duration_seconds: row.duration_seconds,
                    is_finished: row.is_finished,
                    updated_at: row.updated_at,
                };
                db.create_watch_progress(&progress).await?;
                summary.moved_watch_progress += 1;
            }
            Some(existing) => {
                let patch = json!({
                    "progress_seconds": existing.progress_seconds.max(row.progress_seconds),
                    "duration_seconds": existing.duration_seconds.max(row.duration_seconds),
                    "updated_at": existing.updated_at.max(row.updated_at),
                    "is_finished": existing.is_finished || row.is_finished,
                    "series_id": existing.series_id.clone().or(row.series_id.clone()),
                });
                db.merge_watch_progress(&existing.progress_id, patch).await?;
            }
        }
    }
    db.delete_watch_progress_for_user(from).await?;

    let source_sub = db.latest_active_subscription(from).await?;
    let target_sub = db.latest_active_subscription(to).await?;
    if let Some(source) = source_sub {
        let source_expires = source.expires_at;
        let target_expires = target_sub.as_ref().map(|sub| sub.expires_at).unwrap_or(0);

        if target_sub.is_none() || source_expires > target_expires {
            if let Some(target) = target_sub {
                db.set_subscription_status(&target.subscription_id, SubscriptionStatus::Expired)
                    .await?;
            }
            db.reassign_subscription(&source.subscription_id, to).await?;
            summary.moved_subscription = true;
        } else {
            db.set_subscription_status(&source.subscription_id, SubscriptionStatus::Expired)
                .await?;
        }
    }

    summary.moved_payments = db.reassign_payments(from, to).await?;
    summary.moved_redemptions = db.reassign_redemptions(from, to).await?;

    log::info!(
        "merged user {} into {} (lists: {}, progress: {}, payments: {}, sub moved: {})",
        from,
        to,
        summary.moved_my_list,
        summary.moved_watch_progress,
        summary.moved_payments,
        summary.moved_subscription
    );
    Ok(summary)
}

/// Rebind a device to its new owner after a merge. Last login wins.
pub async fn rebind_device(
    db: &DatabaseService,
    device_id: &str,
    user_id: &str,
    user_agent: Option<&str>,
) -> DbResult<Device> {
    let now = now_ms();
    let created_at = db
        .get_device(device_id)
        .await?
        .map(|device| device.created_at)
        .unwrap_or(now);

    db.upsert_device(&Device {
        device_id: device_id.to_string(),
        user_id: user_id.to_string(),
        user_agent: user_agent.map(|s| s.to_string()),
        last_seen_at: now,
        created_at,
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::common::{PlanId, DAY_MS};
    use crate::models::engagement::MyListType;
    use crate::models::subscription::Subscription;

    async fn test_db() -> DatabaseService {
        DatabaseService::new("memory://").await.unwrap()
    }

    fn list_entry(user_id: &str, content_id: &str, added_at: i64) -> MyListEntry {
        MyListEntry {
            entry_id: new_record_id(),
            user_id: user_id.to_string(),
            list_type: MyListType::Mylist,
            content_type: "movie".to_string(),
            content_id: content_id.to_string(),
            added_at,
        }
    }

    #[tokio::test]
    async fn unknown_device_creates_an_anonymous_user() {
        let db = test_db().await;
        let first = get_or_create_device_user(&db, "device-abc-123", Some("ua"))
            .await
            .unwrap();
        assert!(first.is_new);

        let second = get_or_create_device_user(&db, "device-abc-123", None)
            .await
            .unwrap();
        assert!(!second.is_new);
        assert_eq!(first.user.user_id, second.user.user_id);
    }

    #[tokio::test]
    async fn merge_is_a_noop_for_same_user() {
        let db = test_db().await;
        let user = new_record_id();
        let summary = merge_user_identity(&db, &user, &user).await.unwrap();
        assert!(!summary.merged);
    }

    #[tokio::test]
    async fn merge_moves_lists_with_newest_wins() {
        let db = test_db().await;
        let from = new_record_id();
        let to = new_record_id();

        db.create_my_list_entry(&list_entry(&from, "movie-1", 200)).await.unwrap();
        db.create_my_list_entry(&list_entry(&from, "movie-2", 100)).await.unwrap();
        db.create_my_list_entry(&list_entry(&to, "movie-1", 50)).await.unwrap();

        let summary = merge_user_identity(&db, &from, &to).await.unwrap();
        assert!(summary.merged);
        assert_eq!(summary.moved_my_list, 1); // movie-2 moved, movie-1 merged

        let rows = db.my_list_for_user(&to).await.unwrap();
        assert_eq!(rows.len(), 2);
        let movie1 = rows.iter().find(|r| r.content_id == "movie-1").unwrap();
        assert_eq!(movie1.added_at, 200);

        assert!(db.my_list_for_user(&from).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn merge_keeps_furthest_watch_progress() {
        let db = test_db().await;
        let from = new_record_id();
        let to = new_record_id();

        db.create_watch_progress(&WatchProgress {
            progress_id: new_record_id(),
            user_id: from.clone(),
            content_type: "movie".to_string(),
            content_id: "movie-1".to_string(),
            series_id: None,
            progress_seconds: 900,
            duration_seconds: 5400,
            is_finished: false,
            updated_at: 300,
        })
        .await
        .unwrap();
        db.create_watch_progress(&WatchProgress {
            progress_id: new_record_id(),
            user_id: to.clone(),
            content_type: "movie".to_string(),
            content_id: "movie-1".to_string(),
            series_id: None,
            progress_seconds: 120,
            duration_seconds: 5400,
            is_finished: false,
            updated_at: 100,
        })
        .await
        .unwrap();

        merge_user_identity(&db, &from, &to).await.unwrap();

        let rows = db.watch_progress_for_user(&to).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].progress_seconds, 900);
        assert_eq!(rows[0].updated_at, 300);
    }

    #[tokio::test]
    async fn merge_keeps_the_longer_lived_subscription() {
        let db = test_db().await;
        let from = new_record_id();
        let to = new_record_id();

        let mut source = Subscription::new_active(from.clone(), PlanId::Yearly, 365, 5, None);
        source.expires_at = now_ms() + 300 * DAY_MS;
        db.create_active_subscription(&source).await.unwrap();

        let mut target = Subscription::new_active(to.clone(), PlanId::Monthly, 30, 3, None);
        target.expires_at = now_ms() + 10 * DAY_MS;
        db.create_active_subscription(&target).await.unwrap();

        let summary = merge_user_identity(&db, &from, &to).await.unwrap();
        assert!(summary.moved_subscription);

        let active = db
            .active_subscription_for_user(&to, now_ms())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(active.subscription_id, source.subscription_id);
        assert_eq!(db.count_active_unexpired(&to, now_ms()).await.unwrap(), 1);
        assert_eq!(db.count_active_unexpired(&from, now_ms()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn merge_with_shorter_source_expires_it() {
        let db = test_db().await;
        let from = new_record_id();
        let to = new_record_id();

        let mut source = Subscription::new_active(from.clone(), PlanId::Weekly, 7, 2, None);
        source.expires_at = now_ms() + 2 * DAY_MS;
        db.create_active_subscription(&source).await.unwrap();

        let mut target = Subscription::new_active(to.clone(), PlanId::Yearly, 365, 5, None);
        target.expires_at = now_ms() + 200 * DAY_MS;
        db.create_active_subscription(&target).await.unwrap();

        let summary = merge_user_identity(&db, &from, &to).await.unwrap();
        assert!(!summary.moved_subscription);

        let active = db
            .active_subscription_for_user(&to, now_ms())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(active.subscription_id, target.subscription_id);
        assert_eq!(db.count_active_unexpired(&from, now_ms()).await.unwrap(), 0);
    }
}
