use serde::Deserialize;
use serde_json::Value;
use surrealdb::engine::local::{Db, File, Mem};
use surrealdb::Surreal;

use crate::errors::{DbError, DbResult};
use crate::models::{
    common::now_ms,
    engagement::{ConversionEvent, MyListEntry, MyListType, WatchProgress},
    payment::{Payment, PaymentStatus},
    redemption::Redemption,
    subscription::{Subscription, SubscriptionStatus},
    user::{Device, User, UserSession},
};

#[derive(Debug, Deserialize)]
struct CountRow {
    count: u64,
}

#[derive(Debug, Deserialize)]
pub struct StatusCount {
    pub status: PaymentStatus,
    pub count: u64,
}

#[derive(Clone)]
pub struct DatabaseService {
    db: Surreal<Db>,
}

impl DatabaseService {
    pub async fn new(database_url: &str) -> DbResult<Self> {
        let db = if database_url.starts_with("memory://") {
            Surreal::new::<Mem>(()).await?
        } else if let Some(path) = database_url.strip_prefix("file://") {
            Surreal::new::<File>(path).await?
        } else {
            return Err(DbError::validation(format!(
                "Unsupported database URL: {}",
                database_url
            )));
        };

        db.use_ns("fanbroj").use_db("main").await?;

        let service = Self { db };
        service.initialize_schema().await?;
        Ok(service)
    }

    async fn initialize_schema(&self) -> DbResult<()> {
        self.db
            .query(
                "
                DEFINE TABLE users;
                DEFINE TABLE devices;
                DEFINE TABLE payments;
                DEFINE TABLE subscriptions;
                DEFINE TABLE redemptions;
                DEFINE TABLE my_list;
                DEFINE TABLE watch_progress;
                DEFINE TABLE conversion_events;
                DEFINE TABLE user_sessions;
                DEFINE INDEX unique_order ON TABLE payments COLUMNS order_id UNIQUE;
                DEFINE INDEX unique_code ON TABLE redemptions COLUMNS code UNIQUE;
                DEFINE INDEX device_user ON TABLE devices COLUMNS user_id;
                DEFINE INDEX payment_device ON TABLE payments COLUMNS device_id;
                DEFINE INDEX sub_user ON TABLE subscriptions COLUMNS user_id;
                DEFINE INDEX event_name ON TABLE conversion_events COLUMNS event_name;
                ",
            )
            .await?;

        log::info!("database schema initialized");
        Ok(())
    }

    fn map_create_err(err: surrealdb::Error, what: &str) -> DbError {
        match err {
            surrealdb::Error::Db(surrealdb::error::Db::RecordExists { .. })
            | surrealdb::Error::Db(surrealdb::error::Db::IndexExists { .. }) => {
                DbError::conflict(format!("{} already exists", what))
            }
            other => DbError::Storage(other),
        }
    }

    // ── Users ────────────────────────────────────────────────────────────

    pub async fn create_user(&self, user: &User) -> DbResult<User> {
        let created: Option<User> = self
            .db
            .create(("users", user.user_id.clone()))
            .content(user)
            .await
            .map_err(|e| Self::map_create_err(e, "user"))?;
        created.ok_or_else(|| DbError::Other(anyhow::anyhow!("failed to create user")))
    }

    pub async fn get_user(&self, user_id: &str) -> DbResult<Option<User>> {
        Ok(self.db.select(("users", user_id)).await?)
    }

    pub async fn get_user_by_email(&self, email_lower: &str) -> DbResult<Option<User>> {
        let mut response = self
            .db
            .query("SELECT * FROM users WHERE email_lower = $email_lower LIMIT 1")
            .bind(("email_lower", email_lower.to_string()))
            .await?;
        Ok(response.take(0)?)
    }

    pub async fn get_user_by_username(&self, username_lower: &str) -> DbResult<Option<User>> {
        let mut response = self
            .db
            .query("SELECT * FROM users WHERE username_lower = $username_lower LIMIT 1")
            .bind(("username_lower", username_lower.to_string()))
            .await?;
        Ok(response.take(0)?)
    }

    pub async fn get_user_by_referral_code(&self, referral_code: &str) -> DbResult<Option<User>> {
        let mut response = self
            .db
            .query("SELECT * FROM users WHERE referral_code = $referral_code LIMIT 1")
            .bind(("referral_code", referral_code.to_string()))
            .await?;
        Ok(response.take(0)?)
    }

    pub async fn update_user(&self, user: &User) -> DbResult<User> {
        let updated: Option<User> = self
            .db
            .update(("users", user.user_id.clone()))
            .content(user)
            .await?;
        updated.ok_or_else(|| DbError::not_found("User not found"))
    }

    // ── Devices ──────────────────────────────────────────────────────────

    pub async fn get_device(&self, device_id: &str) -> DbResult<Option<Device>> {
        Ok(self.db.select(("devices", device_id.to_string())).await?)
    }

    /// Create-or-replace; rebinding a device to a new owner goes through
    /// here after the identity merge has run.
    pub async fn upsert_device(&self, device: &Device) -> DbResult<Device> {
        let updated: Option<Device> = self
            .db
            .update(("devices", device.device_id.clone()))
            .content(device)
            .await?;
        updated.ok_or_else(|| DbError::Other(anyhow::anyhow!("failed to upsert device")))
    }

    pub async fn touch_device(&self, device_id: &str, user_agent: Option<&str>) -> DbResult<()> {
        let mut patch = serde_json::json!({ "last_seen_at": now_ms() });
        if let Some(agent) = user_agent {
            patch["user_agent"] = Value::String(agent.to_string());
        }
        let _: Option<Device> = self
            .db
            .update(("devices", device_id.to_string()))
            .merge(patch)
            .await?;
        Ok(())
    }

    pub async fn delete_device(&self, device_id: &str) -> DbResult<()> {
        let _: Option<Device> = self.db.delete(("devices", device_id.to_string())).await?;
        Ok(())
    }

    // ── Payments ─────────────────────────────────────────────────────────

    /// The record key is the order id, so a replayed insert fails in the
    /// engine rather than racing the existence check.
    pub async fn create_payment(&self, payment: &Payment) -> DbResult<Payment> {
        let created: Option<Payment> = self
            .db
            .create(("payments", payment.order_id.clone()))
            .content(payment)
            .await
            .map_err(|e| Self::map_create_err(e, "payment"))?;
        created.ok_or_else(|| DbError::Other(anyhow::anyhow!("failed to create payment")))
    }

    pub async fn get_payment(&self, order_id: &str) -> DbResult<Option<Payment>> {
        Ok(self.db.select(("payments", order_id.to_string())).await?)
    }

    pub async fn find_payment_by_sid(&self, sid: &str) -> DbResult<Option<Payment>> {
        let mut response = self
            .db
            .query("SELECT * FROM payments WHERE sifalo_sid = $sid LIMIT 1")
            .bind(("sid", sid.to_string()))
            .await?;
        Ok(response.take(0)?)
    }

    pub async fn find_payment_by_sifalo_key(&self, key: &str) -> DbResult<Option<Payment>> {
        let mut response = self
            .db
            .query("SELECT * FROM payments WHERE sifalo_key = $key LIMIT 1")
            .bind(("key", key.to_string()))
            .await?;
        Ok(response.take(0)?)
    }

    pub async fn find_payment_by_mpesa_tx(&self, tx_id: &str) -> DbResult<Option<Payment>> {
        let mut response = self
            .db
            .query("SELECT * FROM payments WHERE mpesa_tx_id = $tx_id LIMIT 1")
            .bind(("tx_id", tx_id.to_string()))
            .await?;
        Ok(response.take(0)?)
    }

    pub async fn find_payment_by_paypal_tx(&self, tx_id: &str) -> DbResult<Option<Payment>> {
        let mut response = self
            .db
            .query("SELECT * FROM payments WHERE paypal_tx_id = $tx_id LIMIT 1")
            .bind(("tx_id", tx_id.to_string()))
            .await?;
        Ok(response.take(0)?)
    }

    pub async fn merge_payment(&self, order_id: &str, patch: Value) -> DbResult<Option<Payment>> {
        Ok(self
            .db
            .update(("payments", order_id.to_string()))
            .merge(patch)
            .await?)
    }

    pub async fn payments_for_device(
        &self,
        device_id: &str,
        limit: u32,
    ) -> DbResult<Vec<Payment>> {
        let mut response = self
            .db
            .query(format!(
                "SELECT * FROM payments WHERE device_id = $device_id \
                 ORDER BY created_at DESC LIMIT {}",
                limit.clamp(1, 100)
            ))
            .bind(("device_id", device_id.to_string()))
            .await?;
        Ok(response.take(0)?)
    }

    pub async fn reassign_payments(&self, from: &str, to: &str) -> DbResult<usize> {
        let mut response = self
            .db
            .query("UPDATE payments SET user_id = $to WHERE user_id = $from")
            .bind(("from", from.to_string()))
            .bind(("to", to.to_string()))
            .await?;
        let rows: Vec<Payment> = response.take(0)?;
        Ok(rows.len())
    }

    /// Pending hosted-checkout rows in the recovery window.
    pub async fn abandoned_checkouts(
        &self,
        created_after: i64,
        created_before: i64,
    ) -> DbResult<Vec<Payment>> {
        let mut response = self
            .db
            .query(
                "SELECT * FROM payments WHERE status = 'pending' \
                 AND gateway = 'checkout' \
                 AND created_at >= $after AND created_at <= $before",
            )
            .bind(("after", created_after))
            .bind(("before", created_before))
            .await?;
        Ok(response.take(0)?)
    }

    pub async fn list_payments(
        &self,
        status: Option<PaymentStatus>,
        search: Option<&str>,
        limit: u32,
        offset: u32,
    ) -> DbResult<(Vec<Payment>, u64)> {
        let mut conditions: Vec<&str> = Vec::new();
        if status.is_some() {
            conditions.push("status = $status");
        }
        if search.is_some() {
            conditions.push(
                "(string::contains(order_id, $search) \
                 OR string::contains(device_id, $search))",
            );
        }
        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let list_query = format!(
            "SELECT * FROM payments {} ORDER BY created_at DESC LIMIT {} START {}",
            where_clause,
            limit.clamp(1, 100),
            offset
        );
        let count_query = format!("SELECT count() FROM payments {} GROUP ALL", where_clause);

        let mut request = self.db.query(list_query).query(count_query);
        if let Some(status) = status {
            request = request.bind(("status", status));
        }
        if let Some(search) = search {
            request = request.bind(("search", search.to_string()));
        }

        let mut response = request.await?;
        let rows: Vec<Payment> = response.take(0)?;
        let counts: Vec<CountRow> = response.take(1)?;
        let total = counts.first().map(|row| row.count).unwrap_or(0);
        Ok((rows, total))
    }

    pub async fn payment_status_counts(&self) -> DbResult<Vec<StatusCount>> {
        let mut response = self
            .db
            .query("SELECT status, count() AS count FROM payments GROUP BY status")
            .await?;
        Ok(response.take(0)?)
    }

    pub async fn stale_pending_count(&self, older_than_ms: i64) -> DbResult<u64> {
        let mut response = self
            .db
            .query(
                "SELECT count() FROM payments WHERE status = 'pending' \
                 AND created_at < $cutoff GROUP ALL",
            )
            .bind(("cutoff", now_ms() - older_than_ms))
            .await?;
        let counts: Vec<CountRow> = response.take(0)?;
        Ok(counts.first().map(|row| row.count).unwrap_or(0))
    }

    // ── Subscriptions ────────────────────────────────────────────────────

    /// Creates the new active row after synchronously expiring any prior
    /// active rows for the user. This is what keeps the one-active-row
    /// invariant without a database constraint.
    pub async fn create_active_subscription(
        &self,
        subscription: &Subscription,
    ) -> DbResult<Subscription> {
        self.db
            .query(
                "UPDATE subscriptions SET status = 'expired' \
                 WHERE user_id = $user_id AND status = 'active'",
            )
            .bind(("user_id", subscription.user_id.clone()))
            .await?
            .check()?;

        let created: Option<Subscription> = self
            .db
            .create(("subscriptions", subscription.subscription_id.clone()))
            .content(subscription)
            .await
            .map_err(|e| Self::map_create_err(e, "subscription"))?;
        created.ok_or_else(|| DbError::Other(anyhow::anyhow!("failed to create subscription")))
    }

    pub async fn active_subscription_for_user(
        &self,
        user_id: &str,
        at_ms: i64,
    ) -> DbResult<Option<Subscription>> {
        let mut response = self
            .db
            .query(
                "SELECT * FROM subscriptions WHERE user_id = $user_id \
                 AND status = 'active' AND expires_at > $now \
                 ORDER BY expires_at DESC LIMIT 1",
            )
            .bind(("user_id", user_id.to_string()))
            .bind(("now", at_ms))
            .await?;
        Ok(response.take(0)?)
    }

    /// Latest active row regardless of expiry; the identity merge compares
    /// windows itself.
    pub async fn latest_active_subscription(
        &self,
        user_id: &str,
    ) -> DbResult<Option<Subscription>> {
        let mut response = self
            .db
            .query(
                "SELECT * FROM subscriptions WHERE user_id = $user_id \
                 AND status = 'active' ORDER BY expires_at DESC LIMIT 1",
            )
            .bind(("user_id", user_id.to_string()))
            .await?;
        Ok(response.take(0)?)
    }

    pub async fn count_active_unexpired(&self, user_id: &str, at_ms: i64) -> DbResult<u64> {
        let mut response = self
            .db
            .query(
                "SELECT count() FROM subscriptions WHERE user_id = $user_id \
                 AND status = 'active' AND expires_at > $now GROUP ALL",
            )
            .bind(("user_id", user_id.to_string()))
            .bind(("now", at_ms))
            .await?;
        let counts: Vec<CountRow> = response.take(0)?;
        Ok(counts.first().map(|row| row.count).unwrap_or(0))
    }

    pub async fn set_subscription_status(
        &self,
        subscription_id: &str,
        status: SubscriptionStatus,
    ) -> DbResult<()> {
        let mut patch = serde_json::json!({ "status": status });
        if status == SubscriptionStatus::Revoked {
            patch["cancelled_at"] = Value::from(now_ms());
        }
        let _: Option<Subscription> = self
            .db
            .update(("subscriptions", subscription_id))
            .merge(patch)
            .await?;
        Ok(())
    }

    pub async fn reassign_subscription(&self, subscription_id: &str, to: &str) -> DbResult<()> {
        let _: Option<Subscription> = self
            .db
            .update(("subscriptions", subscription_id))
            .merge(serde_json::json!({ "user_id": to }))
            .await?;
        Ok(())
    }

    pub async fn revoke_active_for_stripe_customer(&self, customer_id: &str) -> DbResult<usize> {
        let mut response = self
            .db
            .query(
                "UPDATE subscriptions SET status = 'revoked', cancelled_at = $now \
                 WHERE stripe_customer_id = $customer_id AND status = 'active'",
            )
            .bind(("customer_id", customer_id.to_string()))
            .bind(("now", now_ms()))
            .await?;
        let rows: Vec<Subscription> = response.take(0)?;
        Ok(rows.len())
    }

    pub async fn subscriptions_expiring_between(
        &self,
        start_ms: i64,
        end_ms: i64,
    ) -> DbResult<Vec<Subscription>> {
        let mut response = self
            .db
            .query(
                "SELECT * FROM subscriptions WHERE status = 'active' \
                 AND expires_at >= $start AND expires_at <= $end",
            )
            .bind(("start", start_ms))
            .bind(("end", end_ms))
            .await?;
        Ok(response.take(0)?)
    }

    // ── Redemptions ──────────────────────────────────────────────────────

    /// Auto-minted codes key their record by the payment order id, so two
    /// concurrent mints for the same order cannot both insert.
    pub async fn create_auto_redemption(
        &self,
        payment_order_id: &str,
        redemption: &Redemption,
    ) -> DbResult<Redemption> {
        let created: Option<Redemption> = self
            .db
            .create(("redemptions", format!("pay-{}", payment_order_id)))
            .content(redemption)
            .await
            .map_err(|e| Self::map_create_err(e, "redemption"))?;
        created.ok_or_else(|| DbError::Other(anyhow::anyhow!("failed to create redemption")))
    }

    pub async fn create_admin_redemption(&self, redemption: &Redemption) -> DbResult<Redemption> {
        let created: Option<Redemption> = self
            .db
            .create(("redemptions", redemption.redemption_id.clone()))
            .content(redemption)
            .await
            .map_err(|e| Self::map_create_err(e, "redemption"))?;
        created.ok_or_else(|| DbError::Other(anyhow::anyhow!("failed to create redemption")))
    }

    pub async fn get_redemption_by_code(&self, code: &str) -> DbResult<Option<Redemption>> {
        let mut response = self
            .db
            .query("SELECT * FROM redemptions WHERE code = $code LIMIT 1")
            .bind(("code", code.to_uppercase()))
            .await?;
        Ok(response.take(0)?)
    }

    pub async fn get_redemption_by_payment_order(
        &self,
        payment_order_id: &str,
    ) -> DbResult<Option<Redemption>> {
        let mut response = self
            .db
            .query("SELECT * FROM redemptions WHERE payment_order_id = $order_id LIMIT 1")
            .bind(("order_id", payment_order_id.to_string()))
            .await?;
        Ok(response.take(0)?)
    }

    pub async fn redemption_code_exists(&self, code: &str) -> DbResult<bool> {
        Ok(self.get_redemption_by_code(code).await?.is_some())
    }

    pub async fn redemptions_for_orders(
        &self,
        order_ids: &[String],
    ) -> DbResult<Vec<Redemption>> {
        if order_ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut response = self
            .db
            .query("SELECT * FROM redemptions WHERE payment_order_id IN $order_ids")
            .bind(("order_ids", order_ids.to_vec()))
            .await?;
        Ok(response.take(0)?)
    }

    pub async fn merge_redemption(&self, redemption_id: &str, patch: Value) -> DbResult<()> {
        self.db
            .query("UPDATE redemptions MERGE $patch WHERE redemption_id = $redemption_id")
            .bind(("patch", patch))
            .bind(("redemption_id", redemption_id.to_string()))
            .await?
            .check()?;
        Ok(())
    }

    pub async fn reassign_redemptions(&self, from: &str, to: &str) -> DbResult<usize> {
        let mut response = self
            .db
            .query("UPDATE redemptions SET used_by_user_id = $to WHERE used_by_user_id = $from")
            .bind(("from", from.to_string()))
            .bind(("to", to.to_string()))
            .await?;
        let rows: Vec<Redemption> = response.take(0)?;
        Ok(rows.len())
    }

    // ── My list / watch progress (identity-merge substrate) ──────────────

    pub async fn my_list_for_user(&self, user_id: &str) -> DbResult<Vec<MyListEntry>> {
        let mut response = self
            .db
            .query("SELECT * FROM my_list WHERE user_id = $user_id")
            .bind(("user_id", user_id.to_string()))
            .await?;
        Ok(response.take(0)?)
    }

    pub async fn find_my_list_entry(
        &self,
        user_id: &str,
        list_type: MyListType,
        content_type: &str,
        content_id: &str,
    ) -> DbResult<Option<MyListEntry>> {
        let mut response = self
            .db
            .query(
                "SELECT * FROM my_list WHERE user_id = $user_id \
                 AND list_type = $list_type AND content_type = $content_type \
                 AND content_id = $content_id LIMIT 1",
            )
            .bind(("user_id", user_id.to_string()))
            .bind(("list_type", list_type))
            .bind(("content_type", content_type.to_string()))
            .bind(("content_id", content_id.to_string()))
            .await?;
        Ok(response.take(0)?)
    }

    pub async fn create_my_list_entry(&self, entry: &MyListEntry) -> DbResult<()> {
        let _: Option<MyListEntry> = self
            .db
            .create(("my_list", entry.entry_id.clone()))
            .content(entry)
            .await
            .map_err(|e| Self::map_create_err(e, "list entry"))?;
        Ok(())
    }

    pub async fn merge_my_list_entry(&self, entry_id: &str, patch: Value) -> DbResult<()> {
        let _: Option<MyListEntry> = self
            .db
            .update(("my_list", entry_id))
            .merge(patch)
            .await?;
        Ok(())
    }

    pub async fn delete_my_list_for_user(&self, user_id: &str) -> DbResult<()> {
        self.db
            .query("DELETE my_list WHERE user_id = $user_id")
            .bind(("user_id", user_id.to_string()))
            .await?
            .check()?;
        Ok(())
    }

    pub async fn watch_progress_for_user(&self, user_id: &str) -> DbResult<Vec<WatchProgress>> {
        let mut response = self
            .db
            .query("SELECT * FROM watch_progress WHERE user_id = $user_id")
            .bind(("user_id", user_id.to_string()))
            .await?;
        Ok(response.take(0)?)
    }

    pub async fn find_watch_progress(
        &self,
        user_id: &str,
        content_type: &str,
        content_id: &str,
    ) -> DbResult<Option<WatchProgress>> {
        let mut response = self
            .db
            .query(
                "SELECT * FROM watch_progress WHERE user_id = $user_id \
                 AND content_type = $content_type AND content_id = $content_id LIMIT 1",
            )
            .bind(("user_id", user_id.to_string()))
            .bind(("content_type", content_type.to_string()))
            .bind(("content_id", content_id.to_string()))
            .await?;
        Ok(response.take(0)?)
    }

    pub async fn create_watch_progress(&self, progress: &WatchProgress) -> DbResult<()> {
        let _: Option<WatchProgress> = self
            .db
            .create(("watch_progress", progress.progress_id.clone()))
            .content(progress)
            .await
            .map_err(|e| Self::map_create_err(e, "watch progress"))?;
        Ok(())
    }

    pub async fn merge_watch_progress(&self, progress_id: &str, patch: Value) -> DbResult<()> {
        let _: Option<WatchProgress> = self
            .db
            .update(("watch_progress", progress_id))
            .merge(patch)
            .await?;
        Ok(())
    }

    pub async fn delete_watch_progress_for_user(&self, user_id: &str) -> DbResult<()> {
        self.db
            .query("DELETE watch_progress WHERE user_id = $user_id")
            .bind(("user_id", user_id.to_string()))
            .await?
            .check()?;
        Ok(())
    }

    // ── Conversion events ────────────────────────────────────────────────

    pub async fn record_event(&self, event: &ConversionEvent) -> DbResult<()> {
        let _: Option<ConversionEvent> = self
            .db
            .create(("conversion_events", event.event_id.clone()))
            .content(event)
            .await
            .map_err(|e| Self::map_create_err(e, "event"))?;
        Ok(())
    }

    pub async fn event_exists_for_order(
        &self,
        event_name: &str,
        order_id: &str,
    ) -> DbResult<bool> {
        let mut response = self
            .db
            .query(
                "SELECT count() FROM conversion_events WHERE event_name = $event_name \
                 AND order_id = $order_id GROUP ALL",
            )
            .bind(("event_name", event_name.to_string()))
            .bind(("order_id", order_id.to_string()))
            .await?;
        let counts: Vec<CountRow> = response.take(0)?;
        Ok(counts.first().map(|row| row.count).unwrap_or(0) > 0)
    }

    pub async fn event_exists_for_subscription(
        &self,
        event_name: &str,
        subscription_id: &str,
    ) -> DbResult<bool> {
        let mut response = self
            .db
            .query(
                "SELECT count() FROM conversion_events WHERE event_name = $event_name \
                 AND subscription_id = $subscription_id GROUP ALL",
            )
            .bind(("event_name", event_name.to_string()))
            .bind(("subscription_id", subscription_id.to_string()))
            .await?;
        let counts: Vec<CountRow> = response.take(0)?;
        Ok(counts.first().map(|row| row.count).unwrap_or(0) > 0)
    }

    // ── Sessions ─────────────────────────────────────────────────────────

    pub async fn create_session(&self, session: &UserSession) -> DbResult<()> {
        let _: Option<UserSession> = self
            .db
            .create(("user_sessions", session.token_hash.clone()))
            .content(session)
            .await
            .map_err(|e| Self::map_create_err(e, "session"))?;
        Ok(())
    }

    pub async fn get_valid_session(&self, token_hash: &str) -> DbResult<Option<UserSession>> {
        let session: Option<UserSession> = self
            .db
            .select(("user_sessions", token_hash.to_string()))
            .await?;
        Ok(session.filter(|s| s.expires_at > now_ms()))
    }

    pub async fn touch_session(&self, token_hash: &str) -> DbResult<()> {
        let _: Option<UserSession> = self
            .db
            .update(("user_sessions", token_hash.to_string()))
            .merge(serde_json::json!({ "last_seen_at": now_ms() }))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::common::{PlanId, DAY_MS};
    use crate::models::payment::Gateway;
    use crate::models::user::new_record_id;
    use rust_decimal::Decimal;

    async fn test_db() -> DatabaseService {
        DatabaseService::new("memory://").await.unwrap()
    }

    fn pending_payment(order_id: &str, device_id: &str) -> Payment {
        Payment::new_pending(
            order_id.to_string(),
            device_id.to_string(),
            PlanId::Monthly,
            Decimal::new(320, 2),
            Gateway::Checkout,
        )
    }

    #[tokio::test]
    async fn user_roundtrip() {
        let db = test_db().await;
        let mut user = User::new_anonymous();
        user.email = Some("Abdi@Example.com".to_string());
        user.email_lower = Some("abdi@example.com".to_string());

        let created = db.create_user(&user).await.unwrap();
        assert_eq!(created.user_id, user.user_id);

        let fetched = db.get_user(&user.user_id).await.unwrap().unwrap();
        assert_eq!(fetched.referral_code, user.referral_code);

        let by_email = db.get_user_by_email("abdi@example.com").await.unwrap();
        assert!(by_email.is_some());
        assert!(db.get_user_by_email("other@example.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_order_id_is_a_conflict() {
        let db = test_db().await;
        db.create_payment(&pending_payment("FBJ-MONTHLY-1-A", "device-1"))
            .await
            .unwrap();

        let err = db
            .create_payment(&pending_payment("FBJ-MONTHLY-1-A", "device-2"))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Conflict(_)));
    }

    #[tokio::test]
    async fn mpesa_tx_lookup_finds_recorded_submission() {
        let db = test_db().await;
        let mut payment = pending_payment("FBJ-MPESA-MONTHLY-1-A", "device-1");
        payment.gateway = Gateway::Mpesa;
        payment.mpesa_tx_id = Some("QAB12CD34E".to_string());
        db.create_payment(&payment).await.unwrap();

        let found = db.find_payment_by_mpesa_tx("QAB12CD34E").await.unwrap();
        assert!(found.is_some());
        assert!(db.find_payment_by_mpesa_tx("OTHER").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn at_most_one_active_unexpired_subscription() {
        let db = test_db().await;
        let user_id = new_record_id();

        for _ in 0..3 {
            let sub = Subscription::new_active(user_id.clone(), PlanId::Monthly, 30, 3, None);
            db.create_active_subscription(&sub).await.unwrap();
        }

        assert_eq!(db.count_active_unexpired(&user_id, now_ms()).await.unwrap(), 1);

        let active = db
            .active_subscription_for_user(&user_id, now_ms())
            .await
            .unwrap()
            .unwrap();
        assert!(active.expires_at > now_ms() + 29 * DAY_MS);
    }

    #[tokio::test]
    async fn auto_redemption_keyed_by_order_rejects_second_insert() {
        let db = test_db().await;
        let order = "FBJ-MONTHLY-9-Z";
        let first = Redemption::new_auto(
            "AAAA2222".to_string(),
            PlanId::Monthly,
            30,
            3,
            order.to_string(),
            new_record_id(),
        );
        db.create_auto_redemption(order, &first).await.unwrap();

        let second = Redemption::new_auto(
            "BBBB3333".to_string(),
            PlanId::Monthly,
            30,
            3,
            order.to_string(),
            new_record_id(),
        );
        let err = db.create_auto_redemption(order, &second).await.unwrap_err();
        assert!(matches!(err, DbError::Conflict(_)));

        let stored = db
            .get_redemption_by_payment_order(order)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.code, "AAAA2222");
    }

    #[tokio::test]
    async fn payment_listing_filters_by_status() {
        let db = test_db().await;
        db.create_payment(&pending_payment("FBJ-A", "device-1")).await.unwrap();
        let mut done = pending_payment("FBJ-B", "device-1");
        done.status = PaymentStatus::Success;
        db.create_payment(&done).await.unwrap();

        let (pending, total) = db
            .list_payments(Some(PaymentStatus::Pending), None, 20, 0)
            .await
            .unwrap();
        assert_eq!(total, 1);
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].order_id, "FBJ-A");

        let (all, total) = db.list_payments(None, None, 20, 0).await.unwrap();
        assert_eq!(total, 2);
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn event_dedup_lookups() {
        let db = test_db().await;
        let mut event = ConversionEvent::new("recovery_email_sent", "email", "cron_checkout_recovery");
        event.order_id = Some("FBJ-X".to_string());
        db.record_event(&event).await.unwrap();

        assert!(db
            .event_exists_for_order("recovery_email_sent", "FBJ-X")
            .await
            .unwrap());
        assert!(!db
            .event_exists_for_order("recovery_email_sent", "FBJ-Y")
            .await
            .unwrap());
    }
}
