//! Notification lifecycle engine.
//!
//! Ties the notification store and the quota cache together as a saga:
//! reserve quota, persist, and refund when persistence is confirmed to have
//! failed or a notification ends up failed or cancelled.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::TimeDelta;
use mockable::Clock;
use serde_json::json;
use tracing::{debug, info, warn};

use super::reservation::{QuotaReservation, refund};
use crate::domain::ports::{
    NotificationRepository, NotificationStore, NotificationStoreError, QuotaCache, QuotaCacheError,
};
use crate::domain::{
    BizId, Error, Notification, NotificationId, QuotaDelta, QuotaKey,
    aggregate_quota_deltas,
};

/// Tunables for the lifecycle engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecycleConfig {
    /// Upper bound for a quota refund, measured from when it starts.
    pub compensation_timeout: Duration,
    /// How long a notification may sit in `SENDING` before the sweeper
    /// fails it.
    pub sending_timeout: TimeDelta,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            compensation_timeout: Duration::from_secs(3),
            sending_timeout: TimeDelta::minutes(1),
        }
    }
}

/// Lifecycle engine implementing [`NotificationRepository`].
#[derive(Clone)]
pub struct NotificationLifecycleService<S, Q> {
    store: Arc<S>,
    quota: Arc<Q>,
    clock: Arc<dyn Clock>,
    config: LifecycleConfig,
}

impl<S, Q> NotificationLifecycleService<S, Q> {
    /// Create a new engine over the given store and quota cache.
    pub fn new(store: Arc<S>, quota: Arc<Q>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            quota,
            clock,
            config: LifecycleConfig::default(),
        }
    }

    /// Override the default tunables.
    #[must_use]
    pub fn with_config(mut self, config: LifecycleConfig) -> Self {
        self.config = config;
        self
    }
}

impl<S, Q> NotificationLifecycleService<S, Q>
where
    S: NotificationStore,
    Q: QuotaCache + 'static,
{
    pub(super) fn map_store_error(error: NotificationStoreError) -> Error {
        match error {
            NotificationStoreError::Connection { message } => {
                Error::service_unavailable(format!("notification store unavailable: {message}"))
            }
            NotificationStoreError::Query { message } => {
                Error::internal(format!("notification store error: {message}"))
            }
            NotificationStoreError::Duplicate { message } => {
                Error::duplicate(format!("notification already exists: {message}"))
            }
            NotificationStoreError::VersionMismatch { id, expected } => {
                Error::version_mismatch("notification version mismatch").with_details(json!({
                    "notificationId": id,
                    "expectedVersion": expected,
                }))
            }
            NotificationStoreError::NotFound { message } => {
                Error::not_found(format!("notification not found: {message}"))
            }
            NotificationStoreError::CallbackLogCreation { message } => {
                Error::internal(format!("callback log creation failed: {message}"))
            }
        }
    }

    pub(super) fn map_quota_error(error: QuotaCacheError) -> Error {
        match error {
            QuotaCacheError::Connection { message } => {
                Error::service_unavailable(format!("quota cache unavailable: {message}"))
            }
            QuotaCacheError::Command { message } => {
                Error::internal(format!("quota cache error: {message}"))
            }
            QuotaCacheError::Exhausted { key } => {
                Error::quota_exhausted("quota exhausted").with_details(json!({ "key": key }))
            }
            QuotaCacheError::NotFound { key } => {
                Error::not_found("quota not configured").with_details(json!({ "key": key }))
            }
        }
    }

    async fn create_one(
        &self,
        notification: Notification,
        with_callback_log: bool,
    ) -> Result<Notification, Error> {
        let key = QuotaKey::new(notification.biz_id, notification.channel);
        let reservation = QuotaReservation::reserve_one(
            Arc::clone(&self.quota),
            key,
            self.config.compensation_timeout,
        )
        .await
        .map_err(Self::map_quota_error)?;

        let persisted = if with_callback_log {
            self.store.create_with_callback_log(&notification).await
        } else {
            self.store.create(&notification).await
        };

        match persisted {
            Ok(stored) => {
                reservation.commit();
                info!(
                    notification_id = stored.id,
                    biz_id = stored.biz_id,
                    channel = %stored.channel,
                    status = %stored.status,
                    "notification created"
                );
                Ok(stored)
            }
            Err(err) => {
                warn!(
                    notification_id = notification.id,
                    biz_id = notification.biz_id,
                    error = %err,
                    "notification persist failed, refunding quota"
                );
                reservation.release().await;
                Err(Self::map_store_error(err))
            }
        }
    }

    async fn create_many(
        &self,
        notifications: Vec<Notification>,
        with_callback_log: bool,
    ) -> Result<Vec<Notification>, Error> {
        if notifications.is_empty() {
            return Ok(Vec::new());
        }

        let deltas = aggregate_quota_deltas(&notifications);
        let reservation = QuotaReservation::reserve_batch(
            Arc::clone(&self.quota),
            deltas,
            self.config.compensation_timeout,
        )
        .await
        .map_err(Self::map_quota_error)?;

        let persisted = if with_callback_log {
            self.store
                .batch_create_with_callback_log(&notifications)
                .await
        } else {
            self.store.batch_create(&notifications).await
        };

        match persisted {
            Ok(stored) => {
                reservation.commit();
                info!(count = stored.len(), "notification batch created");
                Ok(stored)
            }
            Err(err) => {
                warn!(
                    count = notifications.len(),
                    error = %err,
                    "notification batch persist failed, refunding quota"
                );
                reservation.release().await;
                Err(Self::map_store_error(err))
            }
        }
    }

    async fn refund_for(&self, notifications: &[Notification]) {
        let deltas: Vec<QuotaDelta> = aggregate_quota_deltas(notifications);
        refund(
            self.quota.as_ref(),
            &deltas,
            self.config.compensation_timeout,
        )
        .await;
    }
}

#[async_trait]
impl<S, Q> NotificationRepository for NotificationLifecycleService<S, Q>
where
    S: NotificationStore,
    Q: QuotaCache + 'static,
{
    async fn create(&self, notification: Notification) -> Result<Notification, Error> {
        self.create_one(notification, false).await
    }

    async fn create_with_callback_log(
        &self,
        notification: Notification,
    ) -> Result<Notification, Error> {
        self.create_one(notification, true).await
    }

    async fn batch_create(
        &self,
        notifications: Vec<Notification>,
    ) -> Result<Vec<Notification>, Error> {
        self.create_many(notifications, false).await
    }

    async fn batch_create_with_callback_log(
        &self,
        notifications: Vec<Notification>,
    ) -> Result<Vec<Notification>, Error> {
        self.create_many(notifications, true).await
    }

    async fn get_by_id(&self, id: NotificationId) -> Result<Notification, Error> {
        self.store.get_by_id(id).await.map_err(Self::map_store_error)
    }

    async fn batch_get_by_ids(
        &self,
        ids: &[NotificationId],
    ) -> Result<HashMap<NotificationId, Notification>, Error> {
        self.store
            .batch_get_by_ids(ids)
            .await
            .map_err(Self::map_store_error)
    }

    async fn get_by_key(&self, biz_id: BizId, key: &str) -> Result<Notification, Error> {
        self.store
            .get_by_key(biz_id, key)
            .await
            .map_err(Self::map_store_error)
    }

    async fn get_by_keys(
        &self,
        biz_id: BizId,
        keys: &[String],
    ) -> Result<Vec<Notification>, Error> {
        self.store
            .get_by_keys(biz_id, keys)
            .await
            .map_err(Self::map_store_error)
    }

    async fn cas_status(&self, notification: &Notification) -> Result<(), Error> {
        self.store
            .cas_status(notification)
            .await
            .map_err(Self::map_store_error)
    }

    async fn update_status(&self, notification: &Notification) -> Result<(), Error> {
        self.store
            .update_status(notification)
            .await
            .map_err(Self::map_store_error)
    }

    async fn batch_update_status_succeeded_or_failed(
        &self,
        succeeded: &[Notification],
        failed: &[Notification],
    ) -> Result<(), Error> {
        if succeeded.is_empty() && failed.is_empty() {
            return Ok(());
        }
        let moved = self
            .store
            .batch_update_status_succeeded_or_failed(succeeded, failed)
            .await
            .map_err(Self::map_store_error)?;
        debug!(
            succeeded = succeeded.len(),
            failed = moved.len(),
            "dispatch batch settled"
        );
        let newly_failed: Vec<Notification> = failed
            .iter()
            .filter(|notification| moved.contains(&notification.id))
            .cloned()
            .collect();
        self.refund_for(&newly_failed).await;
        Ok(())
    }

    async fn find_ready_notifications(
        &self,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<Notification>, Error> {
        self.store
            .find_ready(self.clock.utc(), offset, limit)
            .await
            .map_err(Self::map_store_error)
    }

    async fn mark_success(&self, notification: &Notification) -> Result<(), Error> {
        let moved = self
            .store
            .mark_success(notification)
            .await
            .map_err(Self::map_store_error)?;
        if !moved {
            debug!(notification_id = notification.id, "already terminal, success ignored");
        }
        Ok(())
    }

    async fn mark_failed(&self, notification: &Notification) -> Result<(), Error> {
        let moved = self
            .store
            .mark_failed(notification)
            .await
            .map_err(Self::map_store_error)?;
        if moved {
            self.refund_for(std::slice::from_ref(notification)).await;
        } else {
            debug!(notification_id = notification.id, "already terminal, no refund");
        }
        Ok(())
    }

    async fn mark_canceled(&self, notification: &Notification) -> Result<(), Error> {
        let moved = self
            .store
            .cancel_prepared(notification)
            .await
            .map_err(Self::map_store_error)?;
        if !moved {
            return Err(Error::failed_precondition(
                "notification is no longer awaiting commit",
            )
            .with_details(json!({ "id": notification.id })));
        }
        self.refund_for(std::slice::from_ref(notification)).await;
        Ok(())
    }

    async fn mark_timeout_sending_as_failed(&self, batch_size: u64) -> Result<u64, Error> {
        let stale_before = self.clock.utc() - self.config.sending_timeout;
        let swept = self
            .store
            .mark_timeout_sending_as_failed(stale_before, batch_size)
            .await
            .map_err(Self::map_store_error)?;
        if swept.is_empty() {
            return Ok(0);
        }
        info!(count = swept.len(), "timed-out sends marked failed");
        self.refund_for(&swept).await;
        Ok(u64::try_from(swept.len()).unwrap_or(u64::MAX))
    }
}
