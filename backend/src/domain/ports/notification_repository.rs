//! Driving port for the notification lifecycle.
//!
//! The [`NotificationRepository`] trait is what intake handlers, schedulers,
//! dispatchers, and sweepers call. Implementations tie every creation to a
//! quota reservation and refund quota when a notification fails.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::domain::{BizId, Error, Notification, NotificationId};

/// Driving port for notification creation, lookup, and status transitions.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationRepository: Send + Sync {
    /// Reserve one unit of quota and persist `notification`.
    ///
    /// # Errors
    ///
    /// - [`crate::domain::ErrorCode::QuotaExhausted`] when the tenant has no
    ///   quota left; nothing is persisted.
    /// - [`crate::domain::ErrorCode::Duplicate`] when `(biz_id, key)` exists;
    ///   the reserved unit is refunded.
    /// - Storage errors, after the reserved unit is refunded.
    async fn create(&self, notification: Notification) -> Result<Notification, Error>;

    /// As [`NotificationRepository::create`], also writing a callback log.
    ///
    /// # Errors
    ///
    /// See [`NotificationRepository::create`].
    async fn create_with_callback_log(
        &self,
        notification: Notification,
    ) -> Result<Notification, Error>;

    /// Reserve quota for the whole batch at once and persist every row.
    ///
    /// # Errors
    ///
    /// Quota exhaustion on any `(biz_id, channel)` rejects the whole batch
    /// without touching any counter. A storage failure refunds every
    /// reserved unit.
    async fn batch_create(
        &self,
        notifications: Vec<Notification>,
    ) -> Result<Vec<Notification>, Error>;

    /// As [`NotificationRepository::batch_create`], also writing callback logs.
    ///
    /// # Errors
    ///
    /// See [`NotificationRepository::batch_create`].
    async fn batch_create_with_callback_log(
        &self,
        notifications: Vec<Notification>,
    ) -> Result<Vec<Notification>, Error>;

    async fn get_by_id(&self, id: NotificationId) -> Result<Notification, Error>;

    async fn batch_get_by_ids(
        &self,
        ids: &[NotificationId],
    ) -> Result<HashMap<NotificationId, Notification>, Error>;

    async fn get_by_key(&self, biz_id: BizId, key: &str) -> Result<Notification, Error>;

    async fn get_by_keys(&self, biz_id: BizId, keys: &[String])
    -> Result<Vec<Notification>, Error>;

    /// Transition to `notification.status` if nobody else moved it first.
    ///
    /// # Errors
    ///
    /// [`crate::domain::ErrorCode::VersionMismatch`] when the stored version
    /// no longer equals `notification.version`.
    async fn cas_status(&self, notification: &Notification) -> Result<(), Error>;

    /// Transition without a version guard.
    async fn update_status(&self, notification: &Notification) -> Result<(), Error>;

    /// Settle a dispatch batch, refunding quota for the `failed` entries that
    /// were not already terminal.
    async fn batch_update_status_succeeded_or_failed(
        &self,
        succeeded: &[Notification],
        failed: &[Notification],
    ) -> Result<(), Error>;

    /// Pending notifications whose send window is open now.
    async fn find_ready_notifications(
        &self,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<Notification>, Error>;

    /// Mark succeeded; a row that is already terminal is left alone.
    async fn mark_success(&self, notification: &Notification) -> Result<(), Error>;

    /// Mark failed and refund the notification's quota unit.
    ///
    /// A row that is already terminal is left alone and nothing is refunded,
    /// so each failure is refunded once.
    async fn mark_failed(&self, notification: &Notification) -> Result<(), Error>;

    /// Cancel a `PREPARE` notification and refund the quota unit.
    ///
    /// # Errors
    ///
    /// [`crate::domain::ErrorCode::FailedPrecondition`] when the row has
    /// already left `PREPARE`.
    async fn mark_canceled(&self, notification: &Notification) -> Result<(), Error>;

    /// Fail notifications stuck in `SENDING` and refund their quota,
    /// returning how many moved.
    async fn mark_timeout_sending_as_failed(&self, batch_size: u64) -> Result<u64, Error>;
}
