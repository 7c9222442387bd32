//! Port abstraction for notification persistence.
//!
//! The [`NotificationStore`] trait is the relational half of the lifecycle
//! saga. Each operation runs inside one store transaction, so a notification
//! and its callback log, or a batch of succeeded and failed status flips, land
//! together or not at all.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{BizId, Notification, NotificationId};

use super::define_port_error;

define_port_error! {
    /// Errors raised by notification store adapters.
    pub enum NotificationStoreError {
        /// Store connection could not be established.
        Connection { message: String } => "notification store connection failed: {message}",
        /// Query or mutation failed during execution.
        Query { message: String } => "notification store query failed: {message}",
        /// A notification with the same `(biz_id, key)` already exists.
        Duplicate { message: String } => "notification already exists: {message}",
        /// A CAS update matched no row at the expected version.
        VersionMismatch { id: NotificationId, expected: u32 } =>
            "notification {id} is no longer at version {expected}",
        /// No notification matched the lookup.
        NotFound { message: String } => "notification not found: {message}",
        /// The companion callback log row could not be written.
        CallbackLogCreation { message: String } => "callback log creation failed: {message}",
    }
}

/// Port for notification storage.
///
/// Writes stamp `version = 1` on insert and add exactly one to `version` on
/// every status mutation.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// Insert one notification.
    ///
    /// Returns the stored row. A `(biz_id, key)` collision is reported as
    /// [`NotificationStoreError::Duplicate`].
    async fn create(&self, notification: &Notification)
    -> Result<Notification, NotificationStoreError>;

    /// Insert one notification and its `INIT` callback log in one transaction.
    async fn create_with_callback_log(
        &self,
        notification: &Notification,
    ) -> Result<Notification, NotificationStoreError>;

    /// Insert every notification or none of them.
    async fn batch_create(
        &self,
        notifications: &[Notification],
    ) -> Result<Vec<Notification>, NotificationStoreError>;

    /// Insert every notification plus callback logs, or nothing.
    async fn batch_create_with_callback_log(
        &self,
        notifications: &[Notification],
    ) -> Result<Vec<Notification>, NotificationStoreError>;

    /// Fetch one notification by id.
    async fn get_by_id(&self, id: NotificationId) -> Result<Notification, NotificationStoreError>;

    /// Fetch the notifications that exist among `ids`, keyed by id.
    async fn batch_get_by_ids(
        &self,
        ids: &[NotificationId],
    ) -> Result<HashMap<NotificationId, Notification>, NotificationStoreError>;

    /// Fetch one notification by its idempotency key.
    async fn get_by_key(
        &self,
        biz_id: BizId,
        key: &str,
    ) -> Result<Notification, NotificationStoreError>;

    /// Fetch the notifications that exist among `keys` for a tenant.
    async fn get_by_keys(
        &self,
        biz_id: BizId,
        keys: &[String],
    ) -> Result<Vec<Notification>, NotificationStoreError>;

    /// Set `status` only if the row is still at `notification.version`.
    ///
    /// Zero rows matched yields [`NotificationStoreError::VersionMismatch`].
    async fn cas_status(&self, notification: &Notification) -> Result<(), NotificationStoreError>;

    /// Set `status` without a version guard; still bumps the version.
    async fn update_status(&self, notification: &Notification)
    -> Result<(), NotificationStoreError>;

    /// Mark `succeeded` as `SUCCEEDED` (flipping their callback logs to
    /// `PENDING`) and `failed` as `FAILED` in one transaction.
    ///
    /// Rows already in a terminal state are left alone. Returns the ids from
    /// `failed` that this call actually moved to `FAILED`.
    async fn batch_update_status_succeeded_or_failed(
        &self,
        succeeded: &[Notification],
        failed: &[Notification],
    ) -> Result<Vec<NotificationId>, NotificationStoreError>;

    /// `PENDING` notifications whose window contains `now`.
    async fn find_ready(
        &self,
        now: DateTime<Utc>,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<Notification>, NotificationStoreError>;

    /// Mark `SUCCEEDED` and flip the callback log to `PENDING` together.
    ///
    /// Returns `false` without writing when the row is already terminal.
    async fn mark_success(
        &self,
        notification: &Notification,
    ) -> Result<bool, NotificationStoreError>;

    /// Mark `FAILED` unless the row is already terminal.
    ///
    /// Returns whether this call made the transition.
    async fn mark_failed(&self, notification: &Notification)
    -> Result<bool, NotificationStoreError>;

    /// Move a `PREPARE` row to `CANCELED`.
    ///
    /// Returns `false` when the row has already left `PREPARE`.
    async fn cancel_prepared(
        &self,
        notification: &Notification,
    ) -> Result<bool, NotificationStoreError>;

    /// Move up to `batch_size` `SENDING` rows last touched at or before
    /// `stale_before` to `FAILED`, returning them as they were before the
    /// update.
    async fn mark_timeout_sending_as_failed(
        &self,
        stale_before: DateTime<Utc>,
        batch_size: u64,
    ) -> Result<Vec<Notification>, NotificationStoreError>;
}
