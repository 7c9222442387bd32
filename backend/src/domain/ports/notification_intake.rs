//! Driving ports for accepting notifications from callers.
//!
//! [`NotificationIntake`] covers direct sends; [`TransactionalNotifications`]
//! covers the prepare/commit/cancel protocol that lets a caller bind a send
//! to the outcome of its own local transaction.

use async_trait::async_trait;

use crate::domain::{BizId, Error, Notification, NotificationDraft};

/// Direct send paths.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationIntake: Send + Sync {
    /// Validate, persist as `PENDING` with a callback log, and report
    /// immediate sends as delivered straight away.
    ///
    /// # Errors
    ///
    /// [`crate::domain::ErrorCode::InvalidRequest`] for malformed drafts,
    /// otherwise the lifecycle errors of
    /// [`super::NotificationRepository::create_with_callback_log`].
    async fn send_notification(&self, draft: NotificationDraft) -> Result<Notification, Error>;

    /// Persist for later dispatch. Immediate drafts get a one-minute deadline.
    async fn send_notification_async(
        &self,
        draft: NotificationDraft,
    ) -> Result<Notification, Error>;

    /// Batch form of [`NotificationIntake::send_notification`].
    async fn batch_send_notifications(
        &self,
        drafts: Vec<NotificationDraft>,
    ) -> Result<Vec<Notification>, Error>;

    /// Batch form of [`NotificationIntake::send_notification_async`].
    async fn batch_send_notifications_async(
        &self,
        drafts: Vec<NotificationDraft>,
    ) -> Result<Vec<Notification>, Error>;
}

/// Two-phase send protocol.
///
/// Between prepare and commit/cancel the caller is the only writer of the
/// notification, so transitions use unconditional updates guarded by a
/// status precondition rather than CAS.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TransactionalNotifications: Send + Sync {
    /// Validate and persist the draft as `PREPARE`, reserving quota.
    async fn tx_prepare(&self, draft: NotificationDraft) -> Result<Notification, Error>;

    /// Move a `PREPARE` notification to `PENDING`.
    ///
    /// # Errors
    ///
    /// [`crate::domain::ErrorCode::FailedPrecondition`] when the notification
    /// is not in `PREPARE`.
    async fn tx_commit(&self, biz_id: BizId, key: &str) -> Result<Notification, Error>;

    /// Move a `PREPARE` notification to `CANCELED` and refund its quota.
    ///
    /// # Errors
    ///
    /// [`crate::domain::ErrorCode::FailedPrecondition`] when the notification
    /// is not in `PREPARE`.
    async fn tx_cancel(&self, biz_id: BizId, key: &str) -> Result<Notification, Error>;
}
