//! Prepare/commit/cancel protocol.
//!
//! A caller prepares a notification inside its own local transaction, then
//! commits or cancels it once that transaction settles. Only `PREPARE`
//! notifications may be committed or cancelled. Commit swaps at the version it
//! read and cancel only moves `PREPARE` rows, so a commit racing a cancel
//! settles one way and refunds at most once.

use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use super::service::{NotificationIntakeService, advanced};
use crate::domain::ports::{
    NotificationIdGenerator, NotificationRepository, TransactionalNotifications,
};
use crate::domain::{BizId, Error, Notification, NotificationDraft, SendStatus};

impl<R, G> NotificationIntakeService<R, G>
where
    R: NotificationRepository,
    G: NotificationIdGenerator,
{
    async fn prepared(&self, biz_id: BizId, key: &str) -> Result<Notification, Error> {
        let notification = self.repository.get_by_key(biz_id, key).await?;
        if notification.status != SendStatus::Prepare {
            return Err(
                Error::failed_precondition("notification is not awaiting commit").with_details(
                    json!({
                        "bizId": biz_id,
                        "key": key,
                        "status": notification.status,
                    }),
                ),
            );
        }
        Ok(notification)
    }
}

#[async_trait]
impl<R, G> TransactionalNotifications for NotificationIntakeService<R, G>
where
    R: NotificationRepository,
    G: NotificationIdGenerator,
{
    async fn tx_prepare(&self, draft: NotificationDraft) -> Result<Notification, Error> {
        let notification = self.materialise(draft, SendStatus::Prepare)?;
        let prepared = self.repository.create(notification).await?;
        info!(
            notification_id = prepared.id,
            biz_id = prepared.biz_id,
            "notification prepared"
        );
        Ok(prepared)
    }

    async fn tx_commit(&self, biz_id: BizId, key: &str) -> Result<Notification, Error> {
        let notification = self.prepared(biz_id, key).await?;
        let committed = notification.with_status(SendStatus::Pending);
        self.repository.cas_status(&committed).await?;
        info!(notification_id = notification.id, biz_id, "notification committed");
        Ok(advanced(&notification, SendStatus::Pending))
    }

    async fn tx_cancel(&self, biz_id: BizId, key: &str) -> Result<Notification, Error> {
        let notification = self.prepared(biz_id, key).await?;
        self.repository.mark_canceled(&notification).await?;
        info!(notification_id = notification.id, biz_id, "notification cancelled");
        Ok(advanced(&notification, SendStatus::Canceled))
    }
}
