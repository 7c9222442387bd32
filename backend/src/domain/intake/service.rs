//! Direct send paths.

use std::sync::Arc;

use async_trait::async_trait;
use mockable::Clock;
use serde_json::json;
use tracing::debug;

use crate::domain::ports::{
    IdGeneratorError, NotificationIdGenerator, NotificationIntake, NotificationRepository,
};
use crate::domain::{Error, Notification, NotificationDraft, SendStatus};

/// Intake service implementing [`NotificationIntake`] and
/// [`crate::domain::ports::TransactionalNotifications`].
#[derive(Clone)]
pub struct NotificationIntakeService<R, G> {
    pub(super) repository: Arc<R>,
    ids: Arc<G>,
    clock: Arc<dyn Clock>,
}

impl<R, G> NotificationIntakeService<R, G> {
    /// Create a new service over the lifecycle engine and an ID generator.
    pub fn new(repository: Arc<R>, ids: Arc<G>, clock: Arc<dyn Clock>) -> Self {
        Self {
            repository,
            ids,
            clock,
        }
    }
}

impl<R, G> NotificationIntakeService<R, G>
where
    R: NotificationRepository,
    G: NotificationIdGenerator,
{
    fn map_id_error(error: IdGeneratorError) -> Error {
        Error::internal(format!("could not allocate notification id: {error}"))
    }

    /// Validate, assign an id, and fix the send window at the current time.
    pub(super) fn materialise(
        &self,
        draft: NotificationDraft,
        status: SendStatus,
    ) -> Result<Notification, Error> {
        let now = self.clock.utc();
        draft.validate(now).map_err(|err| {
            Error::invalid_request(err.to_string()).with_details(json!({
                "bizId": draft.biz_id,
                "key": draft.key,
            }))
        })?;
        let id = self.ids.next_id().map_err(Self::map_id_error)?;
        draft
            .into_notification(id, status, now)
            .map_err(|err| Error::invalid_request(err.to_string()))
    }

    fn materialise_all(
        &self,
        drafts: Vec<NotificationDraft>,
        status: SendStatus,
    ) -> Result<Vec<Notification>, Error> {
        if drafts.is_empty() {
            return Err(Error::invalid_request("notification batch must not be empty"));
        }
        drafts
            .into_iter()
            .map(|draft| self.materialise(draft, status))
            .collect()
    }

    fn for_async(&self, mut draft: NotificationDraft) -> NotificationDraft {
        draft.replace_async_immediate(self.clock.utc());
        draft
    }
}

/// The stored row after one accepted status mutation.
pub(super) fn advanced(notification: &Notification, status: SendStatus) -> Notification {
    Notification {
        version: notification.version.saturating_add(1),
        ..notification.with_status(status)
    }
}

#[async_trait]
impl<R, G> NotificationIntake for NotificationIntakeService<R, G>
where
    R: NotificationRepository,
    G: NotificationIdGenerator,
{
    async fn send_notification(&self, draft: NotificationDraft) -> Result<Notification, Error> {
        let immediate = draft.is_immediate();
        let notification = self.materialise(draft, SendStatus::Pending)?;
        let created = self
            .repository
            .create_with_callback_log(notification)
            .await?;
        if !immediate {
            return Ok(created);
        }
        self.repository.mark_success(&created).await?;
        debug!(notification_id = created.id, "immediate notification delivered");
        Ok(advanced(&created, SendStatus::Succeeded))
    }

    async fn send_notification_async(
        &self,
        draft: NotificationDraft,
    ) -> Result<Notification, Error> {
        let notification = self.materialise(self.for_async(draft), SendStatus::Pending)?;
        self.repository.create(notification).await
    }

    async fn batch_send_notifications(
        &self,
        drafts: Vec<NotificationDraft>,
    ) -> Result<Vec<Notification>, Error> {
        let immediate: Vec<bool> = drafts.iter().map(NotificationDraft::is_immediate).collect();
        let notifications = self.materialise_all(drafts, SendStatus::Pending)?;
        let created = self
            .repository
            .batch_create_with_callback_log(notifications)
            .await?;

        let delivered: Vec<Notification> = created
            .iter()
            .zip(&immediate)
            .filter(|(_, is_immediate)| **is_immediate)
            .map(|(n, _)| n.clone())
            .collect();
        if !delivered.is_empty() {
            self.repository
                .batch_update_status_succeeded_or_failed(&delivered, &[])
                .await?;
        }

        Ok(created
            .into_iter()
            .zip(immediate)
            .map(|(n, is_immediate)| {
                if is_immediate {
                    advanced(&n, SendStatus::Succeeded)
                } else {
                    n
                }
            })
            .collect())
    }

    async fn batch_send_notifications_async(
        &self,
        drafts: Vec<NotificationDraft>,
    ) -> Result<Vec<Notification>, Error> {
        let drafts = drafts
            .into_iter()
            .map(|draft| self.for_async(draft))
            .collect();
        let notifications = self.materialise_all(drafts, SendStatus::Pending)?;
        self.repository.batch_create(notifications).await
    }
}
