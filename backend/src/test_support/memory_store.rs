use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mockable::Clock;

use crate::domain::ports::{
    CallbackLogStore, CallbackLogStoreError, NotificationStore, NotificationStoreError,
};
use crate::domain::{
    BizId, CallbackLog, CallbackLogPage, CallbackLogStatus, Notification, NotificationId,
    SendStatus,
};

struct StoredNotification {
    notification: Notification,
    updated_at: DateTime<Utc>,
}

#[derive(Default)]
struct State {
    notifications: BTreeMap<NotificationId, StoredNotification>,
    callback_logs: BTreeMap<i64, CallbackLog>,
    next_log_id: i64,
    fail_next_write: Option<NotificationStoreError>,
}

impl State {
    fn conflicts(&self, candidate: &Notification) -> bool {
        self.notifications.contains_key(&candidate.id)
            || self.notifications.values().any(|stored| {
                stored.notification.biz_id == candidate.biz_id
                    && stored.notification.key == candidate.key
            })
    }

    fn set_status(&mut self, id: NotificationId, status: SendStatus, now: DateTime<Utc>) -> bool {
        match self.notifications.get_mut(&id) {
            Some(stored) => {
                stored.notification.status = status;
                stored.notification.version += 1;
                stored.updated_at = now;
                true
            }
            None => false,
        }
    }

    /// Move `id` to `status` only when `allowed` accepts its current status.
    ///
    /// `None` means no such row; `Some(false)` means the guard refused.
    fn transition(
        &mut self,
        id: NotificationId,
        status: SendStatus,
        now: DateTime<Utc>,
        allowed: impl Fn(SendStatus) -> bool,
    ) -> Option<bool> {
        let current = self.notifications.get(&id)?.notification.status;
        if !allowed(current) {
            return Some(false);
        }
        Some(self.set_status(id, status, now))
    }

    fn flip_callback_logs(&mut self, id: NotificationId) {
        for log in self.callback_logs.values_mut() {
            if log.notification_id == id {
                log.status = CallbackLogStatus::Pending;
            }
        }
    }
}

fn is_live(status: SendStatus) -> bool {
    !status.is_terminal()
}

fn missing(notification: &Notification) -> NotificationStoreError {
    NotificationStoreError::not_found(format!("id {}", notification.id))
}

/// Notification and callback log store kept in memory.
///
/// Mirrors the database adapter: `(biz_id, key)` uniqueness, all-or-nothing
/// batch inserts, and status transitions that refuse terminal rows.
pub struct InMemoryNotificationStore {
    clock: Arc<dyn Clock>,
    state: Mutex<State>,
}

impl InMemoryNotificationStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            state: Mutex::new(State::default()),
        }
    }

    /// Make the next insert fail with `error` without storing anything.
    pub fn fail_next_write(&self, error: NotificationStoreError) {
        self.state().fail_next_write = Some(error);
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn insert(
        &self,
        notifications: &[Notification],
        with_callback_log: bool,
    ) -> Result<Vec<Notification>, NotificationStoreError> {
        let now = self.clock.utc();
        let mut state = self.state();
        if let Some(error) = state.fail_next_write.take() {
            return Err(error);
        }

        for (index, candidate) in notifications.iter().enumerate() {
            let repeated_in_batch = notifications.iter().take(index).any(|earlier| {
                earlier.id == candidate.id
                    || (earlier.biz_id == candidate.biz_id && earlier.key == candidate.key)
            });
            if repeated_in_batch || state.conflicts(candidate) {
                return Err(NotificationStoreError::duplicate(format!(
                    "biz {} key {}",
                    candidate.biz_id, candidate.key
                )));
            }
        }

        let mut stored = Vec::with_capacity(notifications.len());
        for candidate in notifications {
            let notification = Notification {
                version: 1,
                ..candidate.clone()
            };
            if with_callback_log {
                state.next_log_id += 1;
                let log_id = state.next_log_id;
                state.callback_logs.insert(
                    log_id,
                    CallbackLog {
                        id: log_id,
                        notification_id: notification.id,
                        retry_count: 0,
                        next_retry_time: now,
                        status: CallbackLogStatus::Init,
                    },
                );
            }
            state.notifications.insert(
                notification.id,
                StoredNotification {
                    notification: notification.clone(),
                    updated_at: now,
                },
            );
            stored.push(notification);
        }
        Ok(stored)
    }
}

#[async_trait]
impl NotificationStore for InMemoryNotificationStore {
    async fn create(
        &self,
        notification: &Notification,
    ) -> Result<Notification, NotificationStoreError> {
        let mut stored = self.insert(std::slice::from_ref(notification), false)?;
        stored
            .pop()
            .ok_or_else(|| NotificationStoreError::query("insert returned no row"))
    }

    async fn create_with_callback_log(
        &self,
        notification: &Notification,
    ) -> Result<Notification, NotificationStoreError> {
        let mut stored = self.insert(std::slice::from_ref(notification), true)?;
        stored
            .pop()
            .ok_or_else(|| NotificationStoreError::query("insert returned no row"))
    }

    async fn batch_create(
        &self,
        notifications: &[Notification],
    ) -> Result<Vec<Notification>, NotificationStoreError> {
        self.insert(notifications, false)
    }

    async fn batch_create_with_callback_log(
        &self,
        notifications: &[Notification],
    ) -> Result<Vec<Notification>, NotificationStoreError> {
        self.insert(notifications, true)
    }

    async fn get_by_id(&self, id: NotificationId) -> Result<Notification, NotificationStoreError> {
        self.state()
            .notifications
            .get(&id)
            .map(|stored| stored.notification.clone())
            .ok_or_else(|| NotificationStoreError::not_found(format!("id {id}")))
    }

    async fn batch_get_by_ids(
        &self,
        ids: &[NotificationId],
    ) -> Result<HashMap<NotificationId, Notification>, NotificationStoreError> {
        let state = self.state();
        Ok(ids
            .iter()
            .filter_map(|id| {
                state
                    .notifications
                    .get(id)
                    .map(|stored| (*id, stored.notification.clone()))
            })
            .collect())
    }

    async fn get_by_key(
        &self,
        biz_id: BizId,
        key: &str,
    ) -> Result<Notification, NotificationStoreError> {
        self.state()
            .notifications
            .values()
            .find(|stored| stored.notification.biz_id == biz_id && stored.notification.key == key)
            .map(|stored| stored.notification.clone())
            .ok_or_else(|| NotificationStoreError::not_found(format!("biz {biz_id} key {key}")))
    }

    async fn get_by_keys(
        &self,
        biz_id: BizId,
        keys: &[String],
    ) -> Result<Vec<Notification>, NotificationStoreError> {
        Ok(self
            .state()
            .notifications
            .values()
            .filter(|stored| {
                stored.notification.biz_id == biz_id && keys.contains(&stored.notification.key)
            })
            .map(|stored| stored.notification.clone())
            .collect())
    }

    async fn cas_status(&self, notification: &Notification) -> Result<(), NotificationStoreError> {
        let now = self.clock.utc();
        let mut state = self.state();
        let swappable = state.notifications.get(&notification.id).is_some_and(|stored| {
            stored.notification.version == notification.version
                && !stored.notification.status.is_terminal()
        });
        if !swappable {
            return Err(NotificationStoreError::version_mismatch(
                notification.id,
                notification.version,
            ));
        }
        state.set_status(notification.id, notification.status, now);
        Ok(())
    }

    async fn update_status(
        &self,
        notification: &Notification,
    ) -> Result<(), NotificationStoreError> {
        let now = self.clock.utc();
        if self
            .state()
            .set_status(notification.id, notification.status, now)
        {
            Ok(())
        } else {
            Err(missing(notification))
        }
    }

    async fn batch_update_status_succeeded_or_failed(
        &self,
        succeeded: &[Notification],
        failed: &[Notification],
    ) -> Result<Vec<NotificationId>, NotificationStoreError> {
        let now = self.clock.utc();
        let mut state = self.state();
        for notification in succeeded {
            let moved = state.transition(notification.id, SendStatus::Succeeded, now, is_live);
            if moved == Some(true) {
                state.flip_callback_logs(notification.id);
            }
        }
        Ok(failed
            .iter()
            .filter(|notification| {
                state.transition(notification.id, SendStatus::Failed, now, is_live) == Some(true)
            })
            .map(|notification| notification.id)
            .collect())
    }

    async fn find_ready(
        &self,
        now: DateTime<Utc>,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<Notification>, NotificationStoreError> {
        let skip = usize::try_from(offset).unwrap_or(usize::MAX);
        let take = usize::try_from(limit).unwrap_or(usize::MAX);
        Ok(self
            .state()
            .notifications
            .values()
            .filter(|stored| stored.notification.is_ready_at(now))
            .skip(skip)
            .take(take)
            .map(|stored| stored.notification.clone())
            .collect())
    }

    async fn mark_success(
        &self,
        notification: &Notification,
    ) -> Result<bool, NotificationStoreError> {
        let now = self.clock.utc();
        let mut state = self.state();
        let moved = state
            .transition(notification.id, SendStatus::Succeeded, now, is_live)
            .ok_or_else(|| missing(notification))?;
        if moved {
            state.flip_callback_logs(notification.id);
        }
        Ok(moved)
    }

    async fn mark_failed(
        &self,
        notification: &Notification,
    ) -> Result<bool, NotificationStoreError> {
        let now = self.clock.utc();
        self.state()
            .transition(notification.id, SendStatus::Failed, now, is_live)
            .ok_or_else(|| missing(notification))
    }

    async fn cancel_prepared(
        &self,
        notification: &Notification,
    ) -> Result<bool, NotificationStoreError> {
        let now = self.clock.utc();
        self.state()
            .transition(notification.id, SendStatus::Canceled, now, |status| {
                status == SendStatus::Prepare
            })
            .ok_or_else(|| missing(notification))
    }

    async fn mark_timeout_sending_as_failed(
        &self,
        stale_before: DateTime<Utc>,
        batch_size: u64,
    ) -> Result<Vec<Notification>, NotificationStoreError> {
        let now = self.clock.utc();
        let take = usize::try_from(batch_size).unwrap_or(usize::MAX);
        let mut state = self.state();
        let stale: Vec<Notification> = state
            .notifications
            .values()
            .filter(|stored| {
                stored.notification.status == SendStatus::Sending
                    && stored.updated_at <= stale_before
            })
            .take(take)
            .map(|stored| stored.notification.clone())
            .collect();
        for notification in &stale {
            state.set_status(notification.id, SendStatus::Failed, now);
        }
        Ok(stale)
    }
}

#[async_trait]
impl CallbackLogStore for InMemoryNotificationStore {
    async fn find_pending(
        &self,
        due_before: DateTime<Utc>,
        start_id: i64,
        batch_size: u64,
    ) -> Result<CallbackLogPage, CallbackLogStoreError> {
        let take = usize::try_from(batch_size).unwrap_or(usize::MAX);
        let logs = self
            .state()
            .callback_logs
            .range(start_id.saturating_add(1)..)
            .map(|(_, log)| log)
            .filter(|log| log.status == CallbackLogStatus::Pending && log.next_retry_time <= due_before)
            .take(take)
            .cloned()
            .collect();
        Ok(CallbackLogPage::new(logs))
    }

    async fn find_by_notification_ids(
        &self,
        notification_ids: &[NotificationId],
    ) -> Result<Vec<CallbackLog>, CallbackLogStoreError> {
        Ok(self
            .state()
            .callback_logs
            .values()
            .filter(|log| notification_ids.contains(&log.notification_id))
            .cloned()
            .collect())
    }

    async fn update(&self, logs: &[CallbackLog]) -> Result<(), CallbackLogStoreError> {
        let mut state = self.state();
        for log in logs {
            if let Some(existing) = state.callback_logs.get_mut(&log.id) {
                existing.retry_count = log.retry_count;
                existing.next_retry_time = log.next_retry_time;
                existing.status = log.status;
            }
        }
        Ok(())
    }
}
