//! Port abstraction for callback log retrieval and updates.
//!
//! Callback logs are written by the [`super::NotificationStore`] alongside
//! their notifications. This port serves the callback worker, which pages
//! through due `PENDING` logs and records delivery attempts.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{CallbackLog, CallbackLogPage, NotificationId};

use super::define_port_error;

define_port_error! {
    /// Errors raised by callback log store adapters.
    pub enum CallbackLogStoreError {
        /// Store connection could not be established.
        Connection { message: String } => "callback log store connection failed: {message}",
        /// Query or mutation failed during execution.
        Query { message: String } => "callback log store query failed: {message}",
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CallbackLogStore: Send + Sync {
    /// Page through `PENDING` logs due at `due_before`, ordered by id and
    /// starting after `start_id`.
    async fn find_pending(
        &self,
        due_before: DateTime<Utc>,
        start_id: i64,
        batch_size: u64,
    ) -> Result<CallbackLogPage, CallbackLogStoreError>;

    async fn find_by_notification_ids(
        &self,
        notification_ids: &[NotificationId],
    ) -> Result<Vec<CallbackLog>, CallbackLogStoreError>;

    /// Persist retry count, next retry time and status for every log in one
    /// transaction.
    async fn update(&self, logs: &[CallbackLog]) -> Result<(), CallbackLogStoreError>;
}
