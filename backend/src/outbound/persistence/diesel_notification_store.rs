//! PostgreSQL-backed `NotificationStore` and `CallbackLogStore` via Diesel.
//!
//! Every multi-statement operation runs in one transaction: notification plus
//! callback log inserts, batch inserts (chunked), succeeded/failed settlement,
//! and the stale-send sweep.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use tracing::debug;

use crate::domain::ports::{
    CallbackLogStore, CallbackLogStoreError, NotificationStore, NotificationStoreError,
};
use crate::domain::{
    BizId, CallbackLog, CallbackLogPage, CallbackLogStatus, Notification, NotificationId,
    SendStatus,
};

use super::diesel_error_mapping::{
    WriteError, map_callback_diesel_error, map_callback_pool_error, map_diesel_error,
    map_insert_error, map_pool_error,
};
use super::models::{
    CallbackLogRow, NewCallbackLogRow, NewNotificationRow, NotificationRow, id_to_db, ids_to_db,
    version_to_db,
};
use super::pool::DbPool;
use super::schema::{callback_logs, notifications};

/// Rows per `INSERT` statement inside a batch transaction.
const INSERT_CHUNK_SIZE: usize = 100;

const TERMINAL_STATUSES: [&str; 3] = [
    SendStatus::Succeeded.as_str(),
    SendStatus::Failed.as_str(),
    SendStatus::Canceled.as_str(),
];

const LIVE_STATUSES: [&str; 3] = [
    SendStatus::Prepare.as_str(),
    SendStatus::Pending.as_str(),
    SendStatus::Sending.as_str(),
];

/// `SET status = ?, version = version + 1, updated_at = NOW()`.
macro_rules! status_change {
    ($status:expr) => {
        (
            notifications::status.eq($status.as_str()),
            notifications::version.eq(notifications::version + 1),
            notifications::updated_at.eq(diesel::dsl::now),
        )
    };
}

/// Diesel-backed notification and callback log store.
#[derive(Clone)]
pub struct DieselNotificationStore {
    pool: DbPool,
}

impl DieselNotificationStore {
    /// Create a new store with the given connection pool.
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn insert(
        &self,
        batch: &[Notification],
        with_callback_log: bool,
    ) -> Result<Vec<Notification>, NotificationStoreError> {
        let new_rows = batch
            .iter()
            .map(NewNotificationRow::from_domain)
            .collect::<Result<Vec<_>, _>>()
            .map_err(NotificationStoreError::query)?;
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;

        let stored = conn
            .transaction::<_, WriteError, _>(|conn| {
                async move {
                    let mut stored = Vec::with_capacity(new_rows.len());
                    for chunk in new_rows.chunks(INSERT_CHUNK_SIZE) {
                        let inserted: Vec<NotificationRow> =
                            diesel::insert_into(notifications::table)
                                .values(chunk)
                                .returning(NotificationRow::as_returning())
                                .get_results(conn)
                                .await?;
                        stored.extend(inserted);
                    }

                    if with_callback_log {
                        let logs: Vec<NewCallbackLogRow> = stored
                            .iter()
                            .map(|row| NewCallbackLogRow {
                                notification_id: row.id,
                                status: CallbackLogStatus::Init.as_str(),
                            })
                            .collect();
                        for chunk in logs.chunks(INSERT_CHUNK_SIZE) {
                            diesel::insert_into(callback_logs::table)
                                .values(chunk)
                                .execute(conn)
                                .await
                                .map_err(WriteError::CallbackLog)?;
                        }
                    }

                    Ok(stored)
                }
                .scope_boxed()
            })
            .await
            .map_err(NotificationStoreError::from)?;

        debug!(count = stored.len(), with_callback_log, "notifications inserted");
        rows_to_domain(stored)
    }

    async fn set_status(
        &self,
        notification: &Notification,
        status: SendStatus,
    ) -> Result<(), NotificationStoreError> {
        let id = id_to_db(notification.id).map_err(NotificationStoreError::query)?;
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;

        let updated = diesel::update(notifications::table.filter(notifications::id.eq(id)))
            .set(status_change!(status))
            .execute(&mut conn)
            .await
            .map_err(map_diesel_error)?;

        if updated == 0 {
            return Err(NotificationStoreError::not_found(format!(
                "id {}",
                notification.id
            )));
        }
        Ok(())
    }

    /// Move the row to `status` only while it is in one of `from`.
    async fn transition(
        &self,
        notification: &Notification,
        status: SendStatus,
        from: &[&'static str],
    ) -> Result<bool, NotificationStoreError> {
        let id = id_to_db(notification.id).map_err(NotificationStoreError::query)?;
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;

        let updated = diesel::update(
            notifications::table
                .filter(notifications::id.eq(id))
                .filter(notifications::status.eq_any(from.to_vec())),
        )
        .set(status_change!(status))
        .execute(&mut conn)
        .await
        .map_err(map_diesel_error)?;
        if updated > 0 {
            return Ok(true);
        }
        refused(&mut conn, notification, status).await
    }
}

/// Zero rows matched a guarded transition: `Ok(false)` when the row exists
/// and `NotFound` otherwise.
async fn refused(
    conn: &mut AsyncPgConnection,
    notification: &Notification,
    status: SendStatus,
) -> Result<bool, NotificationStoreError> {
    let id = id_to_db(notification.id).map_err(NotificationStoreError::query)?;
    let exists: bool = diesel::select(diesel::dsl::exists(
        notifications::table.filter(notifications::id.eq(id)),
    ))
    .get_result(conn)
    .await
    .map_err(map_diesel_error)?;
    if exists {
        debug!(notification_id = notification.id, %status, "transition refused");
        Ok(false)
    } else {
        Err(NotificationStoreError::not_found(format!(
            "id {}",
            notification.id
        )))
    }
}

fn ids_from_db(ids: Vec<i64>) -> Result<Vec<NotificationId>, NotificationStoreError> {
    ids.into_iter()
        .map(|id| {
            NotificationId::try_from(id)
                .map_err(|_| NotificationStoreError::query(format!("negative notification id {id}")))
        })
        .collect()
}

fn rows_to_domain(rows: Vec<NotificationRow>) -> Result<Vec<Notification>, NotificationStoreError> {
    rows.into_iter()
        .map(Notification::try_from)
        .collect::<Result<Vec<_>, _>>()
        .map_err(NotificationStoreError::query)
}

fn row_to_domain(row: NotificationRow) -> Result<Notification, NotificationStoreError> {
    Notification::try_from(row).map_err(NotificationStoreError::query)
}

#[async_trait]
impl NotificationStore for DieselNotificationStore {
    async fn create(
        &self,
        notification: &Notification,
    ) -> Result<Notification, NotificationStoreError> {
        let row = NewNotificationRow::from_domain(notification)
            .map_err(NotificationStoreError::query)?;
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;

        let stored: NotificationRow = diesel::insert_into(notifications::table)
            .values(&row)
            .returning(NotificationRow::as_returning())
            .get_result(&mut conn)
            .await
            .map_err(map_insert_error)?;

        row_to_domain(stored)
    }

    async fn create_with_callback_log(
        &self,
        notification: &Notification,
    ) -> Result<Notification, NotificationStoreError> {
        let mut stored = self
            .insert(std::slice::from_ref(notification), true)
            .await?;
        stored
            .pop()
            .ok_or_else(|| NotificationStoreError::query("insert returned no row"))
    }

    async fn batch_create(
        &self,
        notifications: &[Notification],
    ) -> Result<Vec<Notification>, NotificationStoreError> {
        if notifications.is_empty() {
            return Ok(Vec::new());
        }
        self.insert(notifications, false).await
    }

    async fn batch_create_with_callback_log(
        &self,
        notifications: &[Notification],
    ) -> Result<Vec<Notification>, NotificationStoreError> {
        if notifications.is_empty() {
            return Ok(Vec::new());
        }
        self.insert(notifications, true).await
    }

    async fn get_by_id(&self, id: NotificationId) -> Result<Notification, NotificationStoreError> {
        let db_id = id_to_db(id).map_err(NotificationStoreError::query)?;
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;

        let row: Option<NotificationRow> = notifications::table
            .filter(notifications::id.eq(db_id))
            .select(NotificationRow::as_select())
            .first(&mut conn)
            .await
            .optional()
            .map_err(map_diesel_error)?;

        match row {
            Some(found) => row_to_domain(found),
            None => Err(NotificationStoreError::not_found(format!("id {id}"))),
        }
    }

    async fn batch_get_by_ids(
        &self,
        ids: &[NotificationId],
    ) -> Result<HashMap<NotificationId, Notification>, NotificationStoreError> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let db_ids = ids_to_db(ids).map_err(NotificationStoreError::query)?;
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;

        let rows: Vec<NotificationRow> = notifications::table
            .filter(notifications::id.eq_any(db_ids))
            .select(NotificationRow::as_select())
            .load(&mut conn)
            .await
            .map_err(map_diesel_error)?;

        Ok(rows_to_domain(rows)?
            .into_iter()
            .map(|notification| (notification.id, notification))
            .collect())
    }

    async fn get_by_key(
        &self,
        biz_id: BizId,
        key: &str,
    ) -> Result<Notification, NotificationStoreError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;

        let row: Option<NotificationRow> = notifications::table
            .filter(notifications::biz_id.eq(biz_id))
            .filter(notifications::key.eq(key))
            .select(NotificationRow::as_select())
            .first(&mut conn)
            .await
            .optional()
            .map_err(map_diesel_error)?;

        match row {
            Some(found) => row_to_domain(found),
            None => Err(NotificationStoreError::not_found(format!(
                "biz {biz_id} key {key}"
            ))),
        }
    }

    async fn get_by_keys(
        &self,
        biz_id: BizId,
        keys: &[String],
    ) -> Result<Vec<Notification>, NotificationStoreError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;

        let rows: Vec<NotificationRow> = notifications::table
            .filter(notifications::biz_id.eq(biz_id))
            .filter(notifications::key.eq_any(keys))
            .select(NotificationRow::as_select())
            .order(notifications::id.asc())
            .load(&mut conn)
            .await
            .map_err(map_diesel_error)?;

        rows_to_domain(rows)
    }

    async fn cas_status(&self, notification: &Notification) -> Result<(), NotificationStoreError> {
        let id = id_to_db(notification.id).map_err(NotificationStoreError::query)?;
        let expected = version_to_db(notification.version).map_err(NotificationStoreError::query)?;
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;

        let updated = diesel::update(
            notifications::table
                .filter(notifications::id.eq(id))
                .filter(notifications::version.eq(expected))
                .filter(notifications::status.ne_all(TERMINAL_STATUSES.to_vec())),
        )
        .set(status_change!(notification.status))
        .execute(&mut conn)
        .await
        .map_err(map_diesel_error)?;

        if updated == 0 {
            return Err(NotificationStoreError::version_mismatch(
                notification.id,
                notification.version,
            ));
        }
        Ok(())
    }

    async fn update_status(
        &self,
        notification: &Notification,
    ) -> Result<(), NotificationStoreError> {
        self.set_status(notification, notification.status).await
    }

    async fn batch_update_status_succeeded_or_failed(
        &self,
        succeeded: &[Notification],
        failed: &[Notification],
    ) -> Result<Vec<NotificationId>, NotificationStoreError> {
        let succeeded_ids: Vec<i64> = succeeded
            .iter()
            .map(|n| id_to_db(n.id))
            .collect::<Result<_, _>>()
            .map_err(NotificationStoreError::query)?;
        let failed_ids: Vec<i64> = failed
            .iter()
            .map(|n| id_to_db(n.id))
            .collect::<Result<_, _>>()
            .map_err(NotificationStoreError::query)?;
        if succeeded_ids.is_empty() && failed_ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;

        let moved_to_failed = conn
            .transaction::<_, diesel::result::Error, _>(|conn| {
                async move {
                    if !succeeded_ids.is_empty() {
                        let delivered: Vec<i64> = diesel::update(
                            notifications::table
                                .filter(notifications::id.eq_any(&succeeded_ids))
                                .filter(notifications::status.eq_any(LIVE_STATUSES.to_vec())),
                        )
                        .set(status_change!(SendStatus::Succeeded))
                        .returning(notifications::id)
                        .get_results(conn)
                        .await?;
                        diesel::update(
                            callback_logs::table
                                .filter(callback_logs::notification_id.eq_any(&delivered)),
                        )
                        .set((
                            callback_logs::status.eq(CallbackLogStatus::Pending.as_str()),
                            callback_logs::updated_at.eq(diesel::dsl::now),
                        ))
                        .execute(conn)
                        .await?;
                    }
                    if failed_ids.is_empty() {
                        return Ok(Vec::new());
                    }
                    diesel::update(
                        notifications::table
                            .filter(notifications::id.eq_any(&failed_ids))
                            .filter(notifications::status.eq_any(LIVE_STATUSES.to_vec())),
                    )
                    .set(status_change!(SendStatus::Failed))
                    .returning(notifications::id)
                    .get_results::<i64>(conn)
                    .await
                }
                .scope_boxed()
            })
            .await
            .map_err(map_diesel_error)?;

        ids_from_db(moved_to_failed)
    }

    async fn find_ready(
        &self,
        now: DateTime<Utc>,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<Notification>, NotificationStoreError> {
        let offset = i64::try_from(offset).map_err(|_| NotificationStoreError::query("offset too large"))?;
        let limit = i64::try_from(limit).map_err(|_| NotificationStoreError::query("limit too large"))?;
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;

        let rows: Vec<NotificationRow> = notifications::table
            .filter(notifications::status.eq(SendStatus::Pending.as_str()))
            .filter(notifications::scheduled_stime.le(now))
            .filter(notifications::scheduled_etime.ge(now))
            .select(NotificationRow::as_select())
            .order(notifications::id.asc())
            .offset(offset)
            .limit(limit)
            .load(&mut conn)
            .await
            .map_err(map_diesel_error)?;

        rows_to_domain(rows)
    }

    async fn mark_success(
        &self,
        notification: &Notification,
    ) -> Result<bool, NotificationStoreError> {
        let id = id_to_db(notification.id).map_err(NotificationStoreError::query)?;
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;

        let updated = conn
            .transaction::<_, diesel::result::Error, _>(|conn| {
                async move {
                    let updated = diesel::update(
                        notifications::table
                            .filter(notifications::id.eq(id))
                            .filter(notifications::status.eq_any(LIVE_STATUSES.to_vec())),
                    )
                    .set(status_change!(SendStatus::Succeeded))
                    .execute(conn)
                    .await?;
                    if updated == 0 {
                        return Ok(None);
                    }
                    diesel::update(
                        callback_logs::table.filter(callback_logs::notification_id.eq(id)),
                    )
                    .set((
                        callback_logs::status.eq(CallbackLogStatus::Pending.as_str()),
                        callback_logs::updated_at.eq(diesel::dsl::now),
                    ))
                    .execute(conn)
                    .await?;
                    Ok(Some(updated))
                }
                .scope_boxed()
            })
            .await
            .map_err(map_diesel_error)?;

        match updated {
            Some(_) => Ok(true),
            None => refused(&mut conn, notification, SendStatus::Succeeded).await,
        }
    }

    async fn mark_failed(
        &self,
        notification: &Notification,
    ) -> Result<bool, NotificationStoreError> {
        self.transition(notification, SendStatus::Failed, &LIVE_STATUSES)
            .await
    }

    async fn cancel_prepared(
        &self,
        notification: &Notification,
    ) -> Result<bool, NotificationStoreError> {
        self.transition(
            notification,
            SendStatus::Canceled,
            &[SendStatus::Prepare.as_str()],
        )
        .await
    }

    async fn mark_timeout_sending_as_failed(
        &self,
        stale_before: DateTime<Utc>,
        batch_size: u64,
    ) -> Result<Vec<Notification>, NotificationStoreError> {
        let limit = i64::try_from(batch_size)
            .map_err(|_| NotificationStoreError::query("batch size too large"))?;
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;

        let swept = conn
            .transaction::<_, diesel::result::Error, _>(|conn| {
                async move {
                    let rows: Vec<NotificationRow> = notifications::table
                        .filter(notifications::status.eq(SendStatus::Sending.as_str()))
                        .filter(notifications::updated_at.le(stale_before))
                        .select(NotificationRow::as_select())
                        .order(notifications::id.asc())
                        .limit(limit)
                        .for_update()
                        .skip_locked()
                        .load(conn)
                        .await?;
                    if rows.is_empty() {
                        return Ok(rows);
                    }

                    let ids: Vec<i64> = rows.iter().map(|row| row.id).collect();
                    diesel::update(notifications::table.filter(notifications::id.eq_any(ids)))
                        .set(status_change!(SendStatus::Failed))
                        .execute(conn)
                        .await?;
                    Ok(rows)
                }
                .scope_boxed()
            })
            .await
            .map_err(map_diesel_error)?;

        debug!(count = swept.len(), %stale_before, "stale sends failed");
        rows_to_domain(swept)
    }
}

#[async_trait]
impl CallbackLogStore for DieselNotificationStore {
    async fn find_pending(
        &self,
        due_before: DateTime<Utc>,
        start_id: i64,
        batch_size: u64,
    ) -> Result<CallbackLogPage, CallbackLogStoreError> {
        let limit = i64::try_from(batch_size)
            .map_err(|_| CallbackLogStoreError::query("batch size too large"))?;
        let mut conn = self.pool.get().await.map_err(map_callback_pool_error)?;

        let rows: Vec<CallbackLogRow> = callback_logs::table
            .filter(callback_logs::next_retry_time.le(due_before))
            .filter(callback_logs::status.eq(CallbackLogStatus::Pending.as_str()))
            .filter(callback_logs::id.gt(start_id))
            .select(CallbackLogRow::as_select())
            .order(callback_logs::id.asc())
            .limit(limit)
            .load(&mut conn)
            .await
            .map_err(map_callback_diesel_error)?;

        let logs = rows
            .into_iter()
            .map(CallbackLog::try_from)
            .collect::<Result<Vec<_>, _>>()
            .map_err(CallbackLogStoreError::query)?;
        Ok(CallbackLogPage::new(logs))
    }

    async fn find_by_notification_ids(
        &self,
        notification_ids: &[NotificationId],
    ) -> Result<Vec<CallbackLog>, CallbackLogStoreError> {
        if notification_ids.is_empty() {
            return Ok(Vec::new());
        }
        let db_ids = ids_to_db(notification_ids).map_err(CallbackLogStoreError::query)?;
        let mut conn = self.pool.get().await.map_err(map_callback_pool_error)?;

        let rows: Vec<CallbackLogRow> = callback_logs::table
            .filter(callback_logs::notification_id.eq_any(db_ids))
            .select(CallbackLogRow::as_select())
            .order(callback_logs::id.asc())
            .load(&mut conn)
            .await
            .map_err(map_callback_diesel_error)?;

        rows.into_iter()
            .map(CallbackLog::try_from)
            .collect::<Result<Vec<_>, _>>()
            .map_err(CallbackLogStoreError::query)
    }

    async fn update(&self, logs: &[CallbackLog]) -> Result<(), CallbackLogStoreError> {
        if logs.is_empty() {
            return Ok(());
        }
        let changes = logs
            .iter()
            .map(|log| {
                i32::try_from(log.retry_count)
                    .map(|retry_count| (log.id, retry_count, log.next_retry_time, log.status))
                    .map_err(|_| format!("callback log {} retry count out of range", log.id))
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(CallbackLogStoreError::query)?;
        let mut conn = self.pool.get().await.map_err(map_callback_pool_error)?;

        conn.transaction::<_, diesel::result::Error, _>(|conn| {
            async move {
                for (id, retry_count, next_retry_time, status) in changes {
                    diesel::update(callback_logs::table.filter(callback_logs::id.eq(id)))
                        .set((
                            callback_logs::retry_count.eq(retry_count),
                            callback_logs::next_retry_time.eq(next_retry_time),
                            callback_logs::status.eq(status.as_str()),
                            callback_logs::updated_at.eq(diesel::dsl::now),
                        ))
                        .execute(conn)
                        .await?;
                }
                Ok(())
            }
            .scope_boxed()
        })
        .await
        .map_err(map_callback_diesel_error)
    }
}

#[cfg(test)]
mod tests {
    //! Regression coverage for helpers that do not need a live database.
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn terminal_statuses_cover_every_terminal_state() {
        for status in [
            SendStatus::Prepare,
            SendStatus::Canceled,
            SendStatus::Pending,
            SendStatus::Sending,
            SendStatus::Succeeded,
            SendStatus::Failed,
        ] {
            assert_eq!(
                TERMINAL_STATUSES.contains(&status.as_str()),
                status.is_terminal(),
                "{status}"
            );
        }
    }

    #[rstest]
    fn chunking_splits_large_batches() {
        let ids: Vec<u32> = (0..250).collect();
        let sizes: Vec<usize> = ids.chunks(INSERT_CHUNK_SIZE).map(<[u32]>::len).collect();
        assert_eq!(sizes, vec![100, 100, 50]);
    }
}
