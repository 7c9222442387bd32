//! Diesel error mapping shared by the notification and callback log adapters.

use diesel::result::{DatabaseErrorKind, Error as DieselError};
use tracing::debug;

use crate::domain::ports::{CallbackLogStoreError, NotificationStoreError};

use super::pool::PoolError;

/// Extract a readable message from a pool error.
pub(crate) fn pool_error_message(error: PoolError) -> String {
    match error {
        PoolError::Checkout { message } | PoolError::Build { message } => message,
    }
}

fn log_diesel_error(error: &DieselError) {
    match error {
        DieselError::DatabaseError(kind, info) => {
            debug!(?kind, message = info.message(), "diesel operation failed");
        }
        _ => debug!(
            error_type = %std::any::type_name_of_val(error),
            "diesel operation failed"
        ),
    }
}

/// Map common Diesel error variants into query/connection constructors.
fn map_basic_diesel_error<E, Q, C>(error: DieselError, query: Q, connection: C) -> E
where
    Q: Fn(String) -> E,
    C: Fn(String) -> E,
{
    log_diesel_error(&error);
    match error {
        DieselError::NotFound => query("record not found".to_owned()),
        DieselError::QueryBuilderError(_) => query("database query error".to_owned()),
        DieselError::DatabaseError(DatabaseErrorKind::ClosedConnection, _) => {
            connection("database connection error".to_owned())
        }
        DieselError::DatabaseError(_, info) => query(info.message().to_owned()),
        other => query(other.to_string()),
    }
}

pub(crate) fn map_pool_error(error: PoolError) -> NotificationStoreError {
    NotificationStoreError::connection(pool_error_message(error))
}

pub(crate) fn map_diesel_error(error: DieselError) -> NotificationStoreError {
    map_basic_diesel_error(
        error,
        NotificationStoreError::query,
        NotificationStoreError::connection,
    )
}

/// Map errors from a notification insert, classifying unique violations on
/// `(biz_id, key)` or `id` as duplicates.
pub(crate) fn map_insert_error(error: DieselError) -> NotificationStoreError {
    match error {
        DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, info) => {
            debug!(
                constraint = info.constraint_name(),
                "notification insert hit unique constraint"
            );
            NotificationStoreError::duplicate(info.message().to_owned())
        }
        other => map_diesel_error(other),
    }
}

pub(crate) fn map_callback_pool_error(error: PoolError) -> CallbackLogStoreError {
    CallbackLogStoreError::connection(pool_error_message(error))
}

pub(crate) fn map_callback_diesel_error(error: DieselError) -> CallbackLogStoreError {
    map_basic_diesel_error(
        error,
        CallbackLogStoreError::query,
        CallbackLogStoreError::connection,
    )
}

/// Failure raised inside a write transaction, remembering which statement
/// failed so callback log errors stay distinguishable from notification
/// insert errors.
#[derive(Debug)]
pub(crate) enum WriteError {
    Notification(DieselError),
    CallbackLog(DieselError),
}

impl From<DieselError> for WriteError {
    fn from(error: DieselError) -> Self {
        Self::Notification(error)
    }
}

impl From<WriteError> for NotificationStoreError {
    fn from(error: WriteError) -> Self {
        match error {
            WriteError::Notification(inner) => map_insert_error(inner),
            WriteError::CallbackLog(inner) => {
                log_diesel_error(&inner);
                Self::callback_log_creation(inner.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn pool_errors_map_to_connection() {
        let err = map_pool_error(PoolError::checkout("timed out"));
        assert_eq!(err, NotificationStoreError::connection("timed out"));
    }

    #[rstest]
    fn not_found_maps_to_query() {
        let err = map_diesel_error(DieselError::NotFound);
        assert!(matches!(err, NotificationStoreError::Query { .. }));
    }

    #[rstest]
    fn rollback_marker_maps_to_query_on_insert() {
        let err = map_insert_error(DieselError::RollbackTransaction);
        assert!(matches!(err, NotificationStoreError::Query { .. }));
    }

    #[rstest]
    fn callback_write_errors_stay_distinct() {
        let err = NotificationStoreError::from(WriteError::CallbackLog(DieselError::NotFound));
        assert!(matches!(err, NotificationStoreError::CallbackLogCreation { .. }));
    }

    #[rstest]
    fn callback_store_pool_errors_map_to_connection() {
        let err = map_callback_pool_error(PoolError::build("bad url"));
        assert_eq!(err, CallbackLogStoreError::connection("bad url"));
    }
}
