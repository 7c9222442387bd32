//! Domain ports and supporting types for the hexagonal boundary.

mod macros;
pub(crate) use macros::define_port_error;

mod callback_log_store;
mod id_generator;
mod notification_intake;
mod notification_repository;
mod notification_store;
mod quota_cache;

#[cfg(test)]
pub use callback_log_store::MockCallbackLogStore;
pub use callback_log_store::{CallbackLogStore, CallbackLogStoreError};
#[cfg(test)]
pub use id_generator::MockNotificationIdGenerator;
pub use id_generator::{IdGeneratorError, NotificationIdGenerator};
#[cfg(test)]
pub use notification_intake::{MockNotificationIntake, MockTransactionalNotifications};
pub use notification_intake::{NotificationIntake, TransactionalNotifications};
#[cfg(test)]
pub use notification_repository::MockNotificationRepository;
pub use notification_repository::NotificationRepository;
#[cfg(test)]
pub use notification_store::MockNotificationStore;
pub use notification_store::{NotificationStore, NotificationStoreError};
#[cfg(test)]
pub use quota_cache::MockQuotaCache;
pub use quota_cache::{QuotaCache, QuotaCacheError};
