//! PostgreSQL persistence adapters using Diesel ORM.
//!
//! Row structs (`models.rs`) and the schema (`schema.rs`) stay private to
//! this module; adapters translate to domain types and map every database
//! failure onto the port error types.
//!
//! ```ignore
//! use notification_platform::outbound::persistence::{
//!     DbPool, DieselNotificationStore, PoolConfig,
//! };
//!
//! let pool = DbPool::new(PoolConfig::new("postgres://localhost/notify")).await?;
//! let store = DieselNotificationStore::new(pool);
//! ```

mod diesel_error_mapping;
mod diesel_notification_store;
mod migrations;
mod models;
mod pool;
mod schema;

pub use diesel_notification_store::DieselNotificationStore;
pub use migrations::{MigrationError, run_migrations};
pub use pool::{DbPool, PoolConfig, PoolError};
