//! Notification lifecycle engine: quota-backed creation, status transitions,
//! and failure compensation.

mod reservation;
mod service;

pub use service::{LifecycleConfig, NotificationLifecycleService};
