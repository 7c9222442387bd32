//! Domain primitives, aggregates, and services.
//!
//! Purpose: define the notification aggregate, its send-status machine, and
//! quota accounting, plus the services that drive them through the ports in
//! [`ports`]. Adapters live under `crate::outbound`.
//!
//! Public surface:
//! - Error / ErrorCode: transport-agnostic failure payload.
//! - Notification, NotificationDraft, SendStrategy: the unit of work and how
//!   its send window is chosen.
//! - NotificationLifecycleService: quota-backed creation and transitions.
//! - NotificationIntakeService: direct sends and prepare/commit/cancel.

pub mod callback_log;
pub mod error;
pub mod intake;
pub mod lifecycle;
pub mod notification;
pub mod ports;
pub mod quota;
pub mod send_strategy;

pub use self::callback_log::{CallbackLog, CallbackLogPage, CallbackLogStatus};
pub use self::error::{Error, ErrorCode};
pub use self::intake::NotificationIntakeService;
pub use self::lifecycle::{LifecycleConfig, NotificationLifecycleService};
pub use self::notification::{
    BizId, Channel, Notification, NotificationDraft, NotificationId, NotificationValidationError,
    ParseEnumError, SendStatus, Template,
};
pub use self::quota::{Quota, QuotaDelta, QuotaKey, aggregate_quota_deltas};
pub use self::send_strategy::{SendStrategy, SendStrategyError, SendWindow};
