//! In-process doubles for the notification ports.
//!
//! Compiled for unit tests and, through the `test-support` feature, for the
//! integration suites under `tests/`.

mod clock;
mod memory_quota;
mod memory_store;

pub use clock::MutableClock;
pub use memory_quota::InMemoryQuotaCache;
pub use memory_store::InMemoryNotificationStore;
