//! Port abstraction for the quota counter store.
//!
//! Counters are addressed by [`QuotaKey`]. Increments follow a
//! reset-if-not-positive rule: a counter that is absent, zero, or negative is
//! set to the increment instead of being added to. Batched decrements are all
//! or nothing.

use async_trait::async_trait;

use crate::domain::{Quota, QuotaDelta, QuotaKey};

use super::define_port_error;

define_port_error! {
    /// Errors raised by quota cache adapters.
    pub enum QuotaCacheError {
        /// Counter store connection could not be established.
        Connection { message: String } => "quota cache connection failed: {message}",
        /// A counter command or script failed.
        Command { message: String } => "quota cache command failed: {message}",
        /// The counter for `key` cannot cover the requested amount.
        Exhausted { key: String } => "quota exhausted for {key}",
        /// No counter exists for `key`.
        NotFound { key: String } => "quota not found for {key}",
    }
}

/// Port for atomic quota counters.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait QuotaCache: Send + Sync {
    /// Read the remaining quota for `key`.
    async fn find(&self, key: QuotaKey) -> Result<Quota, QuotaCacheError>;

    /// Overwrite counters with the given values.
    async fn create_or_update(&self, quotas: &[Quota]) -> Result<(), QuotaCacheError>;

    /// Add `amount`, resetting a non-positive or missing counter to `amount`.
    async fn incr(&self, key: QuotaKey, amount: i64) -> Result<(), QuotaCacheError>;

    /// Subtract `amount`.
    ///
    /// The subtraction is applied even when it overshoots below zero; the
    /// caller then receives [`QuotaCacheError::Exhausted`].
    async fn decr(&self, key: QuotaKey, amount: i64) -> Result<(), QuotaCacheError>;

    /// Apply [`QuotaCache::incr`] semantics to every delta atomically.
    async fn multi_incr(&self, deltas: &[QuotaDelta]) -> Result<(), QuotaCacheError>;

    /// Subtract every delta, or none of them.
    ///
    /// When any counter is short, nothing is decremented and the first short
    /// key is reported through [`QuotaCacheError::Exhausted`].
    async fn multi_decr(&self, deltas: &[QuotaDelta]) -> Result<(), QuotaCacheError>;
}
