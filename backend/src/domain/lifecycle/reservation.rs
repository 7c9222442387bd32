//! Quota reservations held while a notification is being persisted.
//!
//! A reservation owns the deltas it took from the counter store. It is
//! settled exactly once: [`QuotaReservation::commit`] keeps the quota spent,
//! [`QuotaReservation::release`] gives it back. Dropping a reservation that
//! was never settled (the caller's future was cancelled mid-persist) refunds
//! on a detached task so the quota does not leak.

use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tracing::{debug, error, warn};

use crate::domain::ports::{QuotaCache, QuotaCacheError};
use crate::domain::{QuotaDelta, QuotaKey};

pub(super) struct QuotaReservation<Q>
where
    Q: QuotaCache + 'static,
{
    quota: Arc<Q>,
    deltas: Vec<QuotaDelta>,
    timeout: Duration,
    armed: bool,
}

impl<Q> QuotaReservation<Q>
where
    Q: QuotaCache + 'static,
{
    /// Take one unit from `key`.
    pub(super) async fn reserve_one(
        quota: Arc<Q>,
        key: QuotaKey,
        timeout: Duration,
    ) -> Result<Self, QuotaCacheError> {
        quota.decr(key, 1).await?;
        Ok(Self {
            quota,
            deltas: vec![QuotaDelta { key, amount: 1 }],
            timeout,
            armed: true,
        })
    }

    /// Take every delta atomically or none at all.
    pub(super) async fn reserve_batch(
        quota: Arc<Q>,
        deltas: Vec<QuotaDelta>,
        timeout: Duration,
    ) -> Result<Self, QuotaCacheError> {
        quota.multi_decr(&deltas).await?;
        Ok(Self {
            quota,
            deltas,
            timeout,
            armed: true,
        })
    }

    /// Keep the quota spent.
    pub(super) fn commit(mut self) {
        self.armed = false;
    }

    /// Refund after a confirmed persistence failure.
    ///
    /// The refund runs on its own task with a fresh timeout, so cancelling
    /// the caller while it waits here does not abandon it.
    pub(super) async fn release(mut self) {
        self.armed = false;
        let quota = Arc::clone(&self.quota);
        let deltas = std::mem::take(&mut self.deltas);
        let timeout = self.timeout;
        let task = tokio::spawn(async move { refund(quota.as_ref(), &deltas, timeout).await });
        if let Err(err) = task.await {
            error!(error = %err, "quota refund task did not complete");
        }
    }
}

impl<Q> Drop for QuotaReservation<Q>
where
    Q: QuotaCache + 'static,
{
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let deltas = std::mem::take(&mut self.deltas);
        match Handle::try_current() {
            Ok(handle) => {
                warn!(keys = deltas.len(), "reservation abandoned, refunding in background");
                let quota = Arc::clone(&self.quota);
                let timeout = self.timeout;
                drop(handle.spawn(async move { refund(quota.as_ref(), &deltas, timeout).await }));
            }
            Err(_) => {
                error!(
                    keys = deltas.len(),
                    "reservation abandoned outside a runtime, quota not refunded"
                );
            }
        }
    }
}

/// Give `deltas` back, logging instead of failing.
///
/// Refunds are secondary effects; the caller already has the error or
/// outcome that matters.
pub(super) async fn refund<Q>(quota: &Q, deltas: &[QuotaDelta], timeout: Duration)
where
    Q: QuotaCache + ?Sized,
{
    let attempt = async {
        match deltas {
            [] => Ok(()),
            [single] => quota.incr(single.key, single.amount).await,
            many => quota.multi_incr(many).await,
        }
    };
    match tokio::time::timeout(timeout, attempt).await {
        Ok(Ok(())) => debug!(keys = deltas.len(), "quota refunded"),
        Ok(Err(err)) => error!(error = %err, keys = deltas.len(), "quota refund failed"),
        Err(_) => error!(
            timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            keys = deltas.len(),
            "quota refund timed out"
        ),
    }
}
