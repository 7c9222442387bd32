use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::domain::ports::{QuotaCache, QuotaCacheError};
use crate::domain::{Quota, QuotaDelta, QuotaKey};

/// Quota counters held in a map, following the Redis adapter's rules.
#[derive(Default)]
pub struct InMemoryQuotaCache {
    counters: Mutex<HashMap<QuotaKey, i64>>,
}

impl InMemoryQuotaCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed or overwrite a counter.
    pub fn set(&self, key: QuotaKey, value: i64) {
        self.counters().insert(key, value);
    }

    /// Current counter value, `None` when the key was never written.
    pub fn value(&self, key: QuotaKey) -> Option<i64> {
        self.counters().get(&key).copied()
    }

    fn counters(&self) -> MutexGuard<'_, HashMap<QuotaKey, i64>> {
        self.counters.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn add(counters: &mut HashMap<QuotaKey, i64>, key: QuotaKey, amount: i64) {
    let counter = counters.entry(key).or_insert(0);
    if *counter <= 0 {
        *counter = amount;
    } else {
        *counter += amount;
    }
}

#[async_trait]
impl QuotaCache for InMemoryQuotaCache {
    async fn find(&self, key: QuotaKey) -> Result<Quota, QuotaCacheError> {
        self.value(key)
            .map(|quota| Quota {
                biz_id: key.biz_id,
                channel: key.channel,
                quota,
            })
            .ok_or_else(|| QuotaCacheError::not_found(key.to_string()))
    }

    async fn create_or_update(&self, quotas: &[Quota]) -> Result<(), QuotaCacheError> {
        let mut counters = self.counters();
        for quota in quotas {
            counters.insert(quota.key(), quota.quota);
        }
        Ok(())
    }

    async fn incr(&self, key: QuotaKey, amount: i64) -> Result<(), QuotaCacheError> {
        add(&mut self.counters(), key, amount);
        Ok(())
    }

    async fn decr(&self, key: QuotaKey, amount: i64) -> Result<(), QuotaCacheError> {
        let mut counters = self.counters();
        let counter = counters.entry(key).or_insert(0);
        *counter -= amount;
        if *counter < 0 {
            return Err(QuotaCacheError::exhausted(key.to_string()));
        }
        Ok(())
    }

    async fn multi_incr(&self, deltas: &[QuotaDelta]) -> Result<(), QuotaCacheError> {
        let mut counters = self.counters();
        for delta in deltas {
            add(&mut counters, delta.key, delta.amount);
        }
        Ok(())
    }

    async fn multi_decr(&self, deltas: &[QuotaDelta]) -> Result<(), QuotaCacheError> {
        let mut counters = self.counters();
        if let Some(short) = deltas
            .iter()
            .find(|delta| counters.get(&delta.key).copied().unwrap_or(0) < delta.amount)
        {
            return Err(QuotaCacheError::exhausted(short.key.to_string()));
        }
        for delta in deltas {
            *counters.entry(delta.key).or_insert(0) -= delta.amount;
        }
        Ok(())
    }
}
