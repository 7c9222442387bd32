//! Redis-backed quota counters.
//!
//! Single-key decrements use `DECRBY`; increments and every batched
//! operation run as Lua scripts so each call is atomic on the server.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bb8_redis::bb8::{self, Pool, PooledConnection, RunError};
use bb8_redis::redis::{self, RedisError, Script};
use bb8_redis::RedisConnectionManager;
use tracing::debug;

use crate::domain::ports::{QuotaCache, QuotaCacheError};
use crate::domain::{Quota, QuotaDelta, QuotaKey};

const INCR_SCRIPT: &str = include_str!("lua/quota_incr.lua");
const BATCH_INCR_SCRIPT: &str = include_str!("lua/batch_incr_quota.lua");
const BATCH_DECR_SCRIPT: &str = include_str!("lua/batch_decr_quota.lua");

/// Connection settings for the Redis pool.
///
/// Defaults: 16 connections, 5 second checkout timeout.
#[derive(Debug, Clone)]
pub struct RedisPoolConfig {
    url: String,
    max_size: u32,
    connection_timeout: Duration,
}

impl RedisPoolConfig {
    /// Settings for `url` with 16 connections and a 5 second checkout timeout.
    ///
    /// ```
    /// use notification_platform::outbound::cache::RedisPoolConfig;
    ///
    /// let config = RedisPoolConfig::new("redis://cache:6379/").with_max_size(4);
    /// assert_eq!(config.url(), "redis://cache:6379/");
    /// assert_eq!(config.max_size(), 4);
    /// ```
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_size: 16,
            connection_timeout: Duration::from_secs(5),
        }
    }

    /// Override the maximum number of pooled connections.
    #[must_use]
    pub fn with_max_size(mut self, max_size: u32) -> Self {
        self.max_size = max_size;
        self
    }

    /// Override how long a checkout may wait for a connection.
    #[must_use]
    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Redis connection URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Maximum number of pooled connections.
    pub fn max_size(&self) -> u32 {
        self.max_size
    }
}

struct QuotaScripts {
    incr: Script,
    batch_incr: Script,
    batch_decr: Script,
}

impl QuotaScripts {
    fn load() -> Self {
        Self {
            incr: Script::new(INCR_SCRIPT),
            batch_incr: Script::new(BATCH_INCR_SCRIPT),
            batch_decr: Script::new(BATCH_DECR_SCRIPT),
        }
    }
}

/// Quota counters stored under `quota:{biz_id}:{channel}` keys.
#[derive(Clone)]
pub struct RedisQuotaCache {
    pool: Pool<RedisConnectionManager>,
    scripts: Arc<QuotaScripts>,
}

impl RedisQuotaCache {
    /// Wrap an existing pool.
    pub fn new(pool: Pool<RedisConnectionManager>) -> Self {
        Self {
            pool,
            scripts: Arc::new(QuotaScripts::load()),
        }
    }

    /// Build a pool from `config` and wrap it.
    ///
    /// # Errors
    ///
    /// Returns [`QuotaCacheError::Connection`] when the URL is invalid or the
    /// pool cannot be built.
    pub async fn connect(config: &RedisPoolConfig) -> Result<Self, QuotaCacheError> {
        let manager = RedisConnectionManager::new(config.url())
            .map_err(|err| QuotaCacheError::connection(err.to_string()))?;
        let pool = bb8::Pool::builder()
            .max_size(config.max_size)
            .connection_timeout(config.connection_timeout)
            .build(manager)
            .await
            .map_err(|err| QuotaCacheError::connection(err.to_string()))?;
        Ok(Self::new(pool))
    }

    async fn conn(
        &self,
    ) -> Result<PooledConnection<'_, RedisConnectionManager>, QuotaCacheError> {
        self.pool.get().await.map_err(map_pool_error)
    }
}

fn map_pool_error(error: RunError<RedisError>) -> QuotaCacheError {
    match error {
        RunError::User(inner) => map_redis_error(inner),
        RunError::TimedOut => QuotaCacheError::connection("timed out waiting for connection"),
    }
}

fn map_redis_error(error: RedisError) -> QuotaCacheError {
    debug!(kind = ?error.kind(), "redis command failed");
    if error.is_io_error()
        || error.is_connection_refusal()
        || error.is_connection_dropped()
        || error.is_timeout()
    {
        QuotaCacheError::connection(error.to_string())
    } else {
        QuotaCacheError::command(error.to_string())
    }
}

/// Split deltas into script `KEYS` and `ARGV`, index-aligned.
fn script_inputs(deltas: &[QuotaDelta]) -> (Vec<String>, Vec<i64>) {
    deltas
        .iter()
        .map(|delta| (delta.key.to_string(), delta.amount))
        .unzip()
}

/// Flatten quotas into `MSET` key/value pairs.
fn mset_pairs(quotas: &[Quota]) -> Vec<(String, i64)> {
    quotas
        .iter()
        .map(|quota| (quota.key().to_string(), quota.quota))
        .collect()
}

#[async_trait]
impl QuotaCache for RedisQuotaCache {
    async fn find(&self, key: QuotaKey) -> Result<Quota, QuotaCacheError> {
        let mut conn = self.conn().await?;
        let value: Option<i64> = redis::cmd("GET")
            .arg(key.to_string())
            .query_async(&mut *conn)
            .await
            .map_err(map_redis_error)?;

        value
            .map(|quota| Quota {
                biz_id: key.biz_id,
                channel: key.channel,
                quota,
            })
            .ok_or_else(|| QuotaCacheError::not_found(key.to_string()))
    }

    async fn create_or_update(&self, quotas: &[Quota]) -> Result<(), QuotaCacheError> {
        if quotas.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn().await?;
        let mut cmd = redis::cmd("MSET");
        for (key, value) in mset_pairs(quotas) {
            cmd.arg(key).arg(value);
        }
        let () = cmd
            .query_async(&mut *conn)
            .await
            .map_err(map_redis_error)?;
        Ok(())
    }

    async fn incr(&self, key: QuotaKey, amount: i64) -> Result<(), QuotaCacheError> {
        let mut conn = self.conn().await?;
        let value: i64 = self
            .scripts
            .incr
            .key(key.to_string())
            .arg(amount)
            .invoke_async(&mut *conn)
            .await
            .map_err(map_redis_error)?;
        debug!(%key, amount, value, "quota incremented");
        Ok(())
    }

    async fn decr(&self, key: QuotaKey, amount: i64) -> Result<(), QuotaCacheError> {
        let mut conn = self.conn().await?;
        let remaining: i64 = redis::cmd("DECRBY")
            .arg(key.to_string())
            .arg(amount)
            .query_async(&mut *conn)
            .await
            .map_err(map_redis_error)?;

        if remaining < 0 {
            return Err(QuotaCacheError::exhausted(key.to_string()));
        }
        Ok(())
    }

    async fn multi_incr(&self, deltas: &[QuotaDelta]) -> Result<(), QuotaCacheError> {
        if deltas.is_empty() {
            return Ok(());
        }
        let (keys, amounts) = script_inputs(deltas);
        let mut conn = self.conn().await?;
        let _: i64 = self
            .scripts
            .batch_incr
            .key(keys)
            .arg(amounts)
            .invoke_async(&mut *conn)
            .await
            .map_err(map_redis_error)?;
        Ok(())
    }

    async fn multi_decr(&self, deltas: &[QuotaDelta]) -> Result<(), QuotaCacheError> {
        if deltas.is_empty() {
            return Ok(());
        }
        let (keys, amounts) = script_inputs(deltas);
        let mut conn = self.conn().await?;
        let short_key: String = self
            .scripts
            .batch_decr
            .key(keys)
            .arg(amounts)
            .invoke_async(&mut *conn)
            .await
            .map_err(map_redis_error)?;

        if short_key.is_empty() {
            Ok(())
        } else {
            Err(QuotaCacheError::exhausted(short_key))
        }
    }
}
