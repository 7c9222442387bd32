//! Redis adapters for quota counters.

mod redis_quota_cache;

pub use redis_quota_cache::{RedisPoolConfig, RedisQuotaCache};
