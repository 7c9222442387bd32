//! Process configuration loaded via OrthoConfig.
//!
//! Every value can be set through `NOTIFY_*` environment variables; unset
//! values fall back to the defaults below.

use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::Deserialize;

use crate::domain::LifecycleConfig;
use crate::outbound::cache::RedisPoolConfig;
use crate::outbound::persistence::PoolConfig;

const DEFAULT_DATABASE_URL: &str = "postgres://localhost/notifications";
const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379/";
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 10;
const DEFAULT_REDIS_MAX_CONNECTIONS: u32 = 16;
const DEFAULT_MACHINE_ID: u16 = 1;
const DEFAULT_COMPENSATION_TIMEOUT_MS: u64 = 3_000;

/// Settings for the notification engine process.
#[derive(Debug, Clone, Deserialize, OrthoConfig)]
#[ortho_config(prefix = "NOTIFY")]
pub struct AppSettings {
    /// PostgreSQL connection URL.
    pub database_url: Option<String>,
    /// Redis connection URL for quota counters.
    pub redis_url: Option<String>,
    pub db_max_connections: Option<u32>,
    pub redis_max_connections: Option<u32>,
    /// Machine id embedded in generated notification ids.
    pub machine_id: Option<u16>,
    /// Upper bound on a single quota refund.
    pub compensation_timeout_ms: Option<u64>,
    /// Pause between stale-send sweeps.
    #[ortho_config(default = 10)]
    pub sweep_interval_secs: u64,
    /// Rows failed per sweep.
    #[ortho_config(default = 100)]
    pub sweep_batch_size: u64,
}

impl AppSettings {
    /// Configured database URL, or the local default.
    pub fn database_url(&self) -> &str {
        self.database_url.as_deref().unwrap_or(DEFAULT_DATABASE_URL)
    }

    /// Configured Redis URL, or the local default.
    pub fn redis_url(&self) -> &str {
        self.redis_url.as_deref().unwrap_or(DEFAULT_REDIS_URL)
    }

    /// Machine id for the id generator.
    pub fn machine_id(&self) -> u16 {
        self.machine_id.unwrap_or(DEFAULT_MACHINE_ID)
    }

    /// Pause between sweeps, never shorter than one second.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    /// Maximum rows one sweep moves to `FAILED`.
    pub fn sweep_batch_size(&self) -> u64 {
        self.sweep_batch_size
    }

    /// Diesel pool settings derived from this configuration.
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig::new(self.database_url()).with_max_size(
            self.db_max_connections
                .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS),
        )
    }

    /// Redis pool settings derived from this configuration.
    pub fn redis_pool_config(&self) -> RedisPoolConfig {
        RedisPoolConfig::new(self.redis_url()).with_max_size(
            self.redis_max_connections
                .unwrap_or(DEFAULT_REDIS_MAX_CONNECTIONS),
        )
    }

    /// Lifecycle engine tunables derived from this configuration.
    pub fn lifecycle_config(&self) -> LifecycleConfig {
        LifecycleConfig {
            compensation_timeout: Duration::from_millis(
                self.compensation_timeout_ms
                    .unwrap_or(DEFAULT_COMPENSATION_TIMEOUT_MS),
            ),
            ..LifecycleConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for configuration parsing.

    use super::*;
    use std::ffi::OsString;

    use env_lock::lock_env;
    use rstest::rstest;

    const VARS: [&str; 8] = [
        "NOTIFY_DATABASE_URL",
        "NOTIFY_REDIS_URL",
        "NOTIFY_DB_MAX_CONNECTIONS",
        "NOTIFY_REDIS_MAX_CONNECTIONS",
        "NOTIFY_MACHINE_ID",
        "NOTIFY_COMPENSATION_TIMEOUT_MS",
        "NOTIFY_SWEEP_INTERVAL_SECS",
        "NOTIFY_SWEEP_BATCH_SIZE",
    ];

    fn load_from_empty_args() -> AppSettings {
        AppSettings::load_from_iter([OsString::from("notification-platform")])
            .expect("config should load")
    }

    #[rstest]
    fn defaults_apply_when_unset() {
        let _guard = lock_env(VARS.map(|name| (name, None::<String>)));

        let settings = load_from_empty_args();
        assert_eq!(settings.database_url(), DEFAULT_DATABASE_URL);
        assert_eq!(settings.redis_url(), DEFAULT_REDIS_URL);
        assert_eq!(settings.machine_id(), 1);
        assert_eq!(settings.sweep_interval(), Duration::from_secs(10));
        assert_eq!(settings.sweep_batch_size(), 100);
        assert_eq!(settings.pool_config().max_size(), 10);
        assert_eq!(settings.redis_pool_config().max_size(), 16);
        assert_eq!(
            settings.lifecycle_config().compensation_timeout,
            Duration::from_secs(3)
        );
    }

    #[rstest]
    fn environment_overrides_are_respected() {
        let _guard = lock_env([
            ("NOTIFY_DATABASE_URL", Some("postgres://db/notify".to_owned())),
            ("NOTIFY_REDIS_URL", Some("redis://cache:6380/".to_owned())),
            ("NOTIFY_DB_MAX_CONNECTIONS", Some("4".to_owned())),
            ("NOTIFY_REDIS_MAX_CONNECTIONS", Some("8".to_owned())),
            ("NOTIFY_MACHINE_ID", Some("42".to_owned())),
            ("NOTIFY_COMPENSATION_TIMEOUT_MS", Some("1500".to_owned())),
            ("NOTIFY_SWEEP_INTERVAL_SECS", Some("30".to_owned())),
            ("NOTIFY_SWEEP_BATCH_SIZE", Some("25".to_owned())),
        ]);

        let settings = load_from_empty_args();
        assert_eq!(settings.pool_config().database_url(), "postgres://db/notify");
        assert_eq!(settings.redis_pool_config().url(), "redis://cache:6380/");
        assert_eq!(settings.pool_config().max_size(), 4);
        assert_eq!(settings.redis_pool_config().max_size(), 8);
        assert_eq!(settings.machine_id(), 42);
        assert_eq!(
            settings.lifecycle_config().compensation_timeout,
            Duration::from_millis(1500)
        );
        assert_eq!(settings.sweep_interval(), Duration::from_secs(30));
        assert_eq!(settings.sweep_batch_size(), 25);
    }

    #[rstest]
    fn zero_sweep_interval_is_clamped() {
        let _guard = lock_env([("NOTIFY_SWEEP_INTERVAL_SECS", Some("0".to_owned()))]);
        assert_eq!(load_from_empty_args().sweep_interval(), Duration::from_secs(1));
    }
}
