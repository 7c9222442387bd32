//! Engine process: applies migrations, wires the adapters, and runs the
//! stale-send sweeper until interrupted.

use std::sync::Arc;
use std::time::Duration;

use color_eyre::eyre::{Context, Result, eyre};
use mockable::DefaultClock;
use ortho_config::OrthoConfig;
use tokio::time;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};

use notification_platform::config::AppSettings;
use notification_platform::domain::NotificationLifecycleService;
use notification_platform::domain::ports::NotificationRepository;
use notification_platform::outbound::cache::RedisQuotaCache;
use notification_platform::outbound::persistence::{
    DbPool, DieselNotificationStore, run_migrations,
};

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    if let Err(e) = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .try_init()
    {
        warn!(error = %e, "tracing init failed");
    }

    let settings = AppSettings::load().wrap_err("failed to load configuration")?;

    let database_url = settings.database_url().to_owned();
    let applied = tokio::task::spawn_blocking(move || run_migrations(&database_url))
        .await
        .map_err(|err| eyre!("migration task panicked: {err}"))?
        .wrap_err("failed to apply migrations")?;
    info!(applied, "database migrations applied");

    let pool = DbPool::new(settings.pool_config())
        .await
        .wrap_err("failed to build database pool")?;
    let quota = RedisQuotaCache::connect(&settings.redis_pool_config())
        .await
        .wrap_err("failed to connect to redis")?;

    let lifecycle = NotificationLifecycleService::new(
        Arc::new(DieselNotificationStore::new(pool)),
        Arc::new(quota),
        Arc::new(DefaultClock),
    )
    .with_config(settings.lifecycle_config());

    run_sweeper(
        &lifecycle,
        settings.sweep_interval(),
        settings.sweep_batch_size(),
    )
    .await;
    Ok(())
}

/// Fail stale `SENDING` notifications on every tick until Ctrl-C.
async fn run_sweeper<R: NotificationRepository>(
    repository: &R,
    interval: Duration,
    batch_size: u64,
) {
    let mut ticker = time::interval(interval);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match repository.mark_timeout_sending_as_failed(batch_size).await {
                    Ok(0) => {}
                    Ok(swept) => info!(swept, "stale sends marked failed"),
                    Err(error) => warn!(error = %error, "stale send sweep failed"),
                }
            }
            _ = &mut shutdown => {
                info!("shutdown requested");
                return;
            }
        }
    }
}
