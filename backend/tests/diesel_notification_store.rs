//! `DieselNotificationStore` against embedded PostgreSQL.
//!
//! Covers the guarantees the in-memory store only imitates: the unique key
//! constraint, all-or-nothing batch inserts, guarded status transitions, the
//! settlement transaction and the stale-send sweep.

use std::collections::HashMap;

use chrono::{DateTime, TimeDelta, Utc};
use notification_platform::domain::ports::{
    CallbackLogStore, NotificationStore, NotificationStoreError,
};
use notification_platform::domain::{
    CallbackLogStatus, Channel, Notification, NotificationDraft, SendStatus, SendStrategy,
    Template,
};
use notification_platform::outbound::persistence::{DbPool, DieselNotificationStore, PoolConfig};
use pg_embedded_setup_unpriv::TemporaryDatabase;
use rstest::{fixture, rstest};
use tokio::runtime::Runtime;

#[path = "support/embedded_postgres.rs"]
mod embedded_postgres;

use embedded_postgres::{execute_sql, handle_cluster_setup_failure, provision_database};

const BIZ: i64 = 31;

struct TestContext {
    runtime: Runtime,
    store: DieselNotificationStore,
    database_url: String,
    _database: TemporaryDatabase,
}

fn setup_context() -> Result<TestContext, String> {
    let runtime = Runtime::new().map_err(|err| err.to_string())?;
    let database = provision_database()?;
    let database_url = database.url().to_string();
    let config = PoolConfig::new(database_url.as_str())
        .with_max_size(2)
        .with_min_idle(Some(1));
    let pool = runtime
        .block_on(DbPool::new(config))
        .map_err(|err| err.to_string())?;

    Ok(TestContext {
        runtime,
        store: DieselNotificationStore::new(pool),
        database_url,
        _database: database,
    })
}

#[fixture]
fn store_context() -> Option<TestContext> {
    match setup_context() {
        Ok(context) => Some(context),
        Err(reason) => handle_cluster_setup_failure(reason),
    }
}

fn email(id: u64, key: &str, status: SendStatus, now: DateTime<Utc>) -> Notification {
    NotificationDraft {
        biz_id: BIZ,
        key: key.to_owned(),
        receivers: vec!["ops@example.com".to_owned()],
        channel: Channel::Email,
        template: Template {
            id: 4,
            version_id: 2,
            params: HashMap::from([("name".to_owned(), "Ada".to_owned())]),
        },
        strategy: SendStrategy::Deadline {
            deadline: now + TimeDelta::hours(1),
        },
    }
    .into_notification(id, status, now)
    .expect("valid draft")
}

#[rstest]
fn duplicate_key_is_reported_and_batch_inserts_are_atomic(store_context: Option<TestContext>) {
    let Some(ctx) = store_context else {
        eprintln!("SKIP-TEST-CLUSTER: duplicate_key_is_reported_and_batch_inserts_are_atomic skipped");
        return;
    };
    let now = Utc::now();

    ctx.runtime.block_on(async {
        let stored = ctx
            .store
            .create(&email(1, "welcome", SendStatus::Pending, now))
            .await
            .expect("first insert");
        assert_eq!(stored.version, 1);

        let err = ctx
            .store
            .create(&email(2, "welcome", SendStatus::Pending, now))
            .await
            .expect_err("same key");
        assert!(matches!(err, NotificationStoreError::Duplicate { .. }));

        let batch = [
            email(3, "fresh", SendStatus::Pending, now),
            email(4, "welcome", SendStatus::Pending, now),
        ];
        let err = ctx
            .store
            .batch_create_with_callback_log(&batch)
            .await
            .expect_err("second row collides");
        assert!(matches!(err, NotificationStoreError::Duplicate { .. }));

        let leftovers = ctx
            .store
            .get_by_keys(BIZ, &["fresh".to_owned()])
            .await
            .expect("lookup");
        assert!(leftovers.is_empty());
        let logs = ctx
            .store
            .find_by_notification_ids(&[3])
            .await
            .expect("log lookup");
        assert!(logs.is_empty());
    });
}

#[rstest]
fn cas_refuses_stale_versions_and_terminal_rows(store_context: Option<TestContext>) {
    let Some(ctx) = store_context else {
        eprintln!("SKIP-TEST-CLUSTER: cas_refuses_stale_versions_and_terminal_rows skipped");
        return;
    };
    let now = Utc::now();

    ctx.runtime.block_on(async {
        let stored = ctx
            .store
            .create(&email(10, "cas", SendStatus::Pending, now))
            .await
            .expect("insert");

        ctx.store
            .cas_status(&stored.with_status(SendStatus::Sending))
            .await
            .expect("first swap wins");
        let err = ctx
            .store
            .cas_status(&stored.with_status(SendStatus::Sending))
            .await
            .expect_err("version moved on");
        assert_eq!(err, NotificationStoreError::version_mismatch(10_u64, 1_u32));

        let sending = ctx.store.get_by_id(10).await.expect("stored");
        assert_eq!(sending.version, 2);
        assert!(ctx.store.mark_failed(&sending).await.expect("failed"));

        let failed = ctx.store.get_by_id(10).await.expect("stored");
        let err = ctx
            .store
            .cas_status(&failed.with_status(SendStatus::Pending))
            .await
            .expect_err("terminal rows never move");
        assert!(matches!(err, NotificationStoreError::VersionMismatch { .. }));
    });
}

#[rstest]
fn terminal_rows_ignore_late_outcomes(store_context: Option<TestContext>) {
    let Some(ctx) = store_context else {
        eprintln!("SKIP-TEST-CLUSTER: terminal_rows_ignore_late_outcomes skipped");
        return;
    };
    let now = Utc::now();

    ctx.runtime.block_on(async {
        let stored = ctx
            .store
            .create_with_callback_log(&email(20, "late", SendStatus::Sending, now))
            .await
            .expect("insert");

        assert!(ctx.store.mark_failed(&stored).await.expect("first failure"));
        assert!(!ctx.store.mark_failed(&stored).await.expect("repeat failure"));
        assert!(!ctx.store.mark_success(&stored).await.expect("late success"));

        let current = ctx.store.get_by_id(20).await.expect("stored");
        assert_eq!(current.status, SendStatus::Failed);
        assert_eq!(current.version, 2);
        let logs = ctx
            .store
            .find_by_notification_ids(&[20])
            .await
            .expect("log lookup");
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].status, CallbackLogStatus::Init);

        let err = ctx
            .store
            .mark_failed(&email(99, "ghost", SendStatus::Sending, now))
            .await
            .expect_err("no such row");
        assert!(matches!(err, NotificationStoreError::NotFound { .. }));
    });
}

#[rstest]
fn cancel_only_moves_prepared_rows(store_context: Option<TestContext>) {
    let Some(ctx) = store_context else {
        eprintln!("SKIP-TEST-CLUSTER: cancel_only_moves_prepared_rows skipped");
        return;
    };
    let now = Utc::now();

    ctx.runtime.block_on(async {
        let prepared = ctx
            .store
            .create(&email(30, "tx-open", SendStatus::Prepare, now))
            .await
            .expect("insert");
        let committed = ctx
            .store
            .create(&email(31, "tx-done", SendStatus::Pending, now))
            .await
            .expect("insert");

        assert!(ctx.store.cancel_prepared(&prepared).await.expect("cancel"));
        assert!(!ctx.store.cancel_prepared(&committed).await.expect("refused"));

        let statuses: HashMap<u64, SendStatus> = ctx
            .store
            .batch_get_by_ids(&[30, 31])
            .await
            .expect("lookup")
            .into_iter()
            .map(|(id, n)| (id, n.status))
            .collect();
        assert_eq!(statuses[&30], SendStatus::Canceled);
        assert_eq!(statuses[&31], SendStatus::Pending);
    });
}

#[rstest]
fn settlement_reports_only_rows_it_failed(store_context: Option<TestContext>) {
    let Some(ctx) = store_context else {
        eprintln!("SKIP-TEST-CLUSTER: settlement_reports_only_rows_it_failed skipped");
        return;
    };
    let now = Utc::now();

    ctx.runtime.block_on(async {
        let stored = ctx
            .store
            .batch_create_with_callback_log(&[
                email(40, "s-ok", SendStatus::Sending, now),
                email(41, "s-ko", SendStatus::Sending, now),
                email(42, "s-gone", SendStatus::Sending, now),
            ])
            .await
            .expect("insert");
        assert!(ctx.store.mark_failed(&stored[2]).await.expect("swept"));

        let moved = ctx
            .store
            .batch_update_status_succeeded_or_failed(&stored[..1], &stored[1..])
            .await
            .expect("settled");
        assert_eq!(moved, vec![41]);

        let logs = ctx
            .store
            .find_by_notification_ids(&[40, 41])
            .await
            .expect("log lookup");
        let log_status: HashMap<u64, CallbackLogStatus> = logs
            .into_iter()
            .map(|log| (log.notification_id, log.status))
            .collect();
        assert_eq!(log_status[&40], CallbackLogStatus::Pending);
        assert_eq!(log_status[&41], CallbackLogStatus::Init);

        let again = ctx
            .store
            .batch_update_status_succeeded_or_failed(&stored[..1], &stored[1..])
            .await
            .expect("settled twice");
        assert!(again.is_empty());
    });
}

#[rstest]
fn sweep_takes_only_stale_sends(store_context: Option<TestContext>) {
    let Some(ctx) = store_context else {
        eprintln!("SKIP-TEST-CLUSTER: sweep_takes_only_stale_sends skipped");
        return;
    };
    let now = Utc::now();

    ctx.runtime.block_on(async {
        ctx.store
            .batch_create(&[
                email(50, "stale", SendStatus::Sending, now),
                email(51, "fresh", SendStatus::Sending, now),
                email(52, "queued", SendStatus::Pending, now),
            ])
            .await
            .expect("insert");
    });
    execute_sql(
        &ctx.database_url,
        "UPDATE notifications SET updated_at = NOW() - INTERVAL '5 minutes' WHERE id IN (50, 52)",
    )
    .expect("age rows");

    ctx.runtime.block_on(async {
        let swept = ctx
            .store
            .mark_timeout_sending_as_failed(Utc::now() - TimeDelta::minutes(1), 10)
            .await
            .expect("sweep");
        assert_eq!(swept.len(), 1);
        assert_eq!(swept[0].id, 50);

        let statuses: HashMap<u64, SendStatus> = ctx
            .store
            .batch_get_by_ids(&[50, 51, 52])
            .await
            .expect("lookup")
            .into_iter()
            .map(|(id, n)| (id, n.status))
            .collect();
        assert_eq!(statuses[&50], SendStatus::Failed);
        assert_eq!(statuses[&51], SendStatus::Sending);
        assert_eq!(statuses[&52], SendStatus::Pending);

        let repeat = ctx
            .store
            .mark_timeout_sending_as_failed(Utc::now() - TimeDelta::minutes(1), 10)
            .await
            .expect("second sweep");
        assert!(repeat.is_empty());
    });
}

#[rstest]
fn ready_rows_and_pending_callbacks_page_in_id_order(store_context: Option<TestContext>) {
    let Some(ctx) = store_context else {
        eprintln!("SKIP-TEST-CLUSTER: ready_rows_and_pending_callbacks_page_in_id_order skipped");
        return;
    };
    let now = Utc::now();

    ctx.runtime.block_on(async {
        let stored = ctx
            .store
            .batch_create_with_callback_log(&[
                email(60, "r-1", SendStatus::Pending, now),
                email(61, "r-2", SendStatus::Pending, now),
                email(62, "r-3", SendStatus::Sending, now),
            ])
            .await
            .expect("insert");

        let ready = ctx.store.find_ready(now, 0, 10).await.expect("ready");
        let ids: Vec<u64> = ready.iter().map(|n| n.id).collect();
        assert_eq!(ids, vec![60, 61]);
        let after_window = ctx
            .store
            .find_ready(now + TimeDelta::hours(2), 0, 10)
            .await
            .expect("ready later");
        assert!(after_window.is_empty());

        for notification in &stored {
            ctx.store.mark_success(notification).await.expect("success");
        }
        let first = ctx
            .store
            .find_pending(Utc::now(), 0, 2)
            .await
            .expect("first page");
        assert_eq!(first.logs.len(), 2);
        let next = ctx
            .store
            .find_pending(Utc::now(), first.next_start_id, 2)
            .await
            .expect("second page");
        assert_eq!(next.logs.len(), 1);
    });
}
