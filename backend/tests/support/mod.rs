//! Shared fixtures for the lifecycle integration suites.
//!
//! Every suite runs the real services over the in-memory store and quota
//! cache, with a clock pinned to [`start`].

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use notification_platform::domain::{
    BizId, Channel, Notification, NotificationDraft, NotificationIntakeService,
    NotificationLifecycleService, QuotaKey, SendStatus, SendStrategy, Template,
};
use notification_platform::outbound::id::SnowflakeIdGenerator;
use notification_platform::test_support::{
    InMemoryNotificationStore, InMemoryQuotaCache, MutableClock,
};

pub type Lifecycle = NotificationLifecycleService<InMemoryNotificationStore, InMemoryQuotaCache>;
pub type Intake = NotificationIntakeService<Lifecycle, SnowflakeIdGenerator>;

pub const BIZ: BizId = 7;

pub fn start() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2026-06-01T09:00:00Z")
        .expect("valid timestamp")
        .with_timezone(&Utc)
}

pub fn sms_key() -> QuotaKey {
    QuotaKey::new(BIZ, Channel::Sms)
}

/// Services and the doubles behind them.
pub struct Harness {
    pub clock: Arc<MutableClock>,
    pub store: Arc<InMemoryNotificationStore>,
    pub quota: Arc<InMemoryQuotaCache>,
    pub lifecycle: Arc<Lifecycle>,
    pub intake: Intake,
}

impl Harness {
    /// Build the services with `sms_quota` units available on [`sms_key`].
    pub fn with_sms_quota(sms_quota: i64) -> Self {
        let clock = Arc::new(MutableClock::new(start()));
        let store = Arc::new(InMemoryNotificationStore::new(clock.clone()));
        let quota = Arc::new(InMemoryQuotaCache::new());
        quota.set(sms_key(), sms_quota);

        let lifecycle = Arc::new(NotificationLifecycleService::new(
            Arc::clone(&store),
            Arc::clone(&quota),
            clock.clone(),
        ));
        let intake = NotificationIntakeService::new(
            Arc::clone(&lifecycle),
            Arc::new(SnowflakeIdGenerator::new(1, clock.clone())),
            clock.clone(),
        );

        Self {
            clock,
            store,
            quota,
            lifecycle,
            intake,
        }
    }

    pub fn sms_remaining(&self) -> Option<i64> {
        self.quota.value(sms_key())
    }
}

pub fn sms_draft(key: &str, strategy: SendStrategy) -> NotificationDraft {
    NotificationDraft {
        biz_id: BIZ,
        key: key.to_owned(),
        receivers: vec!["+15550123".to_owned()],
        channel: Channel::Sms,
        template: Template {
            id: 12,
            version_id: 3,
            params: HashMap::from([("code".to_owned(), "4411".to_owned())]),
        },
        strategy,
    }
}

/// A ready-to-persist notification with an explicit id.
pub fn pending_sms(id: u64, key: &str) -> Notification {
    sms_draft(key, SendStrategy::Immediate)
        .into_notification(id, SendStatus::Pending, start())
        .expect("valid draft")
}
