//! Per-tenant, per-channel send quotas.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::notification::{BizId, Channel, Notification};

/// Counter address for a `(biz_id, channel)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QuotaKey {
    pub biz_id: BizId,
    pub channel: Channel,
}

impl QuotaKey {
    /// Counter key for `biz_id` sending on `channel`.
    pub const fn new(biz_id: BizId, channel: Channel) -> Self {
        Self { biz_id, channel }
    }
}

impl fmt::Display for QuotaKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "quota:{}:{}", self.biz_id, self.channel)
    }
}

/// Remaining send allowance for one tenant on one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quota {
    pub biz_id: BizId,
    pub channel: Channel,
    pub quota: i64,
}

impl Quota {
    /// Counter this allowance is stored under.
    pub const fn key(&self) -> QuotaKey {
        QuotaKey::new(self.biz_id, self.channel)
    }
}

/// Amount to move a single counter by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaDelta {
    pub key: QuotaKey,
    pub amount: i64,
}

/// Collapse notifications into one delta per distinct `(biz_id, channel)`.
///
/// Keys keep the order of their first occurrence so scripted batch
/// operations report the same "first insufficient key" every time.
pub fn aggregate_quota_deltas<'a, I>(notifications: I) -> Vec<QuotaDelta>
where
    I: IntoIterator<Item = &'a Notification>,
{
    let mut deltas: Vec<QuotaDelta> = Vec::new();
    for notification in notifications {
        let key = QuotaKey::new(notification.biz_id, notification.channel);
        match deltas.iter_mut().find(|delta| delta.key == key) {
            Some(delta) => delta.amount += 1,
            None => deltas.push(QuotaDelta { key, amount: 1 }),
        }
    }
    deltas
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{SendStatus, Template};
    use chrono::Utc;
    use rstest::rstest;
    use std::collections::HashMap;

    fn notification(id: u64, biz_id: BizId, channel: Channel) -> Notification {
        let now = Utc::now();
        Notification {
            id,
            biz_id,
            key: format!("key-{id}"),
            receivers: vec!["someone@example.com".to_owned()],
            channel,
            template: Template {
                id: 1,
                version_id: 1,
                params: HashMap::new(),
            },
            status: SendStatus::Pending,
            scheduled_start: now,
            scheduled_end: now,
            version: 1,
        }
    }

    #[rstest]
    fn key_renders_counter_name() {
        assert_eq!(QuotaKey::new(12, Channel::InApp).to_string(), "quota:12:IN_APP");
    }

    #[rstest]
    fn quota_is_stored_under_its_tenant_channel_key() {
        let quota = Quota {
            biz_id: 12,
            channel: Channel::Email,
            quota: 40,
        };
        assert_eq!(quota.key(), QuotaKey::new(12, Channel::Email));
    }

    #[rstest]
    fn deltas_aggregate_per_tenant_and_channel() {
        let batch = [
            notification(1, 1, Channel::Sms),
            notification(2, 2, Channel::Email),
            notification(3, 1, Channel::Sms),
            notification(4, 1, Channel::Email),
        ];

        let deltas = aggregate_quota_deltas(&batch);

        assert_eq!(
            deltas,
            vec![
                QuotaDelta {
                    key: QuotaKey::new(1, Channel::Sms),
                    amount: 2
                },
                QuotaDelta {
                    key: QuotaKey::new(2, Channel::Email),
                    amount: 1
                },
                QuotaDelta {
                    key: QuotaKey::new(1, Channel::Email),
                    amount: 1
                },
            ]
        );
    }

    #[rstest]
    fn empty_batch_yields_no_deltas() {
        let batch: Vec<Notification> = Vec::new();
        assert!(aggregate_quota_deltas(&batch).is_empty());
    }
}
