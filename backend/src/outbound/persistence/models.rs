//! Internal Diesel row structs for database operations.
//!
//! These types are implementation details of the persistence layer and must
//! never be exposed to the domain. Conversions to and from domain types live
//! here so the adapters stay thin.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use diesel::prelude::*;

use crate::domain::{
    CallbackLog, CallbackLogStatus, Channel, Notification, NotificationId, SendStatus, Template,
};

use super::schema::{callback_logs, notifications};

// ---------------------------------------------------------------------------
// Notification models
// ---------------------------------------------------------------------------

/// Row struct for reading from the notifications table.
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = notifications)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub(crate) struct NotificationRow {
    pub id: i64,
    pub biz_id: i64,
    pub key: String,
    pub receivers: Vec<String>,
    pub channel: String,
    pub template_id: i64,
    pub template_version_id: i64,
    pub template_params: serde_json::Value,
    pub status: String,
    pub scheduled_stime: DateTime<Utc>,
    pub scheduled_etime: DateTime<Utc>,
    pub version: i32,
}

/// Insertable struct for new notification rows. `version` is always 1.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = notifications)]
pub(crate) struct NewNotificationRow<'a> {
    pub id: i64,
    pub biz_id: i64,
    pub key: &'a str,
    pub receivers: &'a [String],
    pub channel: &'static str,
    pub template_id: i64,
    pub template_version_id: i64,
    pub template_params: serde_json::Value,
    pub status: &'static str,
    pub scheduled_stime: DateTime<Utc>,
    pub scheduled_etime: DateTime<Utc>,
    pub version: i32,
}

/// Insertable struct for the companion callback log of a new notification.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = callback_logs)]
pub(crate) struct NewCallbackLogRow {
    pub notification_id: i64,
    pub status: &'static str,
}

/// Row struct for reading from the callback_logs table.
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = callback_logs)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub(crate) struct CallbackLogRow {
    pub id: i64,
    pub notification_id: i64,
    pub retry_count: i32,
    pub next_retry_time: DateTime<Utc>,
    pub status: String,
}

// ---------------------------------------------------------------------------
// Conversions
// ---------------------------------------------------------------------------

/// Convert a domain id to the signed column type.
pub(crate) fn id_to_db(id: NotificationId) -> Result<i64, String> {
    i64::try_from(id).map_err(|_| format!("notification id {id} exceeds BIGINT range"))
}

/// Convert a list of domain ids, failing on the first out-of-range value.
pub(crate) fn ids_to_db(ids: &[NotificationId]) -> Result<Vec<i64>, String> {
    ids.iter().copied().map(id_to_db).collect()
}

/// Convert a domain version to the signed column type.
pub(crate) fn version_to_db(version: u32) -> Result<i32, String> {
    i32::try_from(version).map_err(|_| format!("version {version} exceeds INTEGER range"))
}

impl<'a> NewNotificationRow<'a> {
    pub(crate) fn from_domain(notification: &'a Notification) -> Result<Self, String> {
        let template_params = serde_json::to_value(&notification.template.params)
            .map_err(|err| format!("template params not serialisable: {err}"))?;
        Ok(Self {
            id: id_to_db(notification.id)?,
            biz_id: notification.biz_id,
            key: notification.key.as_str(),
            receivers: notification.receivers.as_slice(),
            channel: notification.channel.as_str(),
            template_id: notification.template.id,
            template_version_id: notification.template.version_id,
            template_params,
            status: notification.status.as_str(),
            scheduled_stime: notification.scheduled_start,
            scheduled_etime: notification.scheduled_end,
            version: 1,
        })
    }
}

impl TryFrom<NotificationRow> for Notification {
    type Error = String;

    fn try_from(row: NotificationRow) -> Result<Self, Self::Error> {
        let NotificationRow {
            id,
            biz_id,
            key,
            receivers,
            channel,
            template_id,
            template_version_id,
            template_params,
            status,
            scheduled_stime,
            scheduled_etime,
            version,
        } = row;

        let params: HashMap<String, String> = serde_json::from_value(template_params)
            .map_err(|err| format!("notification {id} has malformed template params: {err}"))?;

        Ok(Self {
            id: NotificationId::try_from(id)
                .map_err(|_| format!("notification id {id} is negative"))?,
            biz_id,
            key,
            receivers,
            channel: channel.parse::<Channel>().map_err(|err| err.to_string())?,
            template: Template {
                id: template_id,
                version_id: template_version_id,
                params,
            },
            status: status.parse::<SendStatus>().map_err(|err| err.to_string())?,
            scheduled_start: scheduled_stime,
            scheduled_end: scheduled_etime,
            version: u32::try_from(version)
                .map_err(|_| format!("notification {id} has negative version {version}"))?,
        })
    }
}

impl TryFrom<CallbackLogRow> for CallbackLog {
    type Error = String;

    fn try_from(row: CallbackLogRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            notification_id: NotificationId::try_from(row.notification_id)
                .map_err(|_| format!("callback log {} has negative notification id", row.id))?,
            retry_count: u32::try_from(row.retry_count)
                .map_err(|_| format!("callback log {} has negative retry count", row.id))?,
            next_retry_time: row.next_retry_time,
            status: row
                .status
                .parse::<CallbackLogStatus>()
                .map_err(|err| err.to_string())?,
        })
    }
}
