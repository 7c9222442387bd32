//! Callback retry records paired with notifications.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::notification::{NotificationId, ParseEnumError};

/// Delivery state of a business callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CallbackLogStatus {
    /// Created alongside the notification; not yet eligible for callback.
    Init,
    /// Owning notification succeeded; callback awaits delivery.
    Pending,
    Succeeded,
    Failed,
}

impl CallbackLogStatus {
    /// Stable storage representation.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Init => "INIT",
            Self::Pending => "PENDING",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for CallbackLogStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CallbackLogStatus {
    type Err = ParseEnumError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "INIT" => Ok(Self::Init),
            "PENDING" => Ok(Self::Pending),
            "SUCCEEDED" => Ok(Self::Succeeded),
            "FAILED" => Ok(Self::Failed),
            other => Err(ParseEnumError::new("callback log status", other)),
        }
    }
}

/// Callback retry state for one notification.
///
/// Exists only when requested at creation time and moves to
/// [`CallbackLogStatus::Pending`] when its notification succeeds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackLog {
    pub id: i64,
    pub notification_id: NotificationId,
    pub retry_count: u32,
    pub next_retry_time: DateTime<Utc>,
    pub status: CallbackLogStatus,
}

/// One page of pending callback logs plus the cursor for the next page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackLogPage {
    pub logs: Vec<CallbackLog>,
    /// Largest id in `logs`, or `0` when the page is empty.
    pub next_start_id: i64,
}

impl CallbackLogPage {
    /// Build a page, deriving the cursor from the last entry.
    pub fn new(logs: Vec<CallbackLog>) -> Self {
        let next_start_id = logs.last().map_or(0, |log| log.id);
        Self {
            logs,
            next_start_id,
        }
    }
}
