//! Notification aggregate, delivery channels, and the send-status machine.
//!
//! A [`Notification`] is created once by the lifecycle engine and afterwards
//! only mutated through status transitions. The send window
//! (`scheduled_start`..=`scheduled_end`) is computed from a
//! [`SendStrategy`] when a [`NotificationDraft`] is materialised and is never
//! recomputed.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::send_strategy::{SendStrategy, SendStrategyError};

/// Tenant identifier owning a notification and its quota.
pub type BizId = i64;

/// Globally unique notification identifier supplied by the ID generator.
pub type NotificationId = u64;

/// Delivery channel for a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Channel {
    /// Short message service.
    Sms,
    /// Electronic mail.
    Email,
    /// In-application inbox message.
    InApp,
}

impl Channel {
    /// Stable storage representation.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sms => "SMS",
            Self::Email => "EMAIL",
            Self::InApp => "IN_APP",
        }
    }

    /// Whether this is the SMS channel.
    pub const fn is_sms(self) -> bool {
        matches!(self, Self::Sms)
    }

    /// Whether this is the email channel.
    pub const fn is_email(self) -> bool {
        matches!(self, Self::Email)
    }

    /// Whether this is the in-app message channel.
    pub const fn is_in_app(self) -> bool {
        matches!(self, Self::InApp)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raised when a stored or supplied value is not a known enum variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind}: {value}")]
pub struct ParseEnumError {
    kind: &'static str,
    value: String,
}

impl ParseEnumError {
    pub(crate) fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_owned(),
        }
    }
}

impl FromStr for Channel {
    type Err = ParseEnumError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "SMS" => Ok(Self::Sms),
            "EMAIL" => Ok(Self::Email),
            "IN_APP" => Ok(Self::InApp),
            other => Err(ParseEnumError::new("channel", other)),
        }
    }
}

/// Send status of a notification.
///
/// ```text
/// PREPARE --commit--> PENDING --picked up--> SENDING --success--> SUCCEEDED
///    |                   |                      |
///  cancel           immediate path       failure or timeout
///    v                   v                      v
/// CANCELED        SUCCEEDED/FAILED            FAILED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SendStatus {
    /// Awaiting commit or cancel from the caller's local transaction.
    Prepare,
    /// Cancelled by the caller before commit.
    Canceled,
    /// Ready for dispatch once inside its send window.
    Pending,
    /// Claimed by a dispatcher.
    Sending,
    /// Delivered.
    Succeeded,
    /// Delivery failed or timed out.
    Failed,
}

impl SendStatus {
    /// Stable storage representation.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Prepare => "PREPARE",
            Self::Canceled => "CANCELED",
            Self::Pending => "PENDING",
            Self::Sending => "SENDING",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
        }
    }

    /// Terminal states admit no further transitions.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Canceled)
    }
}

impl fmt::Display for SendStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SendStatus {
    type Err = ParseEnumError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "PREPARE" => Ok(Self::Prepare),
            "CANCELED" => Ok(Self::Canceled),
            "PENDING" => Ok(Self::Pending),
            "SENDING" => Ok(Self::Sending),
            "SUCCEEDED" => Ok(Self::Succeeded),
            "FAILED" => Ok(Self::Failed),
            other => Err(ParseEnumError::new("send status", other)),
        }
    }
}

/// Template reference rendered by the outbound channel adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Template {
    pub id: i64,
    pub version_id: i64,
    pub params: HashMap<String, String>,
}

/// Validation failures raised before any quota or persistence side effect.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NotificationValidationError {
    #[error("biz_id must be positive, got {0}")]
    InvalidBizId(BizId),
    #[error("key must not be empty")]
    EmptyKey,
    #[error("at least one receiver is required")]
    NoReceivers,
    #[error("template id must be positive, got {0}")]
    InvalidTemplateId(i64),
    #[error("template version id must be positive, got {0}")]
    InvalidTemplateVersionId(i64),
    #[error("template params must not be empty")]
    EmptyTemplateParams,
    #[error(transparent)]
    Strategy(#[from] SendStrategyError),
}

/// A notification request that has not been assigned an ID or send window yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationDraft {
    pub biz_id: BizId,
    pub key: String,
    pub receivers: Vec<String>,
    pub channel: Channel,
    pub template: Template,
    pub strategy: SendStrategy,
}

impl NotificationDraft {
    /// Check every field invariant and the strategy against `now`.
    ///
    /// # Errors
    ///
    /// Returns the first violated invariant.
    pub fn validate(&self, now: DateTime<Utc>) -> Result<(), NotificationValidationError> {
        if self.biz_id <= 0 {
            return Err(NotificationValidationError::InvalidBizId(self.biz_id));
        }
        if self.key.trim().is_empty() {
            return Err(NotificationValidationError::EmptyKey);
        }
        if self.receivers.is_empty() {
            return Err(NotificationValidationError::NoReceivers);
        }
        if self.template.id <= 0 {
            return Err(NotificationValidationError::InvalidTemplateId(
                self.template.id,
            ));
        }
        if self.template.version_id <= 0 {
            return Err(NotificationValidationError::InvalidTemplateVersionId(
                self.template.version_id,
            ));
        }
        if self.template.params.is_empty() {
            return Err(NotificationValidationError::EmptyTemplateParams);
        }
        self.strategy.validate(now)?;
        Ok(())
    }

    /// Whether the caller asked for synchronous immediate delivery.
    pub const fn is_immediate(&self) -> bool {
        matches!(self.strategy, SendStrategy::Immediate)
    }

    /// Swap an immediate strategy for a one-minute deadline.
    ///
    /// Asynchronous intake cannot honour "now", so it hands the dispatcher a
    /// short window instead.
    pub fn replace_async_immediate(&mut self, now: DateTime<Utc>) {
        self.strategy = self.strategy.clone().for_async_dispatch(now);
    }

    /// Validate and turn the draft into a [`Notification`] with its window
    /// fixed at `now`.
    ///
    /// # Errors
    ///
    /// Returns [`NotificationValidationError`] when the draft is malformed.
    pub fn into_notification(
        self,
        id: NotificationId,
        status: SendStatus,
        now: DateTime<Utc>,
    ) -> Result<Notification, NotificationValidationError> {
        self.validate(now)?;
        let window = self.strategy.send_window(now)?;
        Ok(Notification {
            id,
            biz_id: self.biz_id,
            key: self.key,
            receivers: self.receivers,
            channel: self.channel,
            template: self.template,
            status,
            scheduled_start: window.start,
            scheduled_end: window.end,
            version: 1,
        })
    }
}

/// A persisted notification.
///
/// ## Invariants
/// - `(biz_id, key)` is unique across the store.
/// - `scheduled_start <= scheduled_end`.
/// - `version` starts at 1 and grows by exactly one per accepted status
///   mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: NotificationId,
    pub biz_id: BizId,
    pub key: String,
    pub receivers: Vec<String>,
    pub channel: Channel,
    pub template: Template,
    pub status: SendStatus,
    pub scheduled_start: DateTime<Utc>,
    pub scheduled_end: DateTime<Utc>,
    pub version: u32,
}

impl Notification {
    /// Return a copy carrying `status`, keeping the observed version for CAS.
    #[must_use]
    pub fn with_status(&self, status: SendStatus) -> Self {
        Self {
            status,
            ..self.clone()
        }
    }

    /// Whether `now` falls inside the send window.
    pub fn is_ready_at(&self, now: DateTime<Utc>) -> bool {
        self.status == SendStatus::Pending
            && self.scheduled_start <= now
            && now <= self.scheduled_end
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use rstest::{fixture, rstest};

    #[fixture]
    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-01T08:00:00Z")
            .expect("valid timestamp")
            .with_timezone(&Utc)
    }

    #[fixture]
    fn draft() -> NotificationDraft {
        NotificationDraft {
            biz_id: 7,
            key: "order-42".to_owned(),
            receivers: vec!["+441234567890".to_owned()],
            channel: Channel::Sms,
            template: Template {
                id: 3,
                version_id: 1,
                params: HashMap::from([("code".to_owned(), "1234".to_owned())]),
            },
            strategy: SendStrategy::Immediate,
        }
    }

    #[rstest]
    #[case(Channel::Sms, "SMS")]
    #[case(Channel::Email, "EMAIL")]
    #[case(Channel::InApp, "IN_APP")]
    fn channel_storage_names(#[case] channel: Channel, #[case] name: &str) {
        assert_eq!(channel.as_str(), name);
        assert_eq!(name.parse::<Channel>().expect("known channel"), channel);
    }

    #[rstest]
    fn unknown_status_is_rejected() {
        let err = "DELIVERED".parse::<SendStatus>().expect_err("unknown status");
        assert_eq!(err.to_string(), "unknown send status: DELIVERED");
    }

    #[rstest]
    #[case(Channel::Sms, [true, false, false])]
    #[case(Channel::Email, [false, true, false])]
    #[case(Channel::InApp, [false, false, true])]
    fn channel_predicates_match_exactly_one(#[case] channel: Channel, #[case] expected: [bool; 3]) {
        assert_eq!(
            [channel.is_sms(), channel.is_email(), channel.is_in_app()],
            expected
        );
    }

    #[rstest]
    #[case(SendStatus::Prepare, false)]
    #[case(SendStatus::Pending, false)]
    #[case(SendStatus::Sending, false)]
    #[case(SendStatus::Succeeded, true)]
    #[case(SendStatus::Failed, true)]
    #[case(SendStatus::Canceled, true)]
    fn terminal_states(#[case] status: SendStatus, #[case] terminal: bool) {
        assert_eq!(status.is_terminal(), terminal);
    }

    #[rstest]
    fn valid_draft_materialises_with_version_one(draft: NotificationDraft, now: DateTime<Utc>) {
        let notification = draft
            .into_notification(99, SendStatus::Pending, now)
            .expect("valid draft");

        assert_eq!(notification.id, 99);
        assert_eq!(notification.version, 1);
        assert_eq!(notification.scheduled_start, now);
        assert_eq!(notification.scheduled_end, now + TimeDelta::minutes(30));
    }

    #[rstest]
    fn zero_biz_id_is_rejected(mut draft: NotificationDraft, now: DateTime<Utc>) {
        draft.biz_id = 0;
        assert_eq!(
            draft.validate(now),
            Err(NotificationValidationError::InvalidBizId(0))
        );
    }

    #[rstest]
    fn blank_key_is_rejected(mut draft: NotificationDraft, now: DateTime<Utc>) {
        draft.key = "  ".to_owned();
        assert_eq!(draft.validate(now), Err(NotificationValidationError::EmptyKey));
    }

    #[rstest]
    fn missing_receivers_are_rejected(mut draft: NotificationDraft, now: DateTime<Utc>) {
        draft.receivers.clear();
        assert_eq!(
            draft.validate(now),
            Err(NotificationValidationError::NoReceivers)
        );
    }

    #[rstest]
    fn empty_template_params_are_rejected(mut draft: NotificationDraft, now: DateTime<Utc>) {
        draft.template.params.clear();
        assert_eq!(
            draft.validate(now),
            Err(NotificationValidationError::EmptyTemplateParams)
        );
    }

    #[rstest]
    fn async_dispatch_replaces_immediate_with_deadline(
        mut draft: NotificationDraft,
        now: DateTime<Utc>,
    ) {
        assert!(draft.is_immediate());
        draft.replace_async_immediate(now);

        assert_eq!(
            draft.strategy,
            SendStrategy::Deadline {
                deadline: now + TimeDelta::minutes(1)
            }
        );
    }

    #[rstest]
    fn readiness_requires_pending_inside_window(draft: NotificationDraft, now: DateTime<Utc>) {
        let notification = draft
            .into_notification(1, SendStatus::Pending, now)
            .expect("valid draft");

        assert!(notification.is_ready_at(now + TimeDelta::minutes(5)));
        assert!(!notification.is_ready_at(now + TimeDelta::minutes(31)));
        assert!(!notification.with_status(SendStatus::Sending).is_ready_at(now));
    }
}
