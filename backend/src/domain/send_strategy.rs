//! Send strategies and their send-window computation.

use chrono::{DateTime, TimeDelta, Utc};

/// Window granted to immediate sends.
pub const IMMEDIATE_WINDOW: TimeDelta = TimeDelta::minutes(30);
/// Jitter tolerance before a scheduled send time.
pub const SCHEDULED_LEAD: TimeDelta = TimeDelta::seconds(3);
/// Deadline given to immediate sends that go through async intake.
pub const ASYNC_IMMEDIATE_DEADLINE: TimeDelta = TimeDelta::minutes(1);

/// Caller-chosen policy deciding when a notification may be sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendStrategy {
    /// Send as soon as possible.
    Immediate,
    /// Send within `delay` of acceptance.
    Delayed { delay: TimeDelta },
    /// Send at `send_at`.
    Scheduled { send_at: DateTime<Utc> },
    /// Send anywhere between `start` and `end`.
    TimeWindow {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
    /// Send before `deadline`.
    Deadline { deadline: DateTime<Utc> },
}

/// Inclusive `[start, end]` interval in which a notification may be sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Reasons a strategy is rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendStrategyError {
    #[error("delay must be positive")]
    NonPositiveDelay,
    #[error("scheduled time {0} is not in the future")]
    ScheduledInPast(DateTime<Utc>),
    #[error("time window start {start} is after end {end}")]
    InvertedWindow {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
    #[error("deadline {0} is not in the future")]
    DeadlineInPast(DateTime<Utc>),
}

impl SendStrategy {
    /// Reject malformed strategies relative to `now`.
    ///
    /// # Errors
    ///
    /// Returns [`SendStrategyError`] for non-positive delays, past scheduled
    /// times or deadlines, and inverted windows.
    pub fn validate(&self, now: DateTime<Utc>) -> Result<(), SendStrategyError> {
        match *self {
            Self::Immediate => Ok(()),
            Self::Delayed { delay } if delay <= TimeDelta::zero() => {
                Err(SendStrategyError::NonPositiveDelay)
            }
            Self::Delayed { .. } => Ok(()),
            Self::Scheduled { send_at } if send_at <= now => {
                Err(SendStrategyError::ScheduledInPast(send_at))
            }
            Self::Scheduled { .. } => Ok(()),
            Self::TimeWindow { start, end } if start > end => {
                Err(SendStrategyError::InvertedWindow { start, end })
            }
            Self::TimeWindow { .. } => Ok(()),
            Self::Deadline { deadline } if deadline <= now => {
                Err(SendStrategyError::DeadlineInPast(deadline))
            }
            Self::Deadline { .. } => Ok(()),
        }
    }

    /// Compute the send window, validating first.
    ///
    /// # Errors
    ///
    /// See [`SendStrategy::validate`].
    pub fn send_window(&self, now: DateTime<Utc>) -> Result<SendWindow, SendStrategyError> {
        self.validate(now)?;
        let window = match *self {
            Self::Immediate => SendWindow {
                start: now,
                end: now + IMMEDIATE_WINDOW,
            },
            Self::Delayed { delay } => SendWindow {
                start: now,
                end: now + delay,
            },
            Self::Scheduled { send_at } => SendWindow {
                start: send_at - SCHEDULED_LEAD,
                end: send_at,
            },
            Self::TimeWindow { start, end } => SendWindow { start, end },
            Self::Deadline { deadline } => SendWindow {
                start: now,
                end: deadline,
            },
        };
        Ok(window)
    }

    /// Map [`SendStrategy::Immediate`] onto a short deadline for async intake.
    #[must_use]
    pub fn for_async_dispatch(self, now: DateTime<Utc>) -> Self {
        match self {
            Self::Immediate => Self::Deadline {
                deadline: now + ASYNC_IMMEDIATE_DEADLINE,
            },
            other => other,
        }
    }
}
