//! Port for globally unique notification identifiers.

use crate::domain::NotificationId;

use super::define_port_error;

define_port_error! {
    /// Errors raised by ID generators.
    pub enum IdGeneratorError {
        /// The wall clock stepped back past the last issued tick.
        ClockMovedBackwards { millis: u64 } => "clock moved backwards by {millis}ms",
        /// The generator's time range is used up.
        Exhausted => "id generator time range exhausted",
    }
}

/// Issues 64-bit ids that never repeat within or across processes.
#[cfg_attr(test, mockall::automock)]
pub trait NotificationIdGenerator: Send + Sync {
    fn next_id(&self) -> Result<NotificationId, IdGeneratorError>;
}
