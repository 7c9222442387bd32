//! Time-ordered 64-bit id generator.
//!
//! Layout, most significant first: 39 bits of 10 ms ticks since
//! 2026-01-01T00:00:00Z, 8 bits of per-tick sequence, 16 bits of machine id.
//! When a tick's sequence runs out the generator borrows the next tick, so
//! ids stay unique and increasing under bursts.

use std::sync::{Arc, Mutex, PoisonError};

use mockable::Clock;

use crate::domain::NotificationId;
use crate::domain::ports::{IdGeneratorError, NotificationIdGenerator};

const EPOCH_MILLIS: i64 = 1_767_225_600_000;
const TICK_MILLIS: i64 = 10;
const TIME_BITS: u32 = 39;
const SEQUENCE_BITS: u32 = 8;
const MACHINE_BITS: u32 = 16;
const SEQUENCE_MASK: u16 = (1 << SEQUENCE_BITS) - 1;
const MAX_TICK: i64 = (1 << TIME_BITS) - 1;

#[derive(Debug, Default)]
struct State {
    /// Latest tick read from the clock.
    observed: i64,
    /// Tick encoded into the last issued id; may run ahead of `observed`.
    issued: i64,
    sequence: u16,
}

/// Sonyflake-style generator bound to one machine id.
pub struct SnowflakeIdGenerator {
    machine_id: u16,
    clock: Arc<dyn Clock>,
    state: Mutex<State>,
}

impl SnowflakeIdGenerator {
    /// Generator stamping `machine_id` into the low bits of every id.
    pub fn new(machine_id: u16, clock: Arc<dyn Clock>) -> Self {
        Self {
            machine_id,
            clock,
            state: Mutex::new(State::default()),
        }
    }

    fn current_tick(&self) -> Result<i64, IdGeneratorError> {
        let since_epoch = self.clock.utc().timestamp_millis() - EPOCH_MILLIS;
        if since_epoch < 0 {
            return Err(IdGeneratorError::clock_moved_backwards(
                since_epoch.unsigned_abs(),
            ));
        }
        Ok(since_epoch / TICK_MILLIS)
    }

    fn compose(&self, tick: i64, sequence: u16) -> NotificationId {
        // tick is bounded by MAX_TICK and non-negative here.
        let tick = tick.unsigned_abs();
        (tick << (SEQUENCE_BITS + MACHINE_BITS))
            | (u64::from(sequence) << MACHINE_BITS)
            | u64::from(self.machine_id)
    }
}

impl NotificationIdGenerator for SnowflakeIdGenerator {
    fn next_id(&self) -> Result<NotificationId, IdGeneratorError> {
        let tick = self.current_tick()?;
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        if tick < state.observed {
            let behind = (state.observed - tick) * TICK_MILLIS;
            return Err(IdGeneratorError::clock_moved_backwards(
                behind.unsigned_abs(),
            ));
        }
        state.observed = tick;

        if tick > state.issued {
            state.issued = tick;
            state.sequence = 0;
        } else {
            state.sequence = (state.sequence + 1) & SEQUENCE_MASK;
            if state.sequence == 0 {
                state.issued += 1;
            }
        }

        if state.issued > MAX_TICK {
            return Err(IdGeneratorError::exhausted());
        }
        Ok(self.compose(state.issued, state.sequence))
    }
}
