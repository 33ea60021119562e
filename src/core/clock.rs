//! Simulation Clock
//!
//! Per-tick simulation time. One tick per network frame, advanced
//! cooperatively by the owning session. Time only moves forward.

use serde::{Serialize, Deserialize};

use crate::TICK_RATE;

/// Simulation time in seconds since the clock started.
///
/// Informational only: race order is append order, never timestamp order.
pub type SimTime = f64;

/// Monotonic tick counter with a fixed tick rate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimClock {
    /// Ticks elapsed
    tick: u32,
    /// Ticks per second
    tick_rate: u32,
}

impl SimClock {
    /// Create a clock at tick 0.
    ///
    /// A zero tick rate falls back to [`TICK_RATE`].
    pub fn new(tick_rate: u32) -> Self {
        Self {
            tick: 0,
            tick_rate: if tick_rate == 0 { TICK_RATE } else { tick_rate },
        }
    }

    /// Advance by one tick and return the new tick number.
    #[inline]
    pub fn advance(&mut self) -> u32 {
        self.tick = self.tick.saturating_add(1);
        self.tick
    }

    /// Current tick.
    #[inline]
    pub fn tick(&self) -> u32 {
        self.tick
    }

    /// Ticks per second.
    #[inline]
    pub fn tick_rate(&self) -> u32 {
        self.tick_rate
    }

    /// Seconds covered by one tick.
    #[inline]
    pub fn delta(&self) -> SimTime {
        1.0 / self.tick_rate as SimTime
    }

    /// Current simulation time in seconds.
    #[inline]
    pub fn now(&self) -> SimTime {
        self.tick as SimTime / self.tick_rate as SimTime
    }
}

impl Default for SimClock {
    fn default() -> Self {
        Self::new(TICK_RATE)
    }
}
