//! Injectable time source.
//!
//! Rate windows, the scaling controller, and ETA math all read the clock
//! through this trait so tests can drive time deterministically.

use std::time::{Instant, SystemTime};

pub trait TimeProvider: Send + Sync {
    /// Monotonic reading for intervals and sample timestamps.
    fn now(&self) -> Instant;
    /// Wall-clock reading for start/end/completion timestamps.
    fn system_now(&self) -> SystemTime;
}

/// The process clocks. Default provider on every engine.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl TimeProvider for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn system_now(&self) -> SystemTime {
        SystemTime::now()
    }
}
