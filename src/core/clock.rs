//! Injectable time source.
//!
//! Rate-limit windows, circuit-breaker cooldowns, cache TTLs and the
//! requests-per-minute sample all read "now" through [`Clock`], so tests can move
//! time forward with [`ManualClock`] instead of sleeping.

use parking_lot::Mutex;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Monotonic time source
pub trait Clock: Send + Sync + Debug {
    /// Current instant
    fn now(&self) -> Instant;
}

/// Shared handle to a clock
pub type SharedClock = Arc<dyn Clock>;

/// The default [`Clock`] backed by [`Instant::now`]
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    /// Move the clock forward
    pub fn advance(&self, by: Duration) {
        *self.offset.lock() += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + *self.offset.lock()
    }
}

/// Convenience constructor for the system clock
pub fn system_clock() -> SharedClock {
    Arc::new(SystemClock)
}
