//! Clock implementations for acknowledgement timing

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Source of monotonic time for timers and liveness
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Monotonic OS clock
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to
///
/// Clones share the same time, so a test can keep one handle while the
/// runtime owns another.
#[derive(Clone)]
pub struct ManualClock {
    origin: Instant,
    offset: Arc<Mutex<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        ManualClock {
            origin: Instant::now(),
            offset: Arc::new(Mutex::new(Duration::ZERO)),
        }
    }

    /// Move time forward
    pub fn advance(&self, by: Duration) {
        *self.offset.lock() += by;
    }

    /// Time elapsed since the clock was created
    pub fn elapsed(&self) -> Duration {
        *self.offset.lock()
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

impl fmt::Debug for ManualClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualClock")
            .field("elapsed", &self.elapsed())
            .finish()
    }
}
