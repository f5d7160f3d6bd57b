//! Acknowledgement timer of a single emitted event

use std::time::{Duration, Instant};

/// Armed when an event is emitted, cleared by its first ack or by a rollback
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AckTimer {
    armed_at: Instant,
    deadline: Instant,
    cleared: bool,
}

impl AckTimer {
    pub fn arm(now: Instant, timeout: Duration) -> Self {
        AckTimer {
            armed_at: now,
            deadline: now + timeout,
            cleared: false,
        }
    }

    /// Cancel the timer; returns `true` only for the first clear
    pub fn clear(&mut self) -> bool {
        !std::mem::replace(&mut self.cleared, true)
    }

    #[inline]
    pub fn is_cleared(&self) -> bool {
        self.cleared
    }

    /// Still armed and past its deadline
    pub fn is_expired(&self, now: Instant) -> bool {
        !self.cleared && now >= self.deadline
    }

    pub fn armed_at(&self) -> Instant {
        self.armed_at
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Time left before expiry; zero once expired or cleared
    pub fn remaining(&self, now: Instant) -> Duration {
        if self.cleared {
            return Duration::ZERO;
        }
        self.deadline.saturating_duration_since(now)
    }
}
