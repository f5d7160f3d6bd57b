//! Disconnected flag derived from acknowledgement latency
//!
//! There is no heartbeat: an expired ack timer raises the flag and the next
//! inbound message of any kind lowers it.

use std::time::{Duration, Instant};

/// Snapshot of the liveness state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Liveness {
    pub disconnected: bool,
    /// Time since the flag went up; zero while connected
    pub elapsed: Duration,
}

impl Liveness {
    pub const CONNECTED: Liveness = Liveness {
        disconnected: false,
        elapsed: Duration::ZERO,
    };
}

#[derive(Clone, Debug, Default)]
pub struct LivenessMonitor {
    disconnected_since: Option<Instant>,
}

impl LivenessMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the flag; returns `true` on the connected -> disconnected edge
    pub fn mark_disconnected(&mut self, now: Instant) -> bool {
        if self.disconnected_since.is_some() {
            return false;
        }
        self.disconnected_since = Some(now);
        true
    }

    /// Lower the flag; returns `true` on the disconnected -> connected edge
    pub fn mark_alive(&mut self) -> bool {
        self.disconnected_since.take().is_some()
    }

    #[inline]
    pub fn is_disconnected(&self) -> bool {
        self.disconnected_since.is_some()
    }

    pub fn status(&self, now: Instant) -> Liveness {
        match self.disconnected_since {
            Some(since) => Liveness {
                disconnected: true,
                elapsed: now.saturating_duration_since(since),
            },
            None => Liveness::CONNECTED,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions() {
        let start = Instant::now();
        let mut monitor = LivenessMonitor::new();
        assert_eq!(monitor.status(start), Liveness::CONNECTED);

        assert!(monitor.mark_disconnected(start));
        assert!(!monitor.mark_disconnected(start + Duration::from_millis(5)));
        assert!(monitor.is_disconnected());

        let status = monitor.status(start + Duration::from_millis(300));
        assert!(status.disconnected);
        assert_eq!(status.elapsed, Duration::from_millis(300));

        assert!(monitor.mark_alive());
        assert!(!monitor.mark_alive());
        assert_eq!(monitor.status(start), Liveness::CONNECTED);
    }
}
