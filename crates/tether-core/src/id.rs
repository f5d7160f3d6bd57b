//! Identity types for the replication engine

use std::fmt;

use serde::{Deserialize, Serialize};

/// Event identity - strictly increasing per runtime instance
///
/// Only locally-originated mutations carry an `EventId`. On the wire ids are
/// signed and a negative id marks an event the remote side originated itself.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(pub u64);

impl EventId {
    pub const ZERO: EventId = EventId(0);

    #[inline]
    pub fn new(id: u64) -> Self {
        EventId(id)
    }

    /// The id that follows this one
    #[inline]
    pub fn next(self) -> Self {
        EventId(self.0 + 1)
    }

    /// Interpret a signed wire id; negative ids have no local counterpart
    #[inline]
    pub fn from_wire(id: i64) -> Option<Self> {
        u64::try_from(id).ok().map(EventId)
    }

    #[inline]
    pub fn to_wire(self) -> i64 {
        i64::try_from(self.0).unwrap_or(i64::MAX)
    }
}

impl fmt::Debug for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Event({})", self.0)
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Remote-originated wire id
pub const REMOTE_ID: i64 = -1;
