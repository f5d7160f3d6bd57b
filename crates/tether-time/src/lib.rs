//! Tether Time - clocks and acknowledgement timing
//!
//! This crate implements the timing side of the protocol:
//! - A `Clock` abstraction (system clock and a manually advanced test clock)
//! - Per-event acknowledgement timers
//! - The disconnected flag derived from acknowledgement latency

pub mod clock;
pub mod timer;
pub mod liveness;

pub use clock::*;
pub use timer::*;
pub use liveness::*;
