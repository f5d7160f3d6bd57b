//! Tether Transport Layer - the message channel to the authoritative backend
//!
//! This crate provides:
//! - The `Transport` seam used by the runtime to send outbound messages
//! - Newline-delimited JSON codec
//! - In-process channel transport
//! - Stream transport over any async reader/writer (TCP, pipes)
//! - UDP datagram transport
//! - Recording transport for tests and simulators

pub mod codec;
pub mod channel;
pub mod stream;
pub mod udp;
pub mod recording;

pub use codec::*;
pub use channel::*;
pub use stream::*;
pub use udp::*;
pub use recording::*;

use tether_core::{Outbound, TetherResult};

/// Outbound half of the connection; sending never waits for the remote side
pub trait Transport: Send {
    fn send(&mut self, message: Outbound) -> TetherResult<()>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn send(&mut self, message: Outbound) -> TetherResult<()> {
        (**self).send(message)
    }
}
