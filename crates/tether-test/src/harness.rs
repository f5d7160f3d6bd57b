//! Deterministic client/backend harness
//!
//! Wires a `SyncRuntime` to a `SimulatedBackend` through a recording
//! transport and a manual clock. Nothing moves until the test pumps.

use std::sync::Arc;
use std::time::Duration;

use tether_core::TetherResult;
use tether_runtime::{RuntimeConfig, SyncRuntime};
use tether_time::{Liveness, ManualClock};
use tether_transport::RecordingTransport;

use crate::SimulatedBackend;

/// Upper bound on pump rounds before the harness assumes a feedback loop
const MAX_ROUNDS: usize = 64;

pub struct Harness {
    pub runtime: SyncRuntime,
    pub backend: SimulatedBackend,
    transport: RecordingTransport,
    clock: ManualClock,
}

impl Harness {
    pub fn new() -> TetherResult<Self> {
        Self::with_config(RuntimeConfig::default())
    }

    pub fn with_config(config: RuntimeConfig) -> TetherResult<Self> {
        let transport = RecordingTransport::new();
        let clock = ManualClock::new();
        let backend = SimulatedBackend::new(&config)?;
        let runtime = SyncRuntime::with_clock(config, transport.clone(), Arc::new(clock.clone()))?;
        Ok(Harness {
            runtime,
            backend,
            transport,
            clock,
        })
    }

    pub fn transport(&self) -> &RecordingTransport {
        &self.transport
    }

    pub fn clock(&self) -> &ManualClock {
        &self.clock
    }

    /// Exchange messages until both sides are quiet; returns how many
    /// inbound messages the runtime received
    pub fn pump(&mut self) -> usize {
        let mut delivered = 0;
        for _ in 0..MAX_ROUNDS {
            let outbound = self.transport.take();
            if outbound.is_empty() && !self.backend.has_pending() {
                return delivered;
            }
            self.backend.handle_batch(outbound);
            delivered += self.deliver();
        }
        tracing::warn!(rounds = MAX_ROUNDS, "pump did not settle");
        delivered
    }

    /// Hand everything the backend queued to the runtime, without sending
    /// anything new to the backend
    pub fn deliver(&mut self) -> usize {
        let messages = self.backend.drain();
        let count = messages.len();
        for message in messages {
            // Failures are counted in the runtime stats
            let _ = self.runtime.receive(message);
        }
        count
    }

    /// Move the clock and poll the runtime's timers
    pub fn advance(&mut self, by: Duration) -> Liveness {
        self.clock.advance(by);
        self.runtime.tick()
    }
}
