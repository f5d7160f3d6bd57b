//! Transport that keeps everything it is asked to send

use std::sync::Arc;

use parking_lot::Mutex;

use tether_core::{Outbound, TetherError, TetherResult};

use crate::Transport;

/// Captures outbound messages; clones share the same log
#[derive(Clone, Debug, Default)]
pub struct RecordingTransport {
    sent: Arc<Mutex<Vec<Outbound>>>,
    closed: Arc<Mutex<bool>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything sent so far
    pub fn sent(&self) -> Vec<Outbound> {
        self.sent.lock().clone()
    }

    /// Drain the log
    pub fn take(&self) -> Vec<Outbound> {
        std::mem::take(&mut *self.sent.lock())
    }

    pub fn len(&self) -> usize {
        self.sent.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sent.lock().is_empty()
    }

    pub fn last(&self) -> Option<Outbound> {
        self.sent.lock().last().cloned()
    }

    /// Make subsequent sends fail, as a dropped connection would
    pub fn close(&self) {
        *self.closed.lock() = true;
    }
}

impl Transport for RecordingTransport {
    fn send(&mut self, message: Outbound) -> TetherResult<()> {
        if *self.closed.lock() {
            return Err(TetherError::TransportError("recording transport closed".to_string()));
        }
        self.sent.lock().push(message);
        Ok(())
    }
}
