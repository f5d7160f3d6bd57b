//! In-process channel transport

use tokio::sync::mpsc;

use tether_core::{Inbound, Outbound, TetherError, TetherResult};

use crate::Transport;

/// Inbound message channel
pub type InboundReceiver = mpsc::Receiver<Inbound>;

/// Inbound message sender
pub type InboundSender = mpsc::Sender<Inbound>;

/// Outbound transport backed by an unbounded tokio channel
#[derive(Clone, Debug)]
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<Outbound>,
}

impl ChannelTransport {
    pub fn new(tx: mpsc::UnboundedSender<Outbound>) -> Self {
        ChannelTransport { tx }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Create a channel transport and the receiver for what it sends
pub fn channel() -> (ChannelTransport, mpsc::UnboundedReceiver<Outbound>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ChannelTransport::new(tx), rx)
}

impl Transport for ChannelTransport {
    fn send(&mut self, message: Outbound) -> TetherResult<()> {
        self.tx
            .send(message)
            .map_err(|_| TetherError::TransportError("outbound channel closed".to_string()))
    }
}
