//! UDP transport: one JSON message per datagram

use std::net::SocketAddr;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

use tether_core::{Outbound, TetherError, TetherResult};

use crate::{decode, encode, Transport};

/// Largest payload a single UDP datagram can carry
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

/// UDP transport connected to a single backend peer
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
    local_addr: SocketAddr,
}

impl UdpTransport {
    /// Bind to a local address
    pub async fn bind(addr: SocketAddr) -> TetherResult<Self> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|e| TetherError::TransportError(e.to_string()))?;

        let local_addr = socket
            .local_addr()
            .map_err(|e| TetherError::TransportError(e.to_string()))?;

        Ok(UdpTransport {
            socket: Arc::new(socket),
            local_addr,
        })
    }

    /// Get local address
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Fix the peer all messages go to and come from
    pub async fn connect(&self, peer: SocketAddr) -> TetherResult<()> {
        self.socket
            .connect(peer)
            .await
            .map_err(|e| TetherError::TransportError(e.to_string()))
    }

    /// Send a message to the connected peer
    pub async fn send_message<T: Serialize>(&self, message: &T) -> TetherResult<()> {
        let bytes = encode(message)?;
        if bytes.len() > MAX_DATAGRAM_SIZE {
            return Err(TetherError::TransportError(format!(
                "message of {} bytes exceeds a datagram",
                bytes.len()
            )));
        }
        self.socket
            .send(&bytes)
            .await
            .map_err(|e| TetherError::TransportError(e.to_string()))?;
        Ok(())
    }

    /// Receive one message from the connected peer
    pub async fn recv_message<T: DeserializeOwned>(&self) -> TetherResult<T> {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        let len = self
            .socket
            .recv(&mut buf)
            .await
            .map_err(|e| TetherError::TransportError(e.to_string()))?;

        decode(&buf[..len])
    }

    /// Get a clone of the socket for concurrent operations
    pub fn socket(&self) -> Arc<UdpSocket> {
        Arc::clone(&self.socket)
    }
}

impl Transport for UdpTransport {
    fn send(&mut self, message: Outbound) -> TetherResult<()> {
        let bytes = encode(&message)?;
        self.socket
            .try_send(&bytes)
            .map(|_| ())
            .map_err(|e| TetherError::TransportError(e.to_string()))
    }
}

/// Start a background loop decoding every datagram into a message
pub fn start_datagram_loop<T>(socket: Arc<UdpSocket>, buffer_size: usize) -> mpsc::Receiver<T>
where
    T: DeserializeOwned + Send + 'static,
{
    let (tx, rx) = mpsc::channel(buffer_size);

    tokio::spawn(async move {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        loop {
            match socket.recv(&mut buf).await {
                Ok(len) => match decode::<T>(&buf[..len]) {
                    Ok(message) => {
                        if tx.send(message).await.is_err() {
                            break; // Receiver dropped
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "skipping malformed datagram"),
                },
                Err(e) => {
                    tracing::warn!("UDP receive error: {}", e);
                }
            }
        }
    });

    rx
}
