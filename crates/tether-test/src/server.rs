//! Simulated backend served over TCP

use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use tether_core::{Outbound, TetherError, TetherResult};
use tether_transport::{encode_line, start_receive_loop};

use crate::SimulatedBackend;

/// Answer one client connection until it closes
pub async fn serve_connection(stream: TcpStream, backend: Arc<Mutex<SimulatedBackend>>) -> TetherResult<()> {
    let (reader, mut writer) = stream.into_split();
    let mut requests = start_receive_loop::<Outbound, _>(reader, 64);

    while let Some(message) = requests.recv().await {
        let replies = {
            let mut backend = backend.lock();
            backend.handle_batch(vec![message]);
            backend.drain()
        };
        for reply in replies {
            let line = encode_line(&reply)?;
            writer
                .write_all(line.as_bytes())
                .await
                .map_err(|e| TetherError::TransportError(e.to_string()))?;
        }
        writer
            .flush()
            .await
            .map_err(|e| TetherError::TransportError(e.to_string()))?;
    }
    debug!("client disconnected");
    Ok(())
}

/// Bind a loopback listener and serve every connection it accepts
pub async fn spawn_server(backend: Arc<Mutex<SimulatedBackend>>) -> TetherResult<(SocketAddr, JoinHandle<()>)> {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .map_err(|e| TetherError::TransportError(e.to_string()))?;
    let addr = listener
        .local_addr()
        .map_err(|e| TetherError::TransportError(e.to_string()))?;
    info!(%addr, "simulated backend listening");

    let task = tokio::spawn(async move {
        while let Ok((stream, peer)) = listener.accept().await {
            debug!(%peer, "client connected");
            let backend = backend.clone();
            tokio::spawn(async move {
                if let Err(e) = serve_connection(stream, backend).await {
                    tracing::warn!(error = %e, "connection failed");
                }
            });
        }
    });
    Ok((addr, task))
}
