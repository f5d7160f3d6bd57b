//! Newline-delimited JSON over async byte streams

use std::net::SocketAddr;

use serde::de::DeserializeOwned;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use tether_core::{Inbound, TetherError, TetherResult};

use crate::{channel, decode_line, encode_line, ChannelTransport, InboundReceiver};

/// Spawn a task writing every sent message as one JSON line
///
/// The task ends when every clone of the returned transport is dropped or
/// the writer fails.
pub fn spawn_line_writer<W>(writer: W) -> ChannelTransport
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (transport, mut rx) = channel();

    tokio::spawn(async move {
        let mut writer = writer;
        while let Some(message) = rx.recv().await {
            let line = match encode_line(&message) {
                Ok(line) => line,
                Err(e) => {
                    tracing::warn!(error = %e, "dropping unencodable outbound message");
                    continue;
                }
            };
            if let Err(e) = writer.write_all(line.as_bytes()).await {
                tracing::warn!("stream write error: {}", e);
                break;
            }
            if let Err(e) = writer.flush().await {
                tracing::warn!("stream flush error: {}", e);
                break;
            }
        }
    });

    transport
}

/// Start a background loop decoding one message per line
///
/// Malformed lines are logged and skipped; the loop ends at end of stream,
/// on a read error, or when the receiver is dropped.
pub fn start_receive_loop<T, R>(reader: R, buffer_size: usize) -> mpsc::Receiver<T>
where
    T: DeserializeOwned + Send + 'static,
    R: AsyncRead + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(buffer_size);

    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match decode_line::<T>(&line) {
                        Ok(message) => {
                            if tx.send(message).await.is_err() {
                                break; // Receiver dropped
                            }
                        }
                        Err(e) => tracing::warn!(error = %e, "skipping malformed line"),
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!("stream receive error: {}", e);
                    break;
                }
            }
        }
    });

    rx
}

/// Connect to a backend over TCP, returning the outbound transport and the
/// inbound message channel
pub async fn connect(addr: SocketAddr, buffer_size: usize) -> TetherResult<(ChannelTransport, InboundReceiver)> {
    let stream = TcpStream::connect(addr)
        .await
        .map_err(|e| TetherError::TransportError(e.to_string()))?;
    stream
        .set_nodelay(true)
        .map_err(|e| TetherError::TransportError(e.to_string()))?;

    let (reader, writer) = stream.into_split();
    let inbound = start_receive_loop::<Inbound, _>(reader, buffer_size);
    Ok((spawn_line_writer(writer), inbound))
}
