//! Per-connection reader and writer tasks
//!
//! Each accepted socket gets one reader task (this module) and one writer
//! task draining the client's outbox. A single reader per socket keeps
//! bytes, frames, and messages in strict arrival order without any shared
//! queue.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::protocol::frame::FrameCodec;
use crate::protocol::messages::ClientId;
use crate::server::chat_server::ServerState;

/// Receive buffer size for one read pass
pub(crate) const RECV_BUFFER_LEN: usize = 64 * 1024;

/// Drive one client session from accept to close
pub(crate) async fn serve(
    state: Arc<ServerState>,
    stream: TcpStream,
    addr: SocketAddr,
    mut shutdown: watch::Receiver<bool>,
) {
    let (reader, writer) = stream.into_split();
    let (outbox_tx, outbox_rx) = mpsc::unbounded_channel();

    let id = state.register_client(addr, outbox_tx);
    info!("new connection from {} as client {}", addr, id);

    let writer_task = tokio::spawn(write_outbox(id, writer, outbox_rx));

    match read_loop(&state, id, reader, &mut shutdown).await {
        Ok(()) => info!("client {} closed", id),
        Err(e) => warn!("client {} closed: {}", id, e),
    }

    // Dropping the registry record drops the outbox sender; the writer
    // flushes whatever was queued and exits, closing the socket once.
    state.drop_client(id);
    let _ = writer_task.await;
}

/// Read, frame, decode, and dispatch until EOF, error, or shutdown
async fn read_loop(
    state: &ServerState,
    id: ClientId,
    mut reader: OwnedReadHalf,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<()> {
    let mut frames = FrameCodec::new();
    let mut codec = state.format().codec();
    let mut buf = vec![0u8; RECV_BUFFER_LEN];

    loop {
        tokio::select! {
            _ = shutdown.changed() => return Ok(()),
            read = reader.read(&mut buf) => {
                let n = read?;
                if n == 0 {
                    debug!("client {} reached EOF", id);
                    return Ok(());
                }

                frames.feed(&buf[..n]);
                while let Some(payload) = frames.next_payload() {
                    if let Some(request) = codec.decode(&payload)? {
                        state.dispatch(id, request)?;
                    }
                }
            }
        }
    }
}

/// Drain the outbox onto the socket
async fn write_outbox(
    id: ClientId,
    mut writer: OwnedWriteHalf,
    mut outbox: mpsc::UnboundedReceiver<Bytes>,
) {
    while let Some(wire) = outbox.recv().await {
        if let Err(e) = writer.write_all(&wire).await {
            warn!("send to client {} failed: {}", id, e);
            break;
        }
    }
}
