//! TCP record server.
//!
//! Accepts connections on a tokio listener and answers each frame with the
//! [`Dispatcher`]. Record access blocks on record locks and device I/O, so
//! every request runs on the blocking pool; frames from one client are
//! answered in order.

use bytes::BytesMut;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use crate::codec::{decode_frame, encode_frame, Message};
use crate::dispatcher::Dispatcher;
use crate::error::{NetError, NetResult};

const READ_CHUNK: usize = 4096;

/// Serve `dispatcher` on `listener` until the listener fails.
pub async fn serve(listener: TcpListener, dispatcher: Arc<Dispatcher>) -> std::io::Result<()> {
    serve_until(listener, dispatcher, std::future::pending()).await
}

/// Serve `dispatcher` on `listener` until `shutdown` completes. Clients
/// already connected keep their tasks.
pub async fn serve_until(
    listener: TcpListener,
    dispatcher: Arc<Dispatcher>,
    shutdown: impl Future<Output = ()>,
) -> std::io::Result<()> {
    info!(
        server = %dispatcher.name(),
        address = %listener.local_addr()?,
        "record server listening"
    );
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((socket, peer)) => {
                    let dispatcher = Arc::clone(&dispatcher);
                    tokio::spawn(async move {
                        if let Err(e) = handle_client(socket, peer, dispatcher).await {
                            warn!(%peer, error = %e, "client error");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "accept failed");
                    return Err(e);
                }
            },
            () = &mut shutdown => {
                info!(server = %dispatcher.name(), "record server stopped");
                return Ok(());
            }
        }
    }
}

async fn handle_client(
    mut socket: TcpStream,
    peer: SocketAddr,
    dispatcher: Arc<Dispatcher>,
) -> NetResult<()> {
    info!(%peer, "client connected");
    socket.set_nodelay(true)?;
    let mut inbound = BytesMut::with_capacity(READ_CHUNK);

    loop {
        let frame = match decode_frame(&mut inbound) {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                if socket.read_buf(&mut inbound).await? == 0 {
                    info!(%peer, "client disconnected");
                    return Ok(());
                }
                continue;
            }
            Err(e) => {
                // Framing is lost; answer once and drop the client.
                warn!(%peer, error = %e, "undecodable frame");
                let reply = encode_frame(0, &Message::Error(e.into()))?;
                socket.write_all(&reply).await?;
                socket.shutdown().await?;
                return Ok(());
            }
        };

        let request_id = frame.request_id;
        let handler = Arc::clone(&dispatcher);
        let reply = tokio::task::spawn_blocking(move || handler.handle_frame(frame))
            .await
            .map_err(|e| NetError::Protocol(format!("request {request_id} aborted: {e}")))??;
        debug!(%peer, request_id, len = reply.len(), "reply");
        socket.write_all(&reply).await?;
    }
}
