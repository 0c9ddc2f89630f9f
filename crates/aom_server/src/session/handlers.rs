//! Per-connection task: wires a TCP stream to a [`Session`].

use super::core::Session;
use super::manager::SessionManager;
use super::transport::{write_loop, TcpTransport};
use crate::error::ServerError;
use crate::pipeline::MessageDecoder;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, BufWriter};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::{debug, error, info};

const READ_BUFFER_SIZE: usize = 8 * 1024;

/// Handles a single client connection from accept to cleanup.
///
/// # Connection Flow
///
/// 1. Split the stream and start the writer task
/// 2. Create the session and hand it to the manager, which raises the
///    connected event
/// 3. Decode inbound bytes into the session's inbound queue until the peer
///    leaves, the session is disconnected or the manager stops
/// 4. Close the session, take it out of the registry and wait for the writer
///    to flush
pub(crate) async fn handle_connection(
    manager: Arc<SessionManager>,
    stream: TcpStream,
    remote: SocketAddr,
    shutdown: watch::Receiver<bool>,
) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!("Failed to set TCP_NODELAY for {}: {}", remote, e);
    }
    let (reader, writer) = stream.into_split();
    let (transport, commands, closed) = TcpTransport::new(remote);
    let writer_task = tokio::spawn(write_loop(BufWriter::new(writer), commands));

    let session = Session::new(transport, Some(manager.default_protocol()), Arc::clone(manager.events()));
    session.set_uncaught_handler(manager.uncaught_handler());
    info!("🔗 Session {} from {}", session.id(), remote);
    manager.add(&session);

    if let Err(e) = read_loop(&session, reader, closed, shutdown).await {
        // Frame or decode failures leave the stream out of sync.
        (session.uncaught_handler())(&session, &e);
    }

    session.disconnect("<Inactive>");
    manager.remove(&session);

    match writer_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!("Writer for {} ended with: {}", remote, e),
        Err(e) => error!("Writer task for {} failed: {}", remote, e),
    }
}

async fn read_loop(
    session: &Arc<Session>,
    mut reader: OwnedReadHalf,
    mut closed: watch::Receiver<bool>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), ServerError> {
    let mut decoder = MessageDecoder::new();
    let mut buffer = vec![0u8; READ_BUFFER_SIZE];
    loop {
        if *closed.borrow() || *shutdown.borrow() {
            return Ok(());
        }
        tokio::select! {
            changed = closed.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
            }
            read = reader.read(&mut buffer) => {
                let read = read?;
                if read == 0 {
                    debug!("🔌 Peer {} closed the connection", session.remote_addr());
                    return Ok(());
                }
                decoder.decode(session, &buffer[..read])?;
            }
        }
    }
}
