use crate::error::ServerError;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::{mpsc, watch};
use tracing::{debug, trace};

/// The connection a [`Session`](crate::Session) writes through.
///
/// Calls come from the tick loop and must never block on the network.
pub trait Transport: Send + Sync + 'static {
    /// Queues an encoded frame.
    fn write(&self, frame: Vec<u8>) -> Result<(), ServerError>;

    /// Pushes every queued frame to the peer.
    fn flush(&self) -> Result<(), ServerError>;

    /// Closes the connection. Closing twice is a no-op.
    fn close(&self, reason: &str);

    fn is_active(&self) -> bool;

    fn remote_addr(&self) -> SocketAddr;
}

#[derive(Debug)]
pub(crate) enum Outbound {
    Frame(Vec<u8>),
    Flush,
    Close,
}

/// [`Transport`] over a tokio TCP stream.
///
/// Frames go through an unbounded channel to a writer task that owns the
/// buffered write half, so producers on any thread return immediately.
#[derive(Debug)]
pub struct TcpTransport {
    remote: SocketAddr,
    active: AtomicBool,
    sender: mpsc::UnboundedSender<Outbound>,
    closed: watch::Sender<bool>,
}

impl TcpTransport {
    pub(crate) fn new(
        remote: SocketAddr,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<Outbound>, watch::Receiver<bool>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let (closed, closed_receiver) = watch::channel(false);
        let transport = Arc::new(Self {
            remote,
            active: AtomicBool::new(true),
            sender,
            closed,
        });
        (transport, receiver, closed_receiver)
    }

    fn push(&self, command: Outbound) -> Result<(), ServerError> {
        if !self.is_active() {
            return Err(ServerError::Network(format!("connection to {} is closed", self.remote)));
        }
        self.sender
            .send(command)
            .map_err(|_| ServerError::Network(format!("writer for {} has stopped", self.remote)))
    }
}

impl Transport for TcpTransport {
    fn write(&self, frame: Vec<u8>) -> Result<(), ServerError> {
        self.push(Outbound::Frame(frame))
    }

    fn flush(&self) -> Result<(), ServerError> {
        self.push(Outbound::Flush)
    }

    fn close(&self, reason: &str) {
        if self.active.swap(false, Ordering::AcqRel) {
            debug!("🔌 Closing connection to {}: {}", self.remote, reason);
            let _ = self.sender.send(Outbound::Close);
            self.closed.send_replace(true);
        }
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    fn remote_addr(&self) -> SocketAddr {
        self.remote
    }
}

/// Drains transport commands into the socket until closed.
pub(crate) async fn write_loop(
    mut writer: BufWriter<OwnedWriteHalf>,
    mut commands: mpsc::UnboundedReceiver<Outbound>,
) -> std::io::Result<()> {
    while let Some(command) = commands.recv().await {
        match command {
            Outbound::Frame(frame) => writer.write_all(&frame).await?,
            Outbound::Flush => writer.flush().await?,
            Outbound::Close => break,
        }
    }
    trace!("Writer loop finished");
    writer.flush().await?;
    writer.shutdown().await
}
