//! WebSocket connection split into an outbound handle and an inbound reader.

use std::net::SocketAddr;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, trace, warn};

use crate::error::ProtocolError;
use crate::wire::{self, MAX_MESSAGE_SIZE};

/// Capacity of each connection's outbound queue.
pub const OUTBOUND_CAPACITY: usize = 256;

/// Process-local identifier of one WebSocket connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Work items for a connection's writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// An encoded JSON frame.
    Text(String),
    /// Send a close frame and stop writing.
    Close,
}

/// Cloneable, non-blocking sending side of a connection.
///
/// Sends never wait: a full queue drops the message, a closed connection
/// reports [`ProtocolError::StreamClosed`]. Delivery is at most once.
#[derive(Debug, Clone)]
pub struct PeerHandle {
    id: ConnectionId,
    tx: mpsc::Sender<Outbound>,
}

impl PeerHandle {
    /// A handle whose outbound queue is exposed directly instead of being
    /// drained into a socket. Used for in-memory parties.
    pub fn detached(id: ConnectionId) -> (Self, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(OUTBOUND_CAPACITY);
        (Self { id, tx }, rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Encode and enqueue a message.
    pub fn send<T: Serialize>(&self, msg: &T) -> Result<(), ProtocolError> {
        let text = wire::encode(msg)?;
        self.push(Outbound::Text(text))
    }

    /// Enqueue an already encoded frame.
    pub fn send_text(&self, text: String) -> Result<(), ProtocolError> {
        self.push(Outbound::Text(text))
    }

    /// Ask the writer to close the connection. Idempotent.
    pub fn close(&self) {
        if self.tx.try_send(Outbound::Close).is_err() {
            trace!(conn = %self.id, "close requested on finished connection");
        }
    }

    /// Whether the writer side has gone away.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Wait until the writer side has gone away.
    pub async fn closed(&self) {
        self.tx.closed().await;
    }

    fn push(&self, item: Outbound) -> Result<(), ProtocolError> {
        self.tx.try_send(item).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => ProtocolError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => ProtocolError::StreamClosed,
        })
    }
}

impl PartialEq for PeerHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for PeerHandle {}

/// An established WebSocket connection, before it is split.
pub struct PeerConnection<S> {
    stream: WebSocketStream<S>,
    remote: Option<SocketAddr>,
}

impl<S> PeerConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(stream: WebSocketStream<S>, remote: Option<SocketAddr>) -> Self {
        Self { stream, remote }
    }

    /// Get the remote address of this connection, when known.
    pub fn remote_address(&self) -> Option<SocketAddr> {
        self.remote
    }

    /// Split into a sending handle and a receiver.
    ///
    /// Spawns the writer task that drains the handle's queue into the socket.
    /// The task ends after a close request, on a write error, or once every
    /// handle has been dropped.
    pub fn split(self, id: ConnectionId) -> (PeerHandle, MessageReceiver<S>) {
        let (sink, stream) = self.stream.split();
        let (tx, rx) = mpsc::channel(OUTBOUND_CAPACITY);
        tokio::spawn(write_loop(id, sink, rx));
        (PeerHandle { id, tx }, MessageReceiver { id, stream })
    }
}

async fn write_loop<S>(
    id: ConnectionId,
    mut sink: SplitSink<WebSocketStream<S>, Message>,
    mut rx: mpsc::Receiver<Outbound>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    while let Some(item) = rx.recv().await {
        match item {
            Outbound::Text(text) => {
                let len = text.len();
                if let Err(e) = sink.send(Message::Text(text)).await {
                    debug!(conn = %id, error = %e, "write failed, stopping writer");
                    break;
                }
                trace!(conn = %id, len, "sent frame");
            }
            Outbound::Close => {
                let _ = sink.send(Message::Close(None)).await;
                debug!(conn = %id, "sent close frame");
                break;
            }
        }
    }
    let _ = sink.close().await;
}

/// Receiving side of a connection.
pub struct MessageReceiver<S> {
    id: ConnectionId,
    stream: SplitStream<WebSocketStream<S>>,
}

impl<S> MessageReceiver<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Receive the next text frame.
    ///
    /// Returns `None` once the peer closed the connection. Binary and
    /// control frames are skipped, as are text frames over the size limit.
    pub async fn recv_text(&mut self) -> Result<Option<String>, ProtocolError> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    if text.len() > MAX_MESSAGE_SIZE {
                        warn!(
                            conn = %self.id,
                            size = text.len(),
                            max = MAX_MESSAGE_SIZE,
                            "dropping oversized frame"
                        );
                        continue;
                    }
                    trace!(conn = %self.id, len = text.len(), "received frame");
                    return Ok(Some(text));
                }
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(ProtocolError::Connection(e.to_string())),
            }
        }
    }

    /// Receive and decode the next text frame.
    ///
    /// A frame that does not decode as `T` yields
    /// [`ProtocolError::Deserialization`]; the connection stays usable.
    pub async fn recv<T: DeserializeOwned>(&mut self) -> Result<Option<T>, ProtocolError> {
        match self.recv_text().await? {
            Some(text) => wire::decode(&text).map(Some),
            None => Ok(None),
        }
    }
}
