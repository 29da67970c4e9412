//! WebSocket transport: bind, accept, and connect.

use std::net::SocketAddr;

use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::MaybeTlsStream;
use tracing::{debug, info};

use crate::connection::{MessageReceiver, PeerConnection};
use crate::error::ProtocolError;

/// A connection accepted by the server.
pub type ServerConnection = PeerConnection<TcpStream>;

/// A connection dialed by a leader or follower.
pub type ClientConnection = PeerConnection<MaybeTlsStream<TcpStream>>;

/// Receiving side of a [`ClientConnection`].
pub type ClientReceiver = MessageReceiver<MaybeTlsStream<TcpStream>>;

/// Listening side of the WebSocket transport.
///
/// Accepting is split in two steps so the caller can run the WebSocket
/// handshake off its main loop: [`WsTransport::accept_tcp`] then
/// [`WsTransport::upgrade`].
pub struct WsTransport {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl WsTransport {
    /// Bind a TCP listener on `host:port`.
    pub async fn bind(host: &str, port: u16) -> Result<Self, ProtocolError> {
        let listener = TcpListener::bind((host, port))
            .await
            .map_err(|e| ProtocolError::Connection(format!("bind {host}:{port} failed: {e}")))?;
        let local_addr = listener.local_addr()?;
        info!(addr = %local_addr, "WebSocket transport bound");
        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Accept the next TCP connection.
    pub async fn accept_tcp(&self) -> Result<(TcpStream, SocketAddr), ProtocolError> {
        let (stream, remote) = self.listener.accept().await?;
        debug!(remote = %remote, "accepted tcp connection");
        Ok((stream, remote))
    }

    /// Run the server side of the WebSocket handshake.
    pub async fn upgrade(
        stream: TcpStream,
        remote: SocketAddr,
    ) -> Result<ServerConnection, ProtocolError> {
        let ws = tokio_tungstenite::accept_async(stream)
            .await
            .map_err(|e| ProtocolError::Handshake(e.to_string()))?;
        debug!(remote = %remote, "websocket handshake complete");
        Ok(PeerConnection::new(ws, Some(remote)))
    }

    /// Get the local address this transport is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

/// Dial a lockstep server at a `ws://` or `wss://` URL.
pub async fn connect(url: &str) -> Result<ClientConnection, ProtocolError> {
    let (ws, _response) = tokio_tungstenite::connect_async(url)
        .await
        .map_err(|e| ProtocolError::Connection(format!("connect {url} failed: {e}")))?;
    let remote = match ws.get_ref() {
        MaybeTlsStream::Plain(tcp) => tcp.peer_addr().ok(),
        _ => None,
    };
    debug!(url = %url, "connected to server");
    Ok(PeerConnection::new(ws, remote))
}
