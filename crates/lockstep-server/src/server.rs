//! Server orchestration: accept loop, per-connection readers, session driver.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use lockstep_protocol::{
    ConnectionId, MessageReceiver, PeerHandle, ProtocolError, ServerConnection, WsTransport,
};
use lockstep_types::{InboundMessage, PartyId};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::ServerError;
use crate::events::EventBus;
use crate::session::Session;
use crate::state::SessionState;

/// How long shutdown waits for writers to flush their close frames.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// Events processed by the server's main loop.
pub enum ServerEvent {
    /// A WebSocket handshake completed.
    Incoming(ServerConnection),
    /// A decoded frame from a connection.
    Frame {
        conn: ConnectionId,
        msg: InboundMessage,
    },
    /// A connection's reader finished.
    Closed(ConnectionId),
    /// Shutdown signal.
    Shutdown,
}

/// Snapshot of the server, published after every event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerStatus {
    pub state: SessionState,
    pub leader: Option<PartyId>,
    pub follower_count: usize,
    /// Open connections, registered or not.
    pub connections: usize,
}

/// The lockstep signaling server.
pub struct Server {
    transport: WsTransport,
    session: Session,
    connections: HashMap<ConnectionId, PeerHandle>,
    next_connection: u64,
    event_tx: mpsc::Sender<ServerEvent>,
    event_rx: mpsc::Receiver<ServerEvent>,
    status_tx: watch::Sender<ServerStatus>,
}

impl Server {
    /// Create a server over a bound transport. Lifecycle events go to a
    /// fresh [`EventBus`]; subscribe through [`Server::bus`] before `run`.
    pub fn new(config: Config, transport: WsTransport) -> Self {
        Self::with_bus(config, transport, EventBus::new())
    }

    pub fn with_bus(config: Config, transport: WsTransport, bus: EventBus) -> Self {
        let (event_tx, event_rx) = mpsc::channel(1024);
        let (status_tx, _) = watch::channel(ServerStatus::default());
        Self {
            transport,
            session: Session::new(config.session, bus),
            connections: HashMap::new(),
            next_connection: 0,
            event_tx,
            event_rx,
            status_tx,
        }
    }

    /// Get a clone of the event sender for feeding events into the server.
    pub fn event_sender(&self) -> mpsc::Sender<ServerEvent> {
        self.event_tx.clone()
    }

    pub fn status_receiver(&self) -> watch::Receiver<ServerStatus> {
        self.status_tx.subscribe()
    }

    pub fn bus(&self) -> &EventBus {
        self.session.bus()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.transport.local_addr()
    }

    /// Run the server event loop until [`ServerEvent::Shutdown`].
    pub async fn run(&mut self) -> Result<(), ServerError> {
        info!(
            addr = %self.transport.local_addr(),
            expected_followers = self.session.config().expected_followers,
            strict = self.session.config().strict,
            "server running"
        );

        loop {
            tokio::select! {
                result = self.transport.accept_tcp() => {
                    match result {
                        Ok((stream, remote)) => self.spawn_handshake(stream, remote),
                        Err(e) => debug!(error = %e, "accept error"),
                    }
                }
                event = self.event_rx.recv() => {
                    match event {
                        Some(ServerEvent::Incoming(conn)) => self.handle_incoming(conn),
                        Some(ServerEvent::Frame { conn, msg }) => self.handle_frame(conn, msg),
                        Some(ServerEvent::Closed(conn)) => self.handle_closed(conn),
                        Some(ServerEvent::Shutdown) | None => {
                            info!("shutting down");
                            break;
                        }
                    }
                    self.publish_status();
                }
            }
        }

        self.shutdown().await;
        Ok(())
    }

    fn spawn_handshake(&self, stream: TcpStream, remote: SocketAddr) {
        let event_tx = self.event_tx.clone();
        tokio::spawn(async move {
            match WsTransport::upgrade(stream, remote).await {
                Ok(conn) => {
                    let _ = event_tx.send(ServerEvent::Incoming(conn)).await;
                }
                Err(e) => debug!(remote = %remote, error = %e, "handshake failed"),
            }
        });
    }

    fn handle_incoming(&mut self, conn: ServerConnection) {
        self.next_connection += 1;
        let id = ConnectionId(self.next_connection);
        let remote = conn.remote_address();
        let (handle, rx) = conn.split(id);
        self.connections.insert(id, handle);
        tokio::spawn(read_loop(rx, self.event_tx.clone()));
        info!(conn = %id, remote = ?remote, "connection opened");
    }

    fn handle_frame(&mut self, conn: ConnectionId, msg: InboundMessage) {
        match msg {
            InboundMessage::Register(registration) => {
                let Some(handle) = self.connections.get(&conn).cloned() else {
                    debug!(conn = %conn, "register from closed connection");
                    return;
                };
                if let Err(conflict) = self.session.register(handle, registration.role) {
                    debug!(
                        conn = %conn,
                        role = %registration.role,
                        %conflict,
                        "registration failed"
                    );
                }
            }
            InboundMessage::Change(change) => {
                let outcome = self.session.handle_change(conn, change);
                debug!(conn = %conn, ?outcome, "change handled");
            }
        }
    }

    fn handle_closed(&mut self, conn: ConnectionId) {
        self.connections.remove(&conn);
        self.session.disconnect(conn);
        debug!(conn = %conn, open = self.connections.len(), "connection closed");
    }

    fn publish_status(&self) {
        let registry = self.session.registry();
        self.status_tx.send_replace(ServerStatus {
            state: self.session.state(),
            leader: registry.leader().map(|p| p.id),
            follower_count: registry.followers().len(),
            connections: self.connections.len(),
        });
    }

    async fn shutdown(&mut self) {
        self.session.shutdown();
        for handle in self.connections.values() {
            handle.close();
        }

        let handles: Vec<PeerHandle> = self.connections.drain().map(|(_, h)| h).collect();
        let flushed = tokio::time::timeout(SHUTDOWN_GRACE, async {
            for handle in &handles {
                handle.closed().await;
            }
        })
        .await;
        if flushed.is_err() {
            warn!("timed out waiting for connections to close");
        }

        self.publish_status();
        info!("server shut down complete");
    }
}

/// Forward decoded frames from one connection into the server loop.
///
/// Frames that do not decode are dropped; the connection stays open.
async fn read_loop(mut rx: MessageReceiver<TcpStream>, event_tx: mpsc::Sender<ServerEvent>) {
    let conn = rx.id();
    loop {
        match rx.recv::<InboundMessage>().await {
            Ok(Some(msg)) => {
                if event_tx.send(ServerEvent::Frame { conn, msg }).await.is_err() {
                    return;
                }
            }
            Ok(None) => break,
            Err(ProtocolError::Deserialization(e)) => {
                debug!(conn = %conn, error = %e, "ignoring undecodable frame");
            }
            Err(e) => {
                debug!(conn = %conn, error = %e, "read failed");
                break;
            }
        }
    }
    let _ = event_tx.send(ServerEvent::Closed(conn)).await;
}
