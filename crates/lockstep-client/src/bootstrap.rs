//! Connecting to the server and registering a role.

use std::time::Duration;

use lockstep_protocol::{ClientReceiver, ConnectionId, PeerHandle, ProtocolError};
use lockstep_types::{
    Change, ClientMessage, ManagementCode, Registration, Role, RoleConflict, ServerMessage,
};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::error::ClientError;

/// Relayed changes buffered between the reader and the follower loop.
const CHANGE_BUFFER: usize = 1024;

/// What the server has told this client so far.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkState {
    /// Registered, session not started (or not reported to this role).
    Registered,
    /// `CONNECTION_SUCCESS` received.
    Ready,
    /// The server refused the registration.
    Rejected(RoleConflict),
    /// The link or the session it belonged to is gone.
    Disconnected(String),
}

impl LinkState {
    fn is_terminal(&self) -> bool {
        matches!(self, Self::Rejected(_) | Self::Disconnected(_))
    }

    /// Map a terminal state to the error a client should fail with.
    pub fn check(&self) -> Result<(), ClientError> {
        match self {
            Self::Registered | Self::Ready => Ok(()),
            Self::Rejected(code) => Err(ClientError::Rejected(*code)),
            Self::Disconnected(reason) => {
                Err(ClientError::SignalingServerDisconnected(reason.clone()))
            }
        }
    }
}

/// A registered connection to the server.
///
/// A background reader tracks management and error frames in a
/// [`LinkState`] and queues relayed changes. Dropping the link stops the
/// reader and closes the connection.
pub struct Link {
    role: Role,
    handle: PeerHandle,
    pub(crate) state: watch::Receiver<LinkState>,
    pub(crate) changes: mpsc::Receiver<Change>,
    reader: JoinHandle<()>,
}

impl Link {
    pub fn role(&self) -> Role {
        self.role
    }

    /// Sending side of the connection.
    pub fn handle(&self) -> &PeerHandle {
        &self.handle
    }

    pub fn state(&self) -> LinkState {
        self.state.borrow().clone()
    }

    /// Fail if the link has been rejected or disconnected.
    pub fn check(&self) -> Result<(), ClientError> {
        self.state.borrow().check()
    }

    /// Wait for the next state change. Returns the new state.
    pub async fn changed(&mut self) -> LinkState {
        if self.state.changed().await.is_err() {
            let last = self.state.borrow().clone();
            if last.is_terminal() {
                return last;
            }
            return LinkState::Disconnected("reader stopped".to_string());
        }
        self.state.borrow_and_update().clone()
    }

    /// Next change relayed from the leader, `None` once the link is down.
    pub async fn next_change(&mut self) -> Option<Change> {
        self.changes.recv().await
    }

    /// Poll the link state until `CONNECTION_SUCCESS` or `timeout`.
    pub async fn wait_ready(&self, poll: Duration, timeout: Duration) -> Result<(), ClientError> {
        let deadline = Instant::now() + timeout;
        let mut ticker = tokio::time::interval(poll);
        loop {
            ticker.tick().await;
            let state = self.state();
            if state == LinkState::Ready {
                return Ok(());
            }
            state.check()?;
            if Instant::now() >= deadline {
                return Err(ClientError::SignalingServerDisconnected(format!(
                    "no CONNECTION_SUCCESS within {}ms",
                    timeout.as_millis()
                )));
            }
        }
    }

    /// Close the connection. The server will see this party leave.
    pub fn close(&self) {
        self.handle.close();
    }

    /// Close the connection and wait up to `grace` for queued frames to be
    /// written out.
    pub async fn shutdown(self, grace: Duration) {
        self.handle.close();
        if tokio::time::timeout(grace, self.handle.closed()).await.is_err() {
            debug!("connection did not close in time");
        }
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        self.handle.close();
        self.reader.abort();
    }
}

/// Connect to `config.url` and register as `role`.
///
/// A leader only returns once the session has started; a follower returns as
/// soon as its registration is sent, since the server reports session start
/// to the leader alone. Either way the whole bootstrap is bounded by the
/// configured connect timeout.
pub async fn bootstrap(config: &ClientConfig, role: Role) -> Result<Link, ClientError> {
    let timeout = config.connect_timeout();
    let started = Instant::now();

    let conn = tokio::time::timeout(timeout, lockstep_protocol::connect(&config.url))
        .await
        .map_err(|_| {
            ClientError::SignalingServerDisconnected(format!(
                "timed out connecting to {}",
                config.url
            ))
        })?
        .map_err(|e| ClientError::SignalingServerDisconnected(e.to_string()))?;
    info!(url = %config.url, remote = ?conn.remote_address(), %role, "connected to server");

    let (handle, rx) = conn.split(ConnectionId(0));
    let (state_tx, state_rx) = watch::channel(LinkState::Registered);
    let (change_tx, change_rx) = mpsc::channel(CHANGE_BUFFER);
    let reader = tokio::spawn(read_loop(rx, state_tx, change_tx));

    handle.send(&ClientMessage::Register(Registration { role }))?;
    let link = Link {
        role,
        handle,
        state: state_rx,
        changes: change_rx,
        reader,
    };

    if role == Role::Leader {
        let remaining = timeout.saturating_sub(started.elapsed());
        info!("waiting for followers");
        link.wait_ready(config.poll_interval(), remaining).await?;
        info!("session started");
    }
    Ok(link)
}

/// Move `tx` to `next` unless it already reached a terminal state.
fn settle(tx: &watch::Sender<LinkState>, next: LinkState) {
    tx.send_if_modified(|state| {
        if state.is_terminal() || *state == next {
            return false;
        }
        *state = next;
        true
    });
}

async fn read_loop(
    mut rx: ClientReceiver,
    state: watch::Sender<LinkState>,
    changes: mpsc::Sender<Change>,
) {
    loop {
        match rx.recv::<ServerMessage>().await {
            Ok(Some(ServerMessage::Management(notice))) => match notice.code {
                ManagementCode::ConnectionSuccess => settle(&state, LinkState::Ready),
                ManagementCode::PartiesChanged => {
                    warn!("session compromised by a party change");
                    settle(
                        &state,
                        LinkState::Disconnected("parties changed".to_string()),
                    );
                }
                ManagementCode::Close => {
                    info!("server closed the session");
                    settle(
                        &state,
                        LinkState::Disconnected("server closed the session".to_string()),
                    );
                }
                ManagementCode::Unknown => warn!("ignoring unknown management code"),
            },
            Ok(Some(ServerMessage::Error(notice))) => {
                warn!(code = %notice.code, "server reported an error");
                settle(&state, LinkState::Rejected(notice.code));
            }
            Ok(Some(ServerMessage::LeaderChange(change))) => {
                if changes.send(change).await.is_err() {
                    debug!("change receiver dropped");
                }
            }
            Ok(None) => {
                settle(
                    &state,
                    LinkState::Disconnected("connection closed".to_string()),
                );
                break;
            }
            // Includes relayed changes whose action kind this build does not model.
            Err(ProtocolError::Deserialization(e)) => {
                warn!(error = %e, "skipping frame this client cannot decode");
            }
            Err(e) => {
                settle(&state, LinkState::Disconnected(e.to_string()));
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_are_sticky() {
        let (tx, rx) = watch::channel(LinkState::Registered);
        settle(&tx, LinkState::Ready);
        assert_eq!(*rx.borrow(), LinkState::Ready);

        settle(&tx, LinkState::Rejected(RoleConflict::LeaderAlreadyConnected));
        settle(&tx, LinkState::Disconnected("closed".to_string()));
        assert_eq!(
            *rx.borrow(),
            LinkState::Rejected(RoleConflict::LeaderAlreadyConnected)
        );
    }

    #[test]
    fn check_maps_terminal_states() {
        assert!(LinkState::Registered.check().is_ok());
        assert!(LinkState::Ready.check().is_ok());
        assert!(matches!(
            LinkState::Rejected(RoleConflict::FollowerAlreadyConnected).check(),
            Err(ClientError::Rejected(RoleConflict::FollowerAlreadyConnected))
        ));
        assert!(matches!(
            LinkState::Disconnected("gone".to_string()).check(),
            Err(ClientError::SignalingServerDisconnected(reason)) if reason == "gone"
        ));
    }

    #[tokio::test]
    async fn unreachable_server_fails_bootstrap() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let config = ClientConfig {
            url: format!("ws://{addr}"),
            connect_timeout_ms: 2_000,
            ..ClientConfig::default()
        };
        let result = bootstrap(&config, Role::Follower).await;
        assert!(matches!(
            result,
            Err(ClientError::SignalingServerDisconnected(_))
        ));
    }
}
