//! Protocol message types.
//!
//! Messages are JSON text frames of the form `{"type": ..., "data": ...}`
//! exchanged over a WebSocket between the server and its parties.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::change::{Change, RawChange};
use crate::party::Role;

/// Messages sent by a client (leader or follower) to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum ClientMessage {
    /// Ask to join the session with the given role.
    Register(Registration),
    /// A recorded action; only honoured from the current leader.
    Change(Change),
}

/// A client frame as the server reads it.
///
/// Same wire shape as [`ClientMessage`], but the change payload stays raw.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum InboundMessage {
    Register(Registration),
    Change(RawChange),
}

/// The `leaderChange` frame the server fans out. Decodes on the follower
/// side as [`ServerMessage::LeaderChange`].
#[derive(Debug, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum RelayMessage<'a> {
    LeaderChange(&'a RawChange),
}

/// Payload of a `register` message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    #[serde(rename = "type")]
    pub role: Role,
}

/// Messages sent by the server to its parties.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum ServerMessage {
    /// Session lifecycle notification.
    Management(ManagementNotice),
    /// A registration was refused.
    Error(ErrorNotice),
    /// A leader change fanned out to followers.
    LeaderChange(Change),
}

impl ServerMessage {
    pub fn management(code: ManagementCode) -> Self {
        Self::Management(ManagementNotice { code })
    }

    pub fn error(code: RoleConflict) -> Self {
        Self::Error(ErrorNotice { code })
    }
}

/// Payload of a `management` message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagementNotice {
    pub code: ManagementCode,
}

/// Session lifecycle codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ManagementCode {
    /// Quorum reached; sent to the leader only.
    ConnectionSuccess,
    /// The set of parties changed after the session started.
    PartiesChanged,
    /// The server is shutting down.
    Close,
    /// A code this build does not know about.
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for ManagementCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConnectionSuccess => write!(f, "CONNECTION_SUCCESS"),
            Self::PartiesChanged => write!(f, "PARTIES_CHANGED"),
            Self::Close => write!(f, "CLOSE"),
            Self::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// Payload of an `error` message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorNotice {
    pub code: RoleConflict,
}

/// Reasons a registration is refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoleConflict {
    #[error("a leader is already connected")]
    LeaderAlreadyConnected,

    #[error("the leader cannot register as a follower")]
    LeaderCannotBeFollower,

    #[error("this follower is already connected")]
    FollowerAlreadyConnected,

    #[error("a follower cannot register as the leader")]
    FollowerCannotBeLeader,
}

impl RoleConflict {
    /// Whether the offending connection is closed after the error is sent.
    pub fn closes_connection(self) -> bool {
        self == Self::LeaderAlreadyConnected
    }
}
