//! Client errors.

use lockstep_protocol::ProtocolError;
use lockstep_types::RoleConflict;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    /// The link to the server failed or the session ended underneath us.
    #[error("signaling server disconnected: {0}")]
    SignalingServerDisconnected(String),

    #[error("registration rejected: {0}")]
    Rejected(RoleConflict),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("recorder error: {0}")]
    Recorder(#[from] RecorderError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Failure of a [`crate::ChangeRecorder`] backend.
#[derive(Debug, Error)]
pub enum RecorderError {
    #[error("recorder already running")]
    AlreadyStarted,

    #[error("failed to start recording: {0}")]
    Start(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Failure of a [`crate::ChangeApplier`] backend to re-enact one change.
#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("no element matches selector {0}")]
    ElementNotFound(String),

    #[error("unsupported action: {0}")]
    Unsupported(&'static str),

    #[error("apply failed: {0}")]
    Failed(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
