//! Server errors.

use lockstep_types::RoleConflict;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("registration refused: {0}")]
    RoleConflict(#[from] RoleConflict),

    #[error("protocol error: {0}")]
    Protocol(#[from] lockstep_protocol::ProtocolError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
