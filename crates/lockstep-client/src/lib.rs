//! Leader and follower clients for lockstep.
//!
//! The leader records UI actions through a [`ChangeRecorder`] and feeds them
//! to a [`ChangeDispatcher`], which drops duplicate in-progress changes and
//! synthesizes deferred navigations. A follower hands every relayed change to
//! a [`ChangeApplier`]. Browser automation itself lives behind these traits.

use async_trait::async_trait;
use lockstep_types::Change;
use tokio::sync::mpsc;

pub mod bootstrap;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod follower;
pub mod leader;

#[cfg(feature = "mock")]
pub mod mock;

pub use bootstrap::{bootstrap, Link, LinkState};
pub use config::ClientConfig;
pub use dispatcher::{same_change, ChangeDispatcher};
pub use error::{ApplyError, ClientError, RecorderError};

/// Produces the leader's recorded changes.
///
/// A recorder can be started again after [`ChangeRecorder::stop`], once per
/// session.
#[async_trait]
pub trait ChangeRecorder: Send + 'static {
    /// Start recording, sending each change to `tx`.
    async fn start(&mut self, tx: mpsc::Sender<Change>) -> Result<(), RecorderError>;

    /// Stop recording and release the backend.
    async fn stop(&mut self) -> Result<(), RecorderError>;
}

/// Re-enacts a relayed change on the follower.
#[async_trait]
pub trait ChangeApplier: Send + 'static {
    async fn apply(&mut self, change: &Change) -> Result<(), ApplyError>;
}
