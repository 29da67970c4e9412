//! Follower run loop: server → applier.

use std::future::Future;
use std::time::Duration;

use lockstep_types::Role;
use tracing::{debug, info, warn};

use crate::bootstrap::bootstrap;
use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::ChangeApplier;

const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Counters for one follower run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FollowerSummary {
    pub applied: usize,
    /// Changes the applier could not re-enact. These are skipped.
    pub failed: usize,
}

/// The follower side of a session.
pub struct Follower {
    config: ClientConfig,
    applier: Box<dyn ChangeApplier>,
}

impl Follower {
    pub fn new(config: ClientConfig, applier: Box<dyn ChangeApplier>) -> Self {
        Self { config, applier }
    }

    /// Register as follower and apply relayed changes, in order, until
    /// `shutdown` resolves or the session is lost.
    pub async fn run(
        &mut self,
        shutdown: impl Future<Output = ()>,
    ) -> Result<FollowerSummary, ClientError> {
        tokio::pin!(shutdown);
        let mut link = tokio::select! {
            link = bootstrap(&self.config, Role::Follower) => link?,
            () = &mut shutdown => {
                info!("shutdown requested before registration completed");
                return Ok(FollowerSummary::default());
            }
        };
        info!("following");

        let mut summary = FollowerSummary::default();
        let result = loop {
            tokio::select! {
                biased;
                () = &mut shutdown => {
                    info!("follower shutting down");
                    break Ok(());
                }
                change = link.changes.recv() => {
                    let Some(change) = change else {
                        break link.check().and(Err(ClientError::SignalingServerDisconnected(
                            "connection closed".to_string(),
                        )));
                    };
                    match self.applier.apply(&change).await {
                        Ok(()) => {
                            summary.applied += 1;
                            debug!(action = change.action.name(), "applied change");
                        }
                        Err(e) => {
                            summary.failed += 1;
                            warn!(
                                action = change.action.name(),
                                error = %e,
                                "failed to apply change, skipping"
                            );
                        }
                    }
                }
                changed = link.state.changed() => {
                    if changed.is_err() {
                        break link.check().and(Err(ClientError::SignalingServerDisconnected(
                            "reader stopped".to_string(),
                        )));
                    }
                    let state = link.state.borrow_and_update().clone();
                    if let Err(e) = state.check() {
                        break Err(e);
                    }
                }
            }
        };

        link.shutdown(CLOSE_GRACE).await;
        debug!(applied = summary.applied, failed = summary.failed, "follower stopped");
        result.map(|()| summary)
    }
}
