//! Leader run loop: recorder → dispatcher → server.

use std::future::Future;
use std::time::Duration;

use lockstep_types::{Change, Role};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::bootstrap::bootstrap;
use crate::config::ClientConfig;
use crate::dispatcher::ChangeDispatcher;
use crate::error::ClientError;
use crate::ChangeRecorder;

/// How long to wait for queued frames when the leader stops.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Counters for one leader run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LeaderSummary {
    /// Changes produced by the recorder.
    pub recorded: usize,
    /// Changes the dispatcher put on the wire.
    pub sent: usize,
}

/// The leader side of a session.
pub struct Leader {
    config: ClientConfig,
    recorder: Box<dyn ChangeRecorder>,
    dispatcher: ChangeDispatcher,
}

impl Leader {
    pub fn new(config: ClientConfig, recorder: Box<dyn ChangeRecorder>) -> Self {
        let dispatcher = ChangeDispatcher::new(config.navigation_delay());
        Self {
            config,
            recorder,
            dispatcher,
        }
    }

    pub fn dispatcher(&self) -> &ChangeDispatcher {
        &self.dispatcher
    }

    /// Register as leader, wait for the session to start, then stream
    /// recorded changes until the recorder ends or `shutdown` resolves.
    ///
    /// Any loss of the session (party change, server close, socket error) is
    /// fatal and returned as [`ClientError::SignalingServerDisconnected`].
    pub async fn run(
        &mut self,
        shutdown: impl Future<Output = ()>,
    ) -> Result<LeaderSummary, ClientError> {
        tokio::pin!(shutdown);
        let mut link = tokio::select! {
            link = bootstrap(&self.config, Role::Leader) => link?,
            () = &mut shutdown => {
                info!("shutdown requested before registration completed");
                return Ok(LeaderSummary::default());
            }
        };
        self.dispatcher.attach(link.handle().clone());

        let (tx, mut rx) = mpsc::channel::<Change>(1024);
        self.recorder.start(tx).await?;
        info!("recording");

        let mut summary = LeaderSummary::default();
        let result = loop {
            tokio::select! {
                biased;
                () = &mut shutdown => {
                    info!("leader shutting down");
                    break Ok(());
                }
                state = link.changed() => {
                    if let Err(e) = state.check() {
                        break Err(e);
                    }
                }
                change = rx.recv() => {
                    let Some(change) = change else {
                        info!("recorder finished");
                        let delay = self.config.navigation_delay();
                        wait_for_navigations(&self.dispatcher, delay).await;
                        break Ok(());
                    };
                    summary.recorded += 1;
                    if self.dispatcher.send_change(change) {
                        summary.sent += 1;
                    }
                }
            }
        };

        self.dispatcher.detach();
        if let Err(e) = self.recorder.stop().await {
            warn!(error = %e, "failed to stop recorder");
        }
        link.shutdown(CLOSE_GRACE).await;
        debug!(recorded = summary.recorded, sent = summary.sent, "leader stopped");
        result.map(|()| summary)
    }
}

/// Give scheduled navigations a chance to fire before closing.
async fn wait_for_navigations(dispatcher: &ChangeDispatcher, delay: Duration) {
    if dispatcher.pending_navigations() == 0 {
        return;
    }
    let step = Duration::from_millis(10);
    let deadline = tokio::time::Instant::now() + delay + step;
    while dispatcher.pending_navigations() > 0 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(step).await;
    }
}
