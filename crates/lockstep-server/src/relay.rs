//! Change relay: leader changes fanned out to followers.

use std::collections::BTreeSet;

use lockstep_protocol::{wire, ConnectionId};
use lockstep_types::{PartyId, RawChange, RelayMessage};
use tracing::{debug, warn};

use crate::registry::PartyRegistry;

/// Result of relaying one change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    /// Forwarded to the followers. `dropped` counts followers whose queue
    /// refused the frame.
    Delivered {
        leader: PartyId,
        recipients: usize,
        dropped: usize,
    },
    /// The action's name is on the block-list.
    Blocked,
    /// The sending connection does not hold the leader role.
    NotLeader,
}

/// Forwards leader changes verbatim, minus blocked action names.
///
/// Payloads are not validated or reshaped: the only thing read from a change
/// is its action name. The relay only reads the registry; it never changes
/// who is registered.
#[derive(Debug, Clone, Default)]
pub struct ChangeRelay {
    blocked: BTreeSet<String>,
}

impl ChangeRelay {
    pub fn new(blocked: impl IntoIterator<Item = String>) -> Self {
        Self {
            blocked: blocked.into_iter().collect(),
        }
    }

    pub fn is_blocked(&self, change: &RawChange) -> bool {
        change
            .action_name()
            .is_some_and(|name| self.blocked.contains(name))
    }

    /// Send `change` to every follower, in registration order.
    ///
    /// Each follower gets at most one copy; failures are logged and counted,
    /// never retried.
    pub fn fan_out(
        &self,
        registry: &PartyRegistry,
        from: ConnectionId,
        change: &RawChange,
    ) -> RelayOutcome {
        let Some(leader) = registry.leader().filter(|p| p.connection() == from) else {
            debug!(conn = %from, "ignoring change from non-leader connection");
            return RelayOutcome::NotLeader;
        };

        let action = change.action_name().unwrap_or_default();
        if self.is_blocked(change) {
            debug!(action, "dropping blocked action");
            return RelayOutcome::Blocked;
        }

        let text = match wire::encode(&RelayMessage::LeaderChange(change)) {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "failed to encode leader change");
                return RelayOutcome::Delivered {
                    leader: leader.id,
                    recipients: 0,
                    dropped: registry.followers().len(),
                };
            }
        };

        let mut recipients = 0;
        let mut dropped = 0;
        for follower in registry.followers() {
            match follower.handle.send_text(text.clone()) {
                Ok(()) => recipients += 1,
                Err(e) => {
                    dropped += 1;
                    warn!(party = %follower.id, error = %e, "failed to relay change");
                }
            }
        }
        debug!(action, recipients, dropped, "relayed leader change");
        RelayOutcome::Delivered {
            leader: leader.id,
            recipients,
            dropped,
        }
    }
}
