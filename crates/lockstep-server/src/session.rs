//! Session state machine: quorum, compromise, restart, shutdown.
//!
//! A [`Session`] owns the party registry and is the only thing that mutates
//! it. All entry points are synchronous and expected to be driven from a
//! single task, one connection event at a time.

use lockstep_protocol::{ConnectionId, PeerHandle};
use lockstep_types::{ManagementCode, PartyId, RawChange, Role, RoleConflict, ServerMessage};
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::events::{CompromiseCause, EventBus, SessionEventKind};
use crate::registry::{Party, PartyRegistry};
use crate::relay::{ChangeRelay, RelayOutcome};
use crate::state::SessionState;

/// One mirroring session between a leader and its followers.
#[derive(Debug)]
pub struct Session {
    config: SessionConfig,
    registry: PartyRegistry,
    relay: ChangeRelay,
    state: SessionState,
    bus: EventBus,
}

impl Session {
    pub fn new(config: SessionConfig, bus: EventBus) -> Self {
        let relay = ChangeRelay::new(config.blocked_actions.iter().cloned());
        Self {
            config,
            registry: PartyRegistry::new(),
            relay,
            state: SessionState::WaitingForParties,
            bus,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn registry(&self) -> &PartyRegistry {
        &self.registry
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Register `handle` under `role`.
    pub fn register(&mut self, handle: PeerHandle, role: Role) -> Result<PartyId, RoleConflict> {
        match role {
            Role::Leader => self.register_leader(handle),
            Role::Follower => self.register_follower(handle),
        }
    }

    /// Make `handle` the leader.
    ///
    /// On conflict the connection is told why; a second leader is also
    /// disconnected. Refused registrations leave the session untouched.
    pub fn register_leader(&mut self, handle: PeerHandle) -> Result<PartyId, RoleConflict> {
        if let Err(conflict) = self.registry.check_leader(handle.id()) {
            self.refuse(&handle, conflict);
            return Err(conflict);
        }
        if self.state.rejects_late_joiners() {
            self.compromise(CompromiseCause::LateJoiner);
        }

        let conn = handle.id();
        let id = self.registry.register_leader(handle)?;
        info!(conn = %conn, party = %id, "leader connected");
        self.bus.emit(SessionEventKind::LeaderConnected { party: id });
        self.evaluate();
        Ok(id)
    }

    /// Add `handle` to the followers.
    ///
    /// A follower arriving once the session has started compromises it first,
    /// so existing parties always hear about the change before the newcomer
    /// is added. Newcomers get no replay of earlier changes.
    pub fn register_follower(&mut self, handle: PeerHandle) -> Result<PartyId, RoleConflict> {
        if let Err(conflict) = self.registry.check_follower(handle.id()) {
            self.refuse(&handle, conflict);
            return Err(conflict);
        }
        if self.state.rejects_late_joiners() {
            self.compromise(CompromiseCause::LateJoiner);
        }

        let conn = handle.id();
        let id = self.registry.register_follower(handle)?;
        info!(
            conn = %conn,
            party = %id,
            followers = self.registry.followers().len(),
            expected = self.config.expected_followers,
            "follower connected"
        );
        self.bus.emit(SessionEventKind::FollowerConnected { party: id });
        self.evaluate();
        Ok(id)
    }

    /// Deregister whichever party owns `conn`, after its connection closed.
    ///
    /// Connections that never registered (or were already cleared by a
    /// restart) are ignored.
    pub fn disconnect(&mut self, conn: ConnectionId) -> Option<Party> {
        let Some(party) = self.registry.remove(conn) else {
            debug!(conn = %conn, "unregistered connection closed");
            return None;
        };

        match party.role {
            Role::Leader => {
                info!(conn = %conn, party = %party.id, "leader disconnected");
                self.bus.emit(SessionEventKind::LeaderDisconnected { party: party.id });
            }
            Role::Follower => {
                info!(conn = %conn, party = %party.id, "follower disconnected");
                self.bus.emit(SessionEventKind::FollowerDisconnected { party: party.id });
            }
        }

        if self.state.is_started() {
            self.compromise(CompromiseCause::PartyLeft(party.role));
        }
        self.evaluate();
        Some(party)
    }

    /// Relay a change received on `conn`, emitting `LeaderAction` when it
    /// came from the leader and was not blocked.
    pub fn handle_change(&mut self, conn: ConnectionId, change: RawChange) -> RelayOutcome {
        let outcome = self.relay.fan_out(&self.registry, conn, &change);
        if let RelayOutcome::Delivered { leader, .. } = outcome {
            self.bus.emit(SessionEventKind::LeaderAction { leader, change });
        }
        outcome
    }

    /// Tell every party the server is closing, then drop them all.
    pub fn shutdown(&mut self) {
        info!(parties = self.registry.len(), "closing session");
        self.broadcast(ManagementCode::Close);
        for party in self.registry.clear() {
            party.handle.close();
        }
        self.state = SessionState::WaitingForParties;
    }

    fn refuse(&self, handle: &PeerHandle, conflict: RoleConflict) {
        warn!(conn = %handle.id(), reason = %conflict, "registration refused");
        if let Err(e) = handle.send(&ServerMessage::error(conflict)) {
            debug!(conn = %handle.id(), error = %e, "failed to report registration error");
        }
        if conflict.closes_connection() {
            handle.close();
        }
    }

    /// Re-check quorum after a registry mutation.
    fn evaluate(&mut self) {
        let quorum = self.registry.has_quorum(self.config.expected_followers);
        match (self.state, quorum) {
            (SessionState::WaitingForParties, true) => self.start(),
            (SessionState::Active | SessionState::Compromised, false) => {
                info!(previous = %self.state, "quorum lost, waiting for parties");
                self.state = SessionState::WaitingForParties;
            }
            _ => {}
        }
    }

    fn start(&mut self) {
        let Some(leader) = self.registry.leader() else {
            return;
        };
        let leader_id = leader.id;
        let followers = self.registry.follower_ids();
        self.state = SessionState::Active;
        info!(leader = %leader_id, followers = followers.len(), "session started");
        self.bus.emit(SessionEventKind::SessionStarted {
            leader: leader_id,
            followers,
        });
        if let Err(e) = leader
            .handle
            .send(&ServerMessage::management(ManagementCode::ConnectionSuccess))
        {
            warn!(party = %leader_id, error = %e, "failed to notify leader of session start");
        }
    }

    fn compromise(&mut self, cause: CompromiseCause) {
        let restarting = self.config.strict;
        warn!(?cause, restarting, "session compromised");
        self.state = SessionState::Compromised;
        self.broadcast(ManagementCode::PartiesChanged);
        self.bus.emit(SessionEventKind::SessionCompromised {
            leader: self.registry.leader().map(|p| p.id),
            followers: self.registry.follower_ids(),
            cause,
            restarting,
        });
        if restarting {
            self.restart();
        }
    }

    fn restart(&mut self) {
        let removed = self.registry.clear();
        info!(closed = removed.len(), "restarting session");
        for party in removed {
            party.handle.close();
        }
        self.state = SessionState::WaitingForParties;
    }

    fn broadcast(&self, code: ManagementCode) {
        let msg = ServerMessage::management(code);
        for party in self.registry.parties() {
            if let Err(e) = party.handle.send(&msg) {
                debug!(party = %party.id, %code, error = %e, "broadcast failed");
            }
        }
    }
}
