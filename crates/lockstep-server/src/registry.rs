//! Party registry: the leader slot and the ordered follower set.
//!
//! The registry enforces role exclusivity only. Deciding what a registration
//! or removal means for the session (quorum, compromise, restarts) is the
//! job of [`crate::session::Session`].

use lockstep_protocol::{ConnectionId, PeerHandle};
use lockstep_types::{PartyId, Role, RoleConflict};
use tracing::debug;

/// A registered connection.
#[derive(Debug, Clone)]
pub struct Party {
    pub id: PartyId,
    pub role: Role,
    pub handle: PeerHandle,
}

impl Party {
    pub fn connection(&self) -> ConnectionId {
        self.handle.id()
    }
}

/// At most one leader and any number of followers, keyed by connection.
///
/// Invariants: the leader's connection never appears among the followers,
/// and no connection appears twice among the followers.
#[derive(Debug, Default)]
pub struct PartyRegistry {
    leader: Option<Party>,
    /// Insertion ordered; fan-out follows this order.
    followers: Vec<Party>,
}

impl PartyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check whether `conn` could become the leader.
    pub fn check_leader(&self, conn: ConnectionId) -> Result<(), RoleConflict> {
        if self.leader.is_some() {
            return Err(RoleConflict::LeaderAlreadyConnected);
        }
        if self.is_follower(conn) {
            return Err(RoleConflict::FollowerCannotBeLeader);
        }
        Ok(())
    }

    /// Check whether `conn` could join as a follower.
    pub fn check_follower(&self, conn: ConnectionId) -> Result<(), RoleConflict> {
        if self.is_leader(conn) {
            return Err(RoleConflict::LeaderCannotBeFollower);
        }
        if self.is_follower(conn) {
            return Err(RoleConflict::FollowerAlreadyConnected);
        }
        Ok(())
    }

    /// Make `handle` the leader, minting a new party ID.
    pub fn register_leader(&mut self, handle: PeerHandle) -> Result<PartyId, RoleConflict> {
        self.check_leader(handle.id())?;
        let id = PartyId::new();
        debug!(conn = %handle.id(), party = %id, "leader registered");
        self.leader = Some(Party {
            id,
            role: Role::Leader,
            handle,
        });
        Ok(id)
    }

    /// Append `handle` to the followers, minting a new party ID.
    pub fn register_follower(&mut self, handle: PeerHandle) -> Result<PartyId, RoleConflict> {
        self.check_follower(handle.id())?;
        let id = PartyId::new();
        debug!(conn = %handle.id(), party = %id, "follower registered");
        self.followers.push(Party {
            id,
            role: Role::Follower,
            handle,
        });
        Ok(id)
    }

    /// Remove whichever party owns `conn`.
    pub fn remove(&mut self, conn: ConnectionId) -> Option<Party> {
        if self.is_leader(conn) {
            return self.leader.take();
        }
        let index = self.followers.iter().position(|p| p.connection() == conn)?;
        Some(self.followers.remove(index))
    }

    /// Remove every party, leader first.
    pub fn clear(&mut self) -> Vec<Party> {
        let mut removed: Vec<Party> = self.leader.take().into_iter().collect();
        removed.append(&mut self.followers);
        removed
    }

    pub fn leader(&self) -> Option<&Party> {
        self.leader.as_ref()
    }

    pub fn followers(&self) -> &[Party] {
        &self.followers
    }

    pub fn follower_ids(&self) -> Vec<PartyId> {
        self.followers.iter().map(|p| p.id).collect()
    }

    /// Leader first, then followers in insertion order.
    pub fn parties(&self) -> impl Iterator<Item = &Party> {
        self.leader.iter().chain(self.followers.iter())
    }

    pub fn role_of(&self, conn: ConnectionId) -> Option<Role> {
        if self.is_leader(conn) {
            Some(Role::Leader)
        } else if self.is_follower(conn) {
            Some(Role::Follower)
        } else {
            None
        }
    }

    pub fn is_leader(&self, conn: ConnectionId) -> bool {
        self.leader.as_ref().is_some_and(|p| p.connection() == conn)
    }

    pub fn is_follower(&self, conn: ConnectionId) -> bool {
        self.followers.iter().any(|p| p.connection() == conn)
    }

    /// Leader present and at least `expected_followers` followers.
    pub fn has_quorum(&self, expected_followers: usize) -> bool {
        self.leader.is_some() && self.followers.len() >= expected_followers
    }

    pub fn len(&self) -> usize {
        usize::from(self.leader.is_some()) + self.followers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
