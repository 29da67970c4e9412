//! Shared types for lockstep.
//!
//! This crate contains all types shared across the lockstep workspace:
//! recorded changes and their actions, party identity and roles, and the
//! JSON wire messages exchanged between the server, the leader and the
//! followers.

pub mod change;
pub mod message;
pub mod party;

pub use change::{Action, Change, FrameRef, MouseButton, RawChange, Signal};
pub use message::{
    ClientMessage, ErrorNotice, InboundMessage, ManagementCode, ManagementNotice, Registration,
    RelayMessage, RoleConflict, ServerMessage,
};
pub use party::{PartyId, Role};
