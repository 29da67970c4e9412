//! Signaling server for lockstep mirroring sessions.
//!
//! Tracks which connection leads and which follow, decides when the session
//! starts or is compromised, relays the leader's changes to every follower,
//! and reports lifecycle events on an in-process bus.

pub mod config;
pub mod error;
pub mod events;
pub mod registry;
pub mod relay;
pub mod server;
pub mod session;
pub mod setup;
pub mod state;

pub use config::{Config, ServerConfig, SessionConfig};
pub use error::ServerError;
pub use events::{CompromiseCause, EventBus, SessionEvent, SessionEventKind, SubscriptionId};
pub use registry::{Party, PartyRegistry};
pub use relay::{ChangeRelay, RelayOutcome};
pub use server::{Server, ServerEvent, ServerStatus};
pub use session::Session;
pub use state::SessionState;
