//! WebSocket transport and wire protocol for lockstep.
//!
//! This crate handles WebSocket listening and dialing (via
//! tokio-tungstenite), JSON text-frame encoding and decoding (via
//! serde_json), and splitting a connection into a cloneable outbound
//! [`PeerHandle`] and an inbound [`MessageReceiver`].

pub mod connection;
pub mod error;
pub mod transport;
pub mod wire;

pub use connection::{ConnectionId, MessageReceiver, Outbound, PeerConnection, PeerHandle};
pub use error::ProtocolError;
pub use transport::{connect, ClientConnection, ClientReceiver, ServerConnection, WsTransport};
