//! Peer-side connection management
//!
//! A capture or display device talks to the relay through a [`RelayPeer`],
//! which keeps one WebSocket open, tracks its [`ConnectionState`], and
//! reconnects with [`Backoff`] when the link drops.

pub mod backoff;
pub mod peer;
pub mod state;

pub use backoff::{Backoff, ReconnectPolicy};
pub use peer::{PeerConfig, PeerError, PeerEvent, RelayPeer};
pub use state::{ConnectionEvent, ConnectionState, InvalidTransition};
