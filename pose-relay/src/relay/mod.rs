//! Session/room relay
//!
//! Peers connect over a WebSocket, get registered as sessions, and are paired
//! into rooms by a shared code. Frames sent by one member are fanned out to
//! the rest of its room.
//!
//! ## Layout
//!
//! - [`registry`]: live sessions by id
//! - [`rooms`]: room membership and pairing detection
//! - [`broadcast`]: serialize-once fan-out
//! - [`rate_limit`]: per-session stream admission
//! - [`liveness`]: heartbeat and eviction
//! - [`protocol`]: wire envelopes
//! - [`router`]: inbound dispatch
//! - [`handler`]: axum upgrade and per-connection task
//! - [`hub`]: [`Relay`], which owns all of the above

pub mod broadcast;
pub mod connection;
pub mod handler;
pub mod hub;
pub mod liveness;
pub mod protocol;
pub mod rate_limit;
pub mod registry;
pub mod rooms;
mod router;

pub use broadcast::Broadcaster;
pub use connection::{ConnectionHandle, ConnectionId, Delivery, SessionHandle};
pub use handler::ws_upgrade;
pub use hub::{ConnectParams, Relay};
pub use liveness::{LivenessMonitor, SweepReport};
pub use protocol::{ClientMessage, PoseFrame, ProtocolError, ServerMessage};
pub use rate_limit::{MessageClass, RateLimiter};
pub use registry::{DeviceClass, Session, SessionRegistry};
pub use rooms::{JoinOutcome, LeaveOutcome, PairingRule, RoomDirectory, RoomSummary};
