//! # pose-relay
//!
//! Real-time relay that pairs motion-capture devices with display devices
//! through short room codes and forwards pose frames between them over
//! WebSocket.
//!
//! ## Features
//!
//! - **Rooms**: join by code or let the server mint one; pairing is
//!   announced once a capture device and a display device share a room
//! - **Fan-out**: each frame is serialized once and pushed to every other
//!   member through a bounded per-connection queue
//! - **Rate limiting**: fixed-window admission for pose frames per session
//! - **Liveness**: ping/pong heartbeat with eviction of silent peers
//! - **Side channel**: health, readiness, metrics and room listings over HTTP
//! - **Peer client**: reconnecting [`client::RelayPeer`] built on tokio-tungstenite
//!
//! ## Example
//!
//! ```rust,no_run
//! use pose_relay::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = Config::load()?;
//!     init_tracing(&config)?;
//!
//!     Server::new(config).serve().await
//! }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod health;
pub mod ids;
pub mod metrics;
pub mod observability;
pub mod relay;
pub mod server;
pub mod state;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::client::{PeerConfig, PeerEvent, ReconnectPolicy, RelayPeer};
    pub use crate::config::{Config, MiddlewareConfig, RelayConfig, ServiceConfig};
    pub use crate::error::{Error, RelayError, Result};
    pub use crate::health::{health, readiness};
    pub use crate::ids::{RoomCode, SessionId};
    pub use crate::metrics::{Metrics, MetricsSnapshot};
    pub use crate::observability::init_tracing;
    pub use crate::relay::{
        ClientMessage, ConnectParams, DeviceClass, Relay, RoomSummary, ServerMessage,
    };
    pub use crate::server::Server;
    pub use crate::state::AppState;
}

pub use config::Config;
pub use error::{Error, Result};
pub use relay::Relay;
pub use server::Server;
pub use state::AppState;
