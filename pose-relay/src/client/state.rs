//! Peer connection state machine
//!
//! ```text
//! Connecting -> Open -> Registered <-> InRoom -> Closing -> Closed
//!      ^                                                      |
//!      +--------------------- Retry --------------------------+
//!                                   Closed --GaveUp--> Failed
//! ```

use std::fmt;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Connecting,
    Open,
    Registered,
    InRoom,
    Closing,
    Closed,
    /// Reconnect attempts exhausted; terminal
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionEvent {
    /// Transport handshake completed
    Opened,
    /// Server assigned a session id
    Registered,
    /// Server confirmed a room join or creation
    Joined,
    /// Left the current room
    Left,
    /// Local side asked to close
    CloseRequested,
    /// Socket closed cleanly
    Closed,
    /// Socket failed or the handshake was refused
    TransportFailed,
    /// Start another connection attempt
    Retry,
    /// Give up reconnecting
    GaveUp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid transition: {event:?} in state {from}")]
pub struct InvalidTransition {
    pub from: ConnectionState,
    pub event: ConnectionEvent,
}

impl ConnectionState {
    /// Apply an event, returning the next state
    pub fn transition(self, event: ConnectionEvent) -> Result<Self, InvalidTransition> {
        use ConnectionEvent as E;
        use ConnectionState as S;

        let next = match (self, event) {
            (S::Connecting, E::Opened) => S::Open,
            (S::Connecting, E::TransportFailed | E::Closed | E::CloseRequested) => S::Closed,

            (S::Open, E::Registered) => S::Registered,
            (S::Registered | S::InRoom, E::Joined) => S::InRoom,
            (S::Registered | S::InRoom, E::Left) => S::Registered,

            (S::Open | S::Registered | S::InRoom, E::CloseRequested) => S::Closing,
            (S::Open | S::Registered | S::InRoom | S::Closing, E::Closed | E::TransportFailed) => {
                S::Closed
            }

            (S::Closed, E::Retry) => S::Connecting,
            (S::Closed, E::GaveUp) => S::Failed,

            (from, event) => return Err(InvalidTransition { from, event }),
        };
        Ok(next)
    }

    /// Whether the socket is usable for sending
    #[must_use]
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Open | Self::Registered | Self::InRoom)
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        self == Self::Failed
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Registered => "registered",
            Self::InRoom => "in_room",
            Self::Closing => "closing",
            Self::Closed => "closed",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}
