//! Connection identity and the outbound side of a socket

use std::fmt;

use axum::extract::ws::Message;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::ids::SessionId;
use crate::relay::DeviceClass;

/// Unique identifier for one accepted socket.
///
/// Session ids can be reused after a disconnect; connection ids never are, so
/// registry and directory entries carry one to reject cleanup from a stale
/// connection task.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Create a new unique connection ID
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConnectionId({})", self.0)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Result of handing a frame to a connection's outbound queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Queued for the writer task
    Sent,
    /// Queue full; the frame was dropped for this recipient only
    Backlogged,
    /// Connection is closing or gone
    Closed,
}

/// Write side of one connection.
///
/// Every send in the relay goes through [`ConnectionHandle::deliver`], which
/// never waits on the peer: a full queue drops the frame for that recipient.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    sender: mpsc::Sender<Message>,
    shutdown: CancellationToken,
}

impl ConnectionHandle {
    /// Create a handle plus the receiver its writer task drains
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Message>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let handle = Self {
            id: ConnectionId::new(),
            sender,
            shutdown: CancellationToken::new(),
        };
        (handle, receiver)
    }

    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Whether frames handed to this connection can still reach the peer
    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.shutdown.is_cancelled() && !self.sender.is_closed()
    }

    /// Queue a frame without waiting
    pub fn deliver(&self, message: Message) -> Delivery {
        if self.shutdown.is_cancelled() {
            return Delivery::Closed;
        }
        match self.sender.try_send(message) {
            Ok(()) => Delivery::Sent,
            Err(TrySendError::Full(_)) => Delivery::Backlogged,
            Err(TrySendError::Closed(_)) => Delivery::Closed,
        }
    }

    /// Ask the connection's tasks to stop; idempotent
    pub fn terminate(&self) {
        self.shutdown.cancel();
    }

    /// Resolves once [`terminate`](Self::terminate) has been called
    pub async fn terminated(&self) {
        self.shutdown.cancelled().await;
    }
}

/// A registered session together with its connection
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub id: SessionId,
    pub device: DeviceClass,
    pub connection: ConnectionHandle,
}
