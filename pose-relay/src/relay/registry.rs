//! Session registry
//!
//! Tracks every live connection by session id. Id assignment goes through
//! `DashMap::entry`, so two concurrent registrations can never be handed the
//! same id.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use dashmap::{mapref::entry::Entry, DashMap};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::SessionId;
use crate::relay::connection::{ConnectionHandle, ConnectionId, SessionHandle};

/// Declared device class of a peer
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum DeviceClass {
    Mobile,
    Vr,
    Desktop,
    #[default]
    #[serde(other)]
    Unknown,
}

impl DeviceClass {
    /// Case-insensitive; anything unrecognised is [`DeviceClass::Unknown`]
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "mobile" => Self::Mobile,
            "vr" => Self::Vr,
            "desktop" => Self::Desktop,
            _ => Self::Unknown,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mobile => "mobile",
            Self::Vr => "vr",
            Self::Desktop => "desktop",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceClass {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

/// Registry record for one live session
#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    pub device: DeviceClass,
    pub capabilities: Option<Value>,
    pub connected_at: DateTime<Utc>,
    alive: bool,
    connection: ConnectionHandle,
}

impl Session {
    #[must_use]
    pub fn connection(&self) -> &ConnectionHandle {
        &self.connection
    }

    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.alive
    }

    fn handle(&self) -> SessionHandle {
        SessionHandle {
            id: self.id.clone(),
            device: self.device,
            connection: self.connection.clone(),
        }
    }
}

/// All live sessions, keyed by id
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<SessionId, Session>,
}

impl SessionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection.
    ///
    /// The requested id is honoured when it is usable and free; otherwise a
    /// fresh `sess_…` id is generated.
    pub fn register(
        &self,
        requested: Option<&str>,
        device: DeviceClass,
        connection: ConnectionHandle,
    ) -> SessionHandle {
        if let Some(id) = requested.and_then(SessionId::from_requested) {
            match self.sessions.entry(id) {
                Entry::Vacant(slot) => {
                    let session = Self::record(slot.key().clone(), device, connection);
                    let handle = session.handle();
                    slot.insert(session);
                    return handle;
                }
                Entry::Occupied(taken) => {
                    tracing::debug!(
                        requested = %taken.key(),
                        "Requested session id is in use, generating a new one"
                    );
                }
            }
        }

        loop {
            if let Entry::Vacant(slot) = self.sessions.entry(SessionId::generate()) {
                let session = Self::record(slot.key().clone(), device, connection);
                let handle = session.handle();
                slot.insert(session);
                return handle;
            }
        }
    }

    fn record(id: SessionId, device: DeviceClass, connection: ConnectionHandle) -> Session {
        Session {
            id,
            device,
            capabilities: None,
            connected_at: Utc::now(),
            alive: true,
            connection,
        }
    }

    /// Remove a session if it still belongs to `connection`
    pub fn unregister(&self, id: &SessionId, connection: ConnectionId) -> Option<Session> {
        self.sessions
            .remove_if(id, |_, session| session.connection.id() == connection)
            .map(|(_, session)| session)
    }

    #[must_use]
    pub fn lookup(&self, id: &SessionId) -> Option<Session> {
        self.sessions.get(id).map(|entry| entry.value().clone())
    }

    /// Outbound handle of a session, if it is registered and open
    #[must_use]
    pub fn open_connection(&self, id: &SessionId) -> Option<ConnectionHandle> {
        self.sessions
            .get(id)
            .map(|entry| entry.connection.clone())
            .filter(ConnectionHandle::is_open)
    }

    /// Record a pong
    pub fn mark_alive(&self, id: &SessionId, connection: ConnectionId) {
        if let Some(mut session) = self.sessions.get_mut(id) {
            if session.connection.id() == connection {
                session.alive = true;
            }
        }
    }

    /// Read and clear the liveness flag; `None` if the session is gone
    pub fn take_alive(&self, id: &SessionId) -> Option<bool> {
        self.sessions
            .get_mut(id)
            .map(|mut session| std::mem::replace(&mut session.alive, false))
    }

    /// Attach a capability descriptor; false if the session is gone
    pub fn set_capabilities(&self, id: &SessionId, capabilities: Value) -> bool {
        match self.sessions.get_mut(id) {
            Some(mut session) => {
                session.capabilities = Some(capabilities);
                true
            }
            None => false,
        }
    }

    /// Handles for every live session
    #[must_use]
    pub fn snapshot(&self) -> Vec<SessionHandle> {
        self.sessions.iter().map(|entry| entry.handle()).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
