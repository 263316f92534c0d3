//! Identifiers used on the wire and in logs
//!
//! - [`SessionId`]: opaque per-connection identity. Clients may propose one;
//!   otherwise the server mints a TypeID of the form `sess_<base32 uuidv4>`.
//! - [`RoomCode`]: short, upper-case alphanumeric code shared between peers.
//! - [`RequestId`]: time-sortable `req_…` ids for the side-channel HTTP routes.

use std::fmt;
use std::str::FromStr;

use http::Request;
use mti::prelude::*;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tower_http::request_id::{MakeRequestId, RequestId as TowerRequestId};

use crate::relay::protocol::ProtocolError;

/// Longest client-proposed session id the registry will honour.
pub const MAX_SESSION_ID_LEN: usize = 128;

/// Longest client-supplied room code accepted by `join_room`.
pub const MAX_ROOM_CODE_LEN: usize = 32;

const ROOM_CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Opaque session identifier.
///
/// Unique among live sessions only; an id may be reused once its owner has
/// disconnected.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// The prefix used for server-generated session ids
    pub const PREFIX: &'static str = "sess";

    /// Mint a fresh, unpredictable session id (`sess_…`, UUIDv4).
    #[must_use]
    pub fn generate() -> Self {
        Self(Self::PREFIX.create_type_id::<V4>().to_string())
    }

    /// Accept a client-proposed id.
    ///
    /// Returns `None` for blank, oversized, or control-character ids, which
    /// the registry then treats as "no id supplied".
    #[must_use]
    pub fn from_requested(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty()
            || trimmed.len() > MAX_SESSION_ID_LEN
            || trimmed.chars().any(char::is_control)
        {
            return None;
        }
        Some(Self(trimmed.to_string()))
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

/// Room code shared out-of-band (QR code, typed in) between paired peers.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomCode(String);

impl RoomCode {
    /// Generate a random code of `len` characters from `[A-Z0-9]`.
    ///
    /// Uniqueness against live rooms is the directory's job.
    #[must_use]
    pub fn random(len: usize) -> Self {
        let mut rng = rand::rng();
        let code = (0..len.max(1))
            .map(|_| char::from(ROOM_CODE_ALPHABET[rng.random_range(0..ROOM_CODE_ALPHABET.len())]))
            .collect();
        Self(code)
    }

    /// Normalise a client-supplied code: trimmed, upper-cased, 1 to 32
    /// characters of `[A-Za-z0-9_-]`.
    pub fn parse(raw: &str) -> Result<Self, ProtocolError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ProtocolError::invalid("join_room", "room code must not be empty"));
        }
        if trimmed.len() > MAX_ROOM_CODE_LEN {
            return Err(ProtocolError::invalid(
                "join_room",
                format!("room code longer than {MAX_ROOM_CODE_LEN} characters"),
            ));
        }
        if !trimmed
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(ProtocolError::invalid(
                "join_room",
                "room code may only contain letters, digits, '-' and '_'",
            ));
        }
        Ok(Self(trimmed.to_ascii_uppercase()))
    }

    /// Returns the code as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for RoomCode {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// A type-safe request identifier for the HTTP side channel.
///
/// Format: `req_<base32-encoded-uuidv7>`, e.g. `req_01h455vb4pex5vsknk084sn02q`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestId(MagicTypeId);

impl RequestId {
    /// The prefix used for request IDs
    pub const PREFIX: &'static str = "req";

    /// Creates a new request ID with a UUIDv7 (time-sortable).
    #[must_use]
    pub fn new() -> Self {
        Self(Self::PREFIX.create_type_id::<V7>())
    }

    /// Returns the request ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// `MakeRequestId` for tower-http that stamps each HTTP request with a [`RequestId`].
#[derive(Debug, Clone, Copy, Default)]
pub struct MakeTypedRequestId;

impl MakeRequestId for MakeTypedRequestId {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<TowerRequestId> {
        let id = RequestId::new();
        let header_value = http::HeaderValue::from_str(id.as_str()).ok()?;
        Some(TowerRequestId::new(header_value))
    }
}
