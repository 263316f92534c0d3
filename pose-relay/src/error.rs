//! Error types and HTTP response conversion

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ids::SessionId;
use crate::relay::protocol::ProtocolError;

/// Result type alias using the crate's Error type
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Crate-level error for startup, configuration and the HTTP side channel
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(Box<figment::Error>),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Bad request
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Internal server error
    #[error("Internal server error: {0}")]
    Internal(String),
}

/// Failures raised while handling a single connection's traffic.
///
/// None of these is fatal to the process or to other connections.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Malformed or unrecognised envelope
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// `sync_request` named a session that is absent or closed
    #[error("Target session not found: {0}")]
    TargetNotFound(SessionId),

    /// The operation needs room membership and the session has none
    #[error("Not in a room")]
    NotInRoom,

    /// Socket-level failure; handled as a close
    #[error("Transport error: {0}")]
    Transport(String),

    /// Rate limit exceeded; dropped silently
    #[error("Rate limit exceeded")]
    Overload,
}

impl RelayError {
    /// Text for the `error` envelope sent back to the originating connection.
    ///
    /// `None` means the failure is never reported to the peer.
    #[must_use]
    pub fn reply_message(&self) -> Option<String> {
        match self {
            Self::Protocol(_) | Self::TargetNotFound(_) | Self::NotInRoom => Some(self.to_string()),
            Self::Transport(_) | Self::Overload => None,
        }
    }
}

/// Error response body
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error message
    pub error: String,

    /// Optional error code
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,

    /// HTTP status code
    pub status: u16,
}

impl ErrorResponse {
    /// Create a new error response
    pub fn new(status: StatusCode, error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: None,
            status: status.as_u16(),
        }
    }

    /// Create error response with a code
    pub fn with_code(
        status: StatusCode,
        code: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            error: error.into(),
            code: Some(code.into()),
            status: status.as_u16(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, error_response) = match self {
            Error::Config(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorResponse::with_code(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "CONFIG_ERROR",
                    e.to_string(),
                ),
            ),
            Error::Io(e) => {
                tracing::error!(error = %e, "I/O error while serving request");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse::with_code(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "IO_ERROR",
                        "I/O error",
                    ),
                )
            }
            Error::NotFound(msg) => (
                StatusCode::NOT_FOUND,
                ErrorResponse::with_code(StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ),
            Error::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                ErrorResponse::with_code(StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ),
            Error::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse::with_code(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "INTERNAL_ERROR",
                        "Internal server error",
                    ),
                )
            }
        };

        (status, Json(error_response)).into_response()
    }
}

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Error::Config(Box::new(err))
    }
}
