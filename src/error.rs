//! Sidecar error types with HTTP status code mapping.
//!
//! [`SidecarError`] is the central error type for the sidecar. Errors raised
//! before the WebSocket upgrade are rendered to the client as structured JSON;
//! errors raised while streaming are only logged, since the HTTP exchange is
//! already over by then.

use std::path::PathBuf;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use utoipa::ToSchema;

use crate::vnc::Direction;

/// Structured JSON error response body.
///
/// All error responses follow this shape:
/// ```json
/// {
///   "error": {
///     "code": 2001,
///     "message": "could not find UUID directory"
///   }
/// }
/// ```
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    /// Structured error payload.
    pub error: ErrorBody,
}

/// Inner error body with numeric code and human-readable message.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    /// Numeric error code.
    pub code: u32,
    /// Human-readable error message.
    pub message: String,
    /// Optional additional details, such as the socket path that failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Failure of one directional copy between the client and the backend.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// The WebSocket transport failed.
    #[error("websocket error: {0}")]
    WebSocket(#[from] axum::Error),

    /// Reading from or writing to the backend socket failed.
    #[error("backend i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The backend socket reached end-of-file while the client was attached.
    #[error("backend closed the connection")]
    BackendClosed,

    /// The copy was stopped because the session is shutting down.
    #[error("session cancelled")]
    Cancelled,
}

/// Server-side error enum with HTTP status code mapping.
///
/// # Error Code Ranges
///
/// | Range     | Category        | HTTP Status                 |
/// |-----------|-----------------|-----------------------------|
/// | 1000–1999 | Handshake       | 400 Bad Request             |
/// | 2000–2999 | Socket lookup   | 503 Service Unavailable     |
/// | 3000–3999 | Backend/Server  | 502 Bad Gateway / 500       |
#[derive(Debug, thiserror::Error)]
pub enum SidecarError {
    /// The VM's private directory could not be found under the base directory.
    #[error("{0}")]
    SocketResolution(String),

    /// The backend socket exists by convention but could not be connected.
    #[error("could not dial VNC socket {}: {source}", .path.display())]
    Dial {
        /// Socket path that was dialed.
        path: PathBuf,
        /// Underlying connect failure.
        #[source]
        source: std::io::Error,
    },

    /// The HTTP request could not be upgraded to a WebSocket.
    #[error("websocket upgrade failed: {0}")]
    Upgrade(String),

    /// A copy direction failed first while streaming.
    #[error("stream error ({direction}): {source}")]
    Stream {
        /// Direction that completed first.
        direction: Direction,
        /// Cause reported by that direction.
        #[source]
        source: StreamError,
    },

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl SidecarError {
    /// Returns the numeric error code for this variant.
    #[must_use]
    pub const fn error_code(&self) -> u32 {
        match self {
            Self::Upgrade(_) => 1001,
            Self::SocketResolution(_) => 2001,
            Self::Internal(_) => 3000,
            Self::Dial { .. } => 3001,
            Self::Stream { .. } => 3002,
        }
    }

    /// Returns the HTTP status code for this variant.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::Upgrade(_) => StatusCode::BAD_REQUEST,
            Self::SocketResolution(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Dial { .. } => StatusCode::BAD_GATEWAY,
            Self::Stream { .. } | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns extra context for the response body, if the variant has any.
    #[must_use]
    pub fn details(&self) -> Option<String> {
        match self {
            Self::Dial { path, .. } => Some(format!("socket: {}", path.display())),
            Self::Stream { direction, .. } => Some(format!("direction: {direction}")),
            Self::SocketResolution(_) | Self::Upgrade(_) | Self::Internal(_) => None,
        }
    }
}

impl IntoResponse for SidecarError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: ErrorBody {
                code: self.error_code(),
                message: self.to_string(),
                details: self.details(),
            },
        };
        let mut response = axum::Json(body).into_response();
        *response.status_mut() = status;
        response
    }
}
