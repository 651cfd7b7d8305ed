//! Error types for the session client.

use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

use crate::types::RequestId;
use crate::websocket::ConnectionState;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// All errors produced by the client.
#[derive(Debug, Error)]
pub enum Error {
    /// Low-level WebSocket failure.
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// JSON encoding or decoding failure.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The connection was lost or torn down while the request was pending.
    #[error("Connection closed: {0}")]
    ConnectionClosed(String),

    /// A frame was submitted while the connection was not open.
    #[error("Connection not ready (state: {0})")]
    NotConnected(ConnectionState),

    /// Opening the transport took longer than the configured timeout.
    #[error("Connection attempt timed out after {0:?}")]
    ConnectTimeout(Duration),

    /// A request id was registered twice while still pending.
    #[error("Request id {0} is already pending")]
    DuplicateRequestId(RequestId),

    /// The venue answered with a non-200 status.
    #[error("API error (status {status}): {error}")]
    Api { status: u16, error: Value },

    /// An inbound frame could not be classified.
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    /// Signing failed.
    #[error("Authentication error: {0}")]
    Auth(String),

    /// An authenticated call was made without credentials.
    #[error("Missing credentials for {0}")]
    MissingCredentials(String),

    /// User data stream failure.
    #[error("User data stream error: {0}")]
    Stream(String),

    /// The user data stream was closed while the call was in flight.
    #[error("User data stream closed")]
    StreamClosed,

    /// The background task backing a handle has stopped.
    #[error("Session is shut down")]
    Shutdown,
}

impl Error {
    /// Whether retrying the same call later can succeed without changing it.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::WebSocket(_)
                | Error::ConnectionClosed(_)
                | Error::NotConnected(_)
                | Error::ConnectTimeout(_)
        )
    }

    pub(crate) fn connection_closed(reason: impl Into<String>) -> Self {
        Error::ConnectionClosed(reason.into())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Error::WebSocket(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(Error::NotConnected(ConnectionState::Reconnecting).is_retryable());
        assert!(Error::connection_closed("gone").is_retryable());
        assert!(!Error::Api {
            status: 400,
            error: serde_json::json!({"code": -1100}),
        }
        .is_retryable());
        assert!(!Error::DuplicateRequestId(RequestId::from("abc")).is_retryable());
    }

    #[test]
    fn test_api_error_display_includes_payload() {
        let err = Error::Api {
            status: 418,
            error: serde_json::json!({"code": -1003, "msg": "banned"}),
        };
        let rendered = err.to_string();
        assert!(rendered.contains("418"));
        assert!(rendered.contains("banned"));
    }
}
