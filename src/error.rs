//! Error types for the REST client and the streaming chat transports.

use reqwest::StatusCode;
use thiserror::Error;

/// Result type for REST operations.
pub type ApiResult<T> = Result<T, ApiError>;

/// Errors returned by [`ApiClient`](crate::api::ApiClient).
#[derive(Debug, Error)]
pub enum ApiError {
    /// HTTP request failed before a response was received.
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The backend rejected the credentials (401), even after a refresh attempt.
    ///
    /// Tokens held by the client have been cleared when this is returned.
    #[error("Unauthorized: session expired or credentials rejected")]
    Unauthorized,

    /// The call requires a logged-in session but no tokens are held.
    #[error("Not logged in")]
    NotLoggedIn,

    /// Non-success status with the backend's `detail` message.
    #[error("API error {status}: {detail}")]
    Status { status: StatusCode, detail: String },

    /// Input rejected before it was sent.
    #[error("Invalid input: {0}")]
    Invalid(String),

    /// Response body could not be decoded.
    #[error("Failed to parse response: {0}")]
    Parse(String),
}

impl ApiError {
    /// True for errors the composition root should answer with a fresh login.
    pub fn is_auth(&self) -> bool {
        matches!(self, ApiError::Unauthorized | ApiError::NotLoggedIn)
    }
}

/// Result type for chat streaming operations.
pub type ChatResult<T> = Result<T, ChatError>;

/// Errors raised while streaming a conversation turn.
#[derive(Debug, Error)]
pub enum ChatError {
    /// The REST layer failed (fallback request, auth).
    #[error(transparent)]
    Api(#[from] ApiError),

    /// The backend sent a `{"type":"error"}` event.
    #[error("Backend error: {0}")]
    Backend(String),

    /// The socket is not connected.
    #[error("Socket not connected")]
    NotConnected,

    /// The socket closed while a reply was streaming.
    #[error("Connection closed while streaming")]
    ConnectionClosed,

    /// The stream ended without a `complete` or `error` event.
    #[error("Stream ended before completion")]
    StreamEnded,

    /// Socket-level failure.
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// A frame that could not be decoded into an event.
    #[error("Malformed frame: {0}")]
    Frame(String),
}

impl From<tokio_tungstenite::tungstenite::Error> for ChatError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        ChatError::WebSocket(err.to_string())
    }
}

impl From<reqwest::Error> for ChatError {
    fn from(err: reqwest::Error) -> Self {
        ChatError::Api(ApiError::Request(err))
    }
}

impl ChatError {
    /// True when the failure came from the backend rather than the transport.
    pub fn is_application(&self) -> bool {
        matches!(self, ChatError::Backend(_))
    }
}
