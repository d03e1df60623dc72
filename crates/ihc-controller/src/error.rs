//! Error types for controller communication

use ihc_core::EventError;
use std::time::Duration;
use thiserror::Error;

/// Result type for controller operations
pub type ControllerResult<T> = Result<T, ControllerError>;

/// Errors raised while talking to the controller
#[derive(Debug, Error)]
pub enum ControllerError {
    /// The HTTP request could not be completed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The controller answered with something other than 200
    #[error("controller returned status {status}: {body}")]
    Status { status: u16, body: String },

    /// The response body was not what the command API promises
    #[error("invalid response body: {0}")]
    Decode(#[from] serde_json::Error),

    /// Socket-level failure on the event stream
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// The event stream was closed by the peer
    #[error("event stream closed")]
    Closed,

    /// Connecting to the event stream took too long
    #[error("connect timed out after {0:?}")]
    ConnectTimeout(Duration),

    /// A frame arrived that could not be decoded
    #[error("malformed event frame: {0}")]
    Protocol(#[from] EventError),
}

impl ControllerError {
    /// Malformed payloads are discarded; everything else breaks the connection
    pub fn is_protocol(&self) -> bool {
        matches!(self, ControllerError::Protocol(_))
    }
}
