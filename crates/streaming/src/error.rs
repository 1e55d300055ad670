use std::time::Duration;

use thiserror::Error;

use crate::protocol::ProtocolViolation;

/// Everything that can end a connection attempt or a live session.
///
/// These never cross the observer boundary: the connection task logs them and
/// callers only see status transitions.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StreamError {
    /// The socket could not be opened. Recoverable via backoff.
    #[error("transport failure: {0}")]
    Transport(String),
    /// Fatal to the current connection.
    #[error("protocol violation: {0}")]
    Protocol(#[from] ProtocolViolation),
    #[error("handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl From<tokio_tungstenite::tungstenite::Error> for StreamError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        StreamError::Transport(e.to_string())
    }
}
