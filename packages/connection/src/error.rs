//! Error types for the connection layer.

use std::io;
use std::time::Duration;

use appvirt_sync::SyncError;

/// Errors raised while talking to the host.
#[derive(thiserror::Error, Debug)]
pub enum ConnectionError {
    /// The host did not answer in time.
    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    /// The channel was closed by the other side.
    #[error("channel closed")]
    Closed,

    /// The connection is in its terminal state.
    #[error("disconnected from host")]
    Disconnected,

    /// The host handled the request and reported a failure.
    #[error("host error: {message}")]
    Remote { message: String },

    #[error("unexpected response to {operation}: {response}")]
    UnexpectedResponse {
        operation: &'static str,
        response: String,
    },

    #[error("no channel published for '{name}'")]
    UnknownChannel { name: String },

    /// A host-side table could not be read or written.
    #[error("synchronization error: {0}")]
    Sync(#[from] SyncError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

impl ConnectionError {
    /// True if the peer is gone for good.
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            ConnectionError::Closed | ConnectionError::Disconnected | ConnectionError::Io(_)
        )
    }
}

/// Result type alias for connection operations.
pub type Result<T> = std::result::Result<T, ConnectionError>;
