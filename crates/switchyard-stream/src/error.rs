//! Error types for the stream layer.

use switchyard_session::ConnectionId;

/// Errors that can occur when starting a stream.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// The owning connection is not (or no longer) live.
    #[error("connection {0} not found")]
    ConnectionNotFound(ConnectionId),
}
