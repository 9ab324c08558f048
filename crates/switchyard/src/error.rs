//! Unified error type for Switchyard.

use switchyard_protocol::ProtocolError;
use switchyard_session::SessionError;
use switchyard_stream::StreamError;
use switchyard_transport::TransportError;

use crate::config::ConfigError;

/// Top-level error that wraps all crate-specific errors.
///
/// The `#[from]` attribute on each layer's variant lets `?` convert
/// sub-crate errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum SwitchyardError {
    /// A transport-level error (bind, handshake, send, recv).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A protocol-level error (encode, decode, invalid frame).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A session-level error (rate limited, at capacity, not found).
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Stream(#[from] StreamError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A handler was registered for a type the server answers itself.
    #[error("message type {0:?} is reserved")]
    ReservedType(String),
}
