/// Errors that can occur in the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Binding the listening socket failed (e.g. port already in use).
    #[error("bind failed on {addr}: {source}")]
    BindFailed {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Accepting a TCP connection failed.
    #[error("accept failed: {0}")]
    AcceptFailed(#[source] std::io::Error),

    /// The WebSocket opening handshake failed or timed out.
    #[error("handshake with {addr} failed: {reason}")]
    HandshakeFailed {
        addr: std::net::SocketAddr,
        reason: String,
    },

    /// Sending data failed.
    #[error("send failed: {0}")]
    SendFailed(#[source] std::io::Error),

    /// Receiving data failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(#[source] std::io::Error),

    /// The peer sent a message larger than the configured ceiling.
    #[error("inbound message exceeds {limit} bytes")]
    MessageTooLarge { limit: usize },

    /// The connection was already closed.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),
}
