//! Error types for the session layer.

use std::net::IpAddr;

use crate::ConnectionId;

/// Errors that can occur during connection management.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The remote address exceeded its request rate.
    #[error("address {0} is rate limited")]
    RateLimited(IpAddr),

    /// The registry already holds the maximum number of connections.
    #[error("connection limit of {0} reached")]
    AtCapacity(usize),

    /// No live connection has this id (never existed or already removed).
    #[error("connection {0} not found")]
    NotFound(ConnectionId),
}
