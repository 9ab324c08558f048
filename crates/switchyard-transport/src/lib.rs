//! Transport abstraction layer for Switchyard.
//!
//! Provides the [`Transport`], [`Upgrade`] and [`Connection`] traits that
//! abstract over the network protocol carrying client frames.
//!
//! Accepting is split in two steps so a slow client handshake never stalls
//! the accept loop: [`Transport::accept`] only takes the raw socket, and
//! [`Upgrade::complete`] finishes the protocol handshake inside the
//! per-connection task.
//!
//! # Feature Flags
//!
//! - `websocket` (default) — WebSocket transport via `tokio-tungstenite`

#![allow(async_fn_in_trait)]

mod error;
#[cfg(feature = "websocket")]
mod websocket;

pub use error::TransportError;
#[cfg(feature = "websocket")]
pub use websocket::{WebSocketConnection, WebSocketTransport, WebSocketUpgrade};

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

/// Default ceiling for a single inbound message (1 MiB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Settings applied to every accepted connection.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Inbound messages larger than this are rejected by the transport
    /// before they reach any caller.
    pub max_message_size: usize,
    /// How long a client has to finish the opening handshake.
    pub handshake_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            handshake_timeout: Duration::from_secs(5),
        }
    }
}

/// Why the server is closing a connection.
///
/// Each variant maps onto a standard WebSocket close code so that clients
/// can tell an admission rejection from a normal shutdown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// 1000: orderly close requested by the server.
    Normal(String),
    /// 1001: server shutting down or the peer stopped answering.
    GoingAway(String),
    /// 1008: the peer violated a policy (e.g. request rate).
    PolicyViolation(String),
    /// 1009: the peer sent a message above the size ceiling.
    TooLarge(String),
    /// 1013: temporary condition (e.g. at connection capacity).
    TryAgainLater(String),
}

impl CloseReason {
    /// The numeric WebSocket close code.
    pub fn code(&self) -> u16 {
        match self {
            Self::Normal(_) => 1000,
            Self::GoingAway(_) => 1001,
            Self::PolicyViolation(_) => 1008,
            Self::TooLarge(_) => 1009,
            Self::TryAgainLater(_) => 1013,
        }
    }

    /// The human-readable reason sent with the close frame.
    pub fn reason(&self) -> &str {
        match self {
            Self::Normal(r)
            | Self::GoingAway(r)
            | Self::PolicyViolation(r)
            | Self::TooLarge(r)
            | Self::TryAgainLater(r) => r,
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.reason(), self.code())
    }
}

/// One unit received from the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// An application message (text or binary payload).
    Frame(Vec<u8>),
    /// The peer answered a transport-level ping.
    Pong,
    /// The peer sent a transport-level ping (answered automatically).
    Ping,
}

/// Accepts new incoming sockets.
pub trait Transport: Send + Sync + 'static {
    /// The not-yet-upgraded socket produced by this transport.
    type Upgrade: Upgrade;
    /// The error type for transport operations.
    type Error: std::error::Error + Send + Sync;

    /// Waits for and accepts the next incoming socket.
    async fn accept(&mut self) -> Result<Self::Upgrade, Self::Error>;

    /// Returns the address the transport is listening on.
    fn local_addr(&self) -> std::io::Result<SocketAddr>;
}

/// An accepted socket whose protocol handshake has not run yet.
pub trait Upgrade: Send + 'static {
    /// The connection produced once the handshake succeeds.
    type Connection: Connection;
    /// The error type for the handshake.
    type Error: std::error::Error + Send + Sync;

    /// Address of the remote peer.
    fn remote_addr(&self) -> SocketAddr;

    /// Runs the protocol handshake.
    async fn complete(self) -> Result<Self::Connection, Self::Error>;
}

/// A single connection that can exchange messages with the peer.
///
/// Sending and receiving are independent: a task blocked in
/// [`recv`](Self::recv) never prevents another task from sending.
pub trait Connection: Send + Sync + 'static {
    /// The error type for connection operations.
    type Error: std::error::Error + Send + Sync;

    /// Sends a text message to the remote peer.
    async fn send_text(&self, text: &str) -> Result<(), Self::Error>;

    /// Sends a transport-level ping.
    async fn ping(&self) -> Result<(), Self::Error>;

    /// Receives the next unit from the remote peer.
    ///
    /// Returns `Ok(None)` when the connection is cleanly closed.
    async fn recv(&self) -> Result<Option<Inbound>, Self::Error>;

    /// Closes the connection with the given reason.
    async fn close(&self, reason: CloseReason) -> Result<(), Self::Error>;

    /// Address of the remote peer.
    fn remote_addr(&self) -> SocketAddr;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_reason_codes() {
        assert_eq!(CloseReason::Normal("bye".into()).code(), 1000);
        assert_eq!(CloseReason::GoingAway("x".into()).code(), 1001);
        assert_eq!(CloseReason::PolicyViolation("x".into()).code(), 1008);
        assert_eq!(CloseReason::TooLarge("x".into()).code(), 1009);
        assert_eq!(CloseReason::TryAgainLater("x".into()).code(), 1013);
    }

    #[test]
    fn test_close_reason_display_includes_code() {
        let reason = CloseReason::PolicyViolation("rate limited".into());
        assert_eq!(reason.reason(), "rate limited");
        assert_eq!(reason.to_string(), "rate limited (1008)");
    }

    #[test]
    fn test_default_transport_config() {
        let config = TransportConfig::default();
        assert_eq!(config.max_message_size, 1024 * 1024);
        assert_eq!(config.handshake_timeout, Duration::from_secs(5));
    }
}
