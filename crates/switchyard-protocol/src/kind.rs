//! The closed set of message types the server handles itself.

use std::fmt;

/// A message type answered by the server without any external handler.
///
/// Business types (e.g. `ai_request`) are not listed here; they are
/// registered at runtime and looked up by their string tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinKind {
    Ping,
    Subscribe,
    Unsubscribe,
    StreamRequest,
    StopStream,
    GetStatus,
    GetConnections,
    Publish,
    Broadcast,
}

impl BuiltinKind {
    /// Every built-in kind, in the order advertised to clients.
    pub const ALL: [BuiltinKind; 9] = [
        Self::Ping,
        Self::Subscribe,
        Self::Unsubscribe,
        Self::StreamRequest,
        Self::StopStream,
        Self::GetStatus,
        Self::GetConnections,
        Self::Publish,
        Self::Broadcast,
    ];

    /// Looks up a kind by its wire tag.
    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == tag)
    }

    /// The wire tag.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ping => "ping",
            Self::Subscribe => "subscribe",
            Self::Unsubscribe => "unsubscribe",
            Self::StreamRequest => "stream_request",
            Self::StopStream => "stop_stream",
            Self::GetStatus => "get_status",
            Self::GetConnections => "get_connections",
            Self::Publish => "publish",
            Self::Broadcast => "broadcast",
        }
    }

    /// The type of the direct reply sent back to the requester.
    pub fn reply_tag(self) -> &'static str {
        match self {
            Self::Ping => "pong",
            Self::Subscribe => "subscribed",
            Self::Unsubscribe => "unsubscribed",
            Self::StreamRequest => "stream_started",
            Self::StopStream => "stream_stopped",
            Self::GetStatus => "status",
            Self::GetConnections => "connections",
            Self::Publish => "published",
            Self::Broadcast => "broadcasted",
        }
    }
}

impl fmt::Display for BuiltinKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
