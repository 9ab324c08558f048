//! Stream descriptor, lifecycle state, and task snapshot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use switchyard_session::ConnectionId;

// ---------------------------------------------------------------------------
// StreamDescriptor
// ---------------------------------------------------------------------------

/// What a stream should produce. Opaque to the scheduler; only the
/// [`ChunkSource`](crate::ChunkSource) interprets it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamDescriptor {
    pub operation: String,
    #[serde(default)]
    pub params: Value,
}

impl StreamDescriptor {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            params: Value::Null,
        }
    }

    pub fn with_params(mut self, params: Value) -> Self {
        self.params = params;
        self
    }
}

// ---------------------------------------------------------------------------
// StreamState
// ---------------------------------------------------------------------------

/// The lifecycle state of a stream.
///
/// ```text
/// Created → Running → Stopped    (stop request, delivery failure,
///                                  or owning connection removed)
///                   → Completed  (chunk ceiling reached)
/// ```
///
/// `Stopped` may also be reached straight from `Created` if the stream is
/// cancelled before its task first runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamState {
    Created,
    Running,
    Stopped,
    Completed,
}

impl StreamState {
    /// `true` for `Stopped` and `Completed`.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Completed)
    }

    /// Returns `true` if moving to `target` is a legal transition.
    pub fn can_transition_to(self, target: Self) -> bool {
        match (self, target) {
            (Self::Created, Self::Running | Self::Stopped) => true,
            (Self::Running, Self::Stopped | Self::Completed) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for StreamState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
            Self::Completed => write!(f, "completed"),
        }
    }
}

// ---------------------------------------------------------------------------
// StreamTask
// ---------------------------------------------------------------------------

/// A snapshot of one stream.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamTask {
    pub id: String,
    pub connection_id: ConnectionId,
    pub descriptor: StreamDescriptor,
    pub state: StreamState,
    /// Chunks delivered so far. Never decreases.
    pub chunk_count: u64,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl StreamTask {
    pub(crate) fn new(
        connection_id: ConnectionId,
        id: String,
        descriptor: StreamDescriptor,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            connection_id,
            descriptor,
            state: StreamState::Created,
            chunk_count: 0,
            created_at: now,
            last_activity: now,
        }
    }

    /// Moves to `target` if the transition is legal. Returns whether it
    /// happened.
    pub(crate) fn transition(&mut self, target: StreamState) -> bool {
        if !self.state.can_transition_to(target) {
            return false;
        }
        self.state = target;
        self.last_activity = Utc::now();
        true
    }
}
