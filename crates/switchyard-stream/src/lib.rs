//! Streaming tasks for Switchyard.
//!
//! A stream is a server-owned task bound to one connection that emits a
//! bounded, strictly ordered sequence of `stream_data` chunks on a fixed
//! cadence, then a single `stream_stopped`.
//!
//! # Key types
//!
//! - [`StreamScheduler`] — starts, stops and looks up streams
//! - [`StreamTask`] — snapshot of one stream (state, chunk counter)
//! - [`StreamState`] — lifecycle state machine
//! - [`ChunkSource`] — produces chunk payloads ([`DemoChunks`] by default)
//!
//! # Cancellation
//!
//! Each stream runs as its own Tokio task holding a child of its
//! connection's cancellation token. Removing the connection cancels the
//! parent, so every stream it owns stops without the registry knowing
//! streams exist.

mod error;
mod scheduler;
mod source;
mod task;

pub use error::StreamError;
pub use scheduler::{StartOutcome, StreamConfig, StreamScheduler};
pub use source::{ChunkSource, DemoChunks};
pub use task::{StreamDescriptor, StreamState, StreamTask};
