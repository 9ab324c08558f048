//! Chunk producers.

use serde_json::Value;

use crate::StreamDescriptor;

/// Produces the payload of one chunk.
///
/// Called once per tick with a 1-based `index`. Implementations should be
/// stateless per chunk: a chunk that could not be delivered is never
/// requested again.
pub trait ChunkSource: Send + Sync + 'static {
    fn chunk(&self, descriptor: &StreamDescriptor, index: u64) -> Value;
}

/// Emits `"Streaming data chunk <n>"` regardless of the operation.
#[derive(Debug, Clone, Copy, Default)]
pub struct DemoChunks;

impl ChunkSource for DemoChunks {
    fn chunk(&self, _descriptor: &StreamDescriptor, index: u64) -> Value {
        Value::String(format!("Streaming data chunk {index}"))
    }
}
