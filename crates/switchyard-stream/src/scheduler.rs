//! The stream scheduler and the per-stream actor task.
//!
//! # Ordering
//!
//! The actor produces chunks under the stream's task lock, and `stop`
//! marks the task terminal under the same lock before cancelling. A chunk
//! is therefore either fully sent before the stop or never produced at
//! all; nothing trails the `stream_stopped` frame.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use switchyard_protocol::OutboundFrame;
use switchyard_session::{ConnectionHandle, ConnectionId, ConnectionRegistry};
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{ChunkSource, DemoChunks, StreamDescriptor, StreamError, StreamState, StreamTask};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Cadence and length of every stream.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Time between consecutive chunks. Default: 1 s.
    pub chunk_interval: Duration,
    /// A stream completes after this many chunks. Default: 10.
    pub max_chunks: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            chunk_interval: Duration::from_secs(1),
            max_chunks: 10,
        }
    }
}

impl StreamConfig {
    /// Replaces a zero interval with the default; `interval` panics on zero.
    pub fn validated(mut self) -> Self {
        if self.chunk_interval.is_zero() {
            tracing::warn!("chunk_interval is zero, using default");
            self.chunk_interval = Self::default().chunk_interval;
        }
        self
    }
}

/// Result of [`StreamScheduler::start`].
#[derive(Debug, Clone)]
pub struct StartOutcome {
    pub task: StreamTask,
    /// `false` when the id was already taken and the existing stream was
    /// returned untouched.
    pub created: bool,
}

// ---------------------------------------------------------------------------
// Stream table
// ---------------------------------------------------------------------------

/// Stream ids are chosen by the client, so they are only unique within
/// one connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct StreamKey {
    connection: ConnectionId,
    stream: String,
}

struct StreamEntry {
    task: Arc<Mutex<StreamTask>>,
    cancel: CancellationToken,
}

type StreamTable = Arc<Mutex<HashMap<StreamKey, StreamEntry>>>;

// ---------------------------------------------------------------------------
// StreamScheduler
// ---------------------------------------------------------------------------

/// Starts, stops and tracks streaming tasks.
pub struct StreamScheduler {
    registry: Arc<ConnectionRegistry>,
    config: StreamConfig,
    source: Arc<dyn ChunkSource>,
    streams: StreamTable,
}

impl StreamScheduler {
    /// A scheduler producing [`DemoChunks`].
    pub fn new(registry: Arc<ConnectionRegistry>, config: StreamConfig) -> Self {
        Self::with_source(registry, config, Arc::new(DemoChunks))
    }

    pub fn with_source(
        registry: Arc<ConnectionRegistry>,
        config: StreamConfig,
        source: Arc<dyn ChunkSource>,
    ) -> Self {
        Self {
            registry,
            config: config.validated(),
            source,
            streams: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Starts stream `stream_id` on `connection`.
    ///
    /// Sends `stream_started` (carrying `request_id`) before the first
    /// chunk can be produced. Starting an id that is already tracked on
    /// the same connection returns the existing stream and sends nothing.
    ///
    /// # Errors
    /// [`StreamError::ConnectionNotFound`] if the connection is not live.
    pub fn start(
        &self,
        connection: ConnectionId,
        stream_id: &str,
        descriptor: StreamDescriptor,
        request_id: Option<String>,
    ) -> Result<StartOutcome, StreamError> {
        let handle = self
            .registry
            .get(connection)
            .ok_or(StreamError::ConnectionNotFound(connection))?;

        let key = StreamKey {
            connection,
            stream: stream_id.to_string(),
        };

        let mut streams = self.streams.lock();
        if let Some(existing) = streams.get(&key) {
            let task = existing.task.lock().clone();
            debug!(conn_id = %connection, stream_id, state = %task.state, "stream already exists");
            return Ok(StartOutcome {
                task,
                created: false,
            });
        }

        let cancel = handle.cancel_token().child_token();
        if cancel.is_cancelled() {
            // Removed between the lookup and here.
            return Err(StreamError::ConnectionNotFound(connection));
        }

        let task = StreamTask::new(connection, key.stream.clone(), descriptor);
        let shared = Arc::new(Mutex::new(task.clone()));
        streams.insert(
            key.clone(),
            StreamEntry {
                task: Arc::clone(&shared),
                cancel: cancel.clone(),
            },
        );
        drop(streams);

        handle.send_frame(
            &OutboundFrame::new("stream_started")
                .with("streamId", key.stream.as_str())
                .with("operation", task.descriptor.operation.as_str())
                .with_request_id(request_id),
        );
        info!(conn_id = %connection, stream_id, operation = %task.descriptor.operation, "stream started");

        let actor = StreamActor {
            key,
            handle,
            task: shared,
            cancel,
            source: Arc::clone(&self.source),
            streams: Arc::clone(&self.streams),
            interval: self.config.chunk_interval,
            max_chunks: self.config.max_chunks,
        };
        tokio::spawn(actor.run());

        Ok(StartOutcome {
            task,
            created: true,
        })
    }

    /// Stops a stream and sends `stream_stopped` with reason `"stopped"`.
    ///
    /// Returns the final snapshot, or `None` (doing nothing) if the stream
    /// is unknown or has already finished.
    pub fn stop(
        &self,
        connection: ConnectionId,
        stream_id: &str,
        request_id: Option<String>,
    ) -> Option<StreamTask> {
        let key = StreamKey {
            connection,
            stream: stream_id.to_string(),
        };
        let entry = self.streams.lock().remove(&key)?;

        let snapshot = {
            let mut task = entry.task.lock();
            if !task.transition(StreamState::Stopped) {
                return None;
            }
            entry.cancel.cancel();
            task.clone()
        };

        self.registry.send(
            connection,
            &stopped_frame(&snapshot, "stopped").with_request_id(request_id),
        );
        info!(conn_id = %connection, stream_id, chunks = snapshot.chunk_count, "stream stopped");
        Some(snapshot)
    }

    /// Snapshot of one tracked stream.
    pub fn get(&self, connection: ConnectionId, stream_id: &str) -> Option<StreamTask> {
        let key = StreamKey {
            connection,
            stream: stream_id.to_string(),
        };
        let streams = self.streams.lock();
        streams.get(&key).map(|entry| entry.task.lock().clone())
    }

    /// Snapshots of every stream tracked for `connection`, oldest first.
    pub fn list(&self, connection: ConnectionId) -> Vec<StreamTask> {
        let mut tasks: Vec<StreamTask> = self
            .streams
            .lock()
            .iter()
            .filter(|(key, _)| key.connection == connection)
            .map(|(_, entry)| entry.task.lock().clone())
            .collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        tasks
    }

    /// Number of streams that have not yet finished.
    pub fn active_count(&self) -> usize {
        self.streams
            .lock()
            .values()
            .filter(|entry| !entry.task.lock().state.is_terminal())
            .count()
    }

    /// Cancels every stream. Used on server shutdown.
    pub fn stop_all(&self) {
        let drained: Vec<StreamEntry> = self.streams.lock().drain().map(|(_, entry)| entry).collect();
        for entry in &drained {
            entry.task.lock().transition(StreamState::Stopped);
            entry.cancel.cancel();
        }
        if !drained.is_empty() {
            debug!(count = drained.len(), "all streams cancelled");
        }
    }
}

fn stopped_frame(task: &StreamTask, reason: &str) -> OutboundFrame {
    OutboundFrame::new("stream_stopped")
        .with("streamId", task.id.as_str())
        .with("messageCount", task.chunk_count)
        .with("reason", reason)
}

// ---------------------------------------------------------------------------
// StreamActor
// ---------------------------------------------------------------------------

/// What the actor does after a tick.
enum Step {
    Continue,
    /// Finished with nothing left to send.
    Done,
    /// Finished; deliver this `stream_stopped` frame, then exit.
    Finish(OutboundFrame),
}

/// One running stream. Owns its ticker; shares its task with the table.
struct StreamActor {
    key: StreamKey,
    handle: Arc<ConnectionHandle>,
    task: Arc<Mutex<StreamTask>>,
    cancel: CancellationToken,
    source: Arc<dyn ChunkSource>,
    streams: StreamTable,
    interval: Duration,
    max_chunks: u64,
}

impl StreamActor {
    async fn run(self) {
        if !self.task.lock().transition(StreamState::Running) {
            // Stopped before the task was first polled.
            self.untrack();
            return;
        }

        let mut ticker = time::interval_at(time::Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    self.on_cancelled();
                    break;
                }
                _ = ticker.tick() => match self.produce() {
                    Step::Continue => {}
                    Step::Done => break,
                    Step::Finish(frame) => {
                        // The terminal frame waits for queue space; it is
                        // only lost if the connection goes away.
                        if !self.handle.deliver_frame(&frame).await {
                            debug!(conn_id = %self.key.connection, stream_id = %self.key.stream, "connection gone before stream_stopped");
                        }
                        break;
                    }
                },
            }
        }

        self.untrack();
    }

    /// Emits the next chunk, or finishes the stream.
    fn produce(&self) -> Step {
        let mut task = self.task.lock();
        if task.state.is_terminal() {
            return Step::Done;
        }

        if task.chunk_count >= self.max_chunks {
            task.transition(StreamState::Completed);
            info!(conn_id = %self.key.connection, stream_id = %self.key.stream, chunks = task.chunk_count, "stream completed");
            return Step::Finish(stopped_frame(&task, "completed"));
        }

        let index = task.chunk_count + 1;
        let chunk = self.source.chunk(&task.descriptor, index);
        let frame = OutboundFrame::new("stream_data")
            .with("streamId", self.key.stream.as_str())
            .with("chunk", chunk)
            .with("index", index);

        if !self.handle.send_frame(&frame) {
            task.transition(StreamState::Stopped);
            if self.handle.is_closed() {
                debug!(conn_id = %self.key.connection, stream_id = %self.key.stream, index, "connection gone, stopping stream");
                return Step::Done;
            }
            warn!(conn_id = %self.key.connection, stream_id = %self.key.stream, index, "outbound queue full, stopping stream");
            return Step::Finish(stopped_frame(&task, "delivery_failed"));
        }

        task.chunk_count = index;
        task.last_activity = chrono::Utc::now();
        Step::Continue
    }

    fn on_cancelled(&self) {
        let mut task = self.task.lock();
        if task.transition(StreamState::Stopped) {
            // Only the connection going away gets here without `stop`.
            debug!(conn_id = %self.key.connection, stream_id = %self.key.stream, "stream cancelled with its connection");
        }
    }

    /// Drops this stream's table entry, unless a newer stream reused the id.
    fn untrack(&self) {
        let mut streams = self.streams.lock();
        if streams
            .get(&self.key)
            .is_some_and(|entry| Arc::ptr_eq(&entry.task, &self.task))
        {
            streams.remove(&self.key);
        }
    }
}
