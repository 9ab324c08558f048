//! The connection registry: every live connection and its subscriptions.
//!
//! # Indices
//!
//! Subscriptions are a many-to-many relation kept in two maps:
//! - `topics`: topic → subscriber ids (broadcast is O(subscribers))
//! - `subscriptions`: connection id → topic names (removal is
//!   O(topics of that connection))
//!
//! Both maps live under the same lock as the connection table, and every
//! mutation touches them in one critical section, so neither side ever
//! holds a reference the other side lacks.
//!
//! # Locking
//!
//! A `parking_lot::RwLock` that is never held across an `.await`.
//! Enumeration (`list_all`, `subscribers`) clones the `Arc` handles out
//! under a read lock and the caller sends outside of it, so a broadcast
//! in progress never delays a concurrent `remove`.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use switchyard_protocol::OutboundFrame;
use switchyard_ratelimit::RateLimiter;
use tokio::sync::mpsc;

use crate::{ConnectionHandle, ConnectionId, ConnectionInfo, Outbound, SessionError};

/// Registry limits.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Admission is refused once this many connections are live.
    pub max_connections: usize,
    /// Capacity of each connection's outbound queue.
    pub outbound_queue_size: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_connections: 1000,
            outbound_queue_size: 256,
        }
    }
}

/// A freshly admitted connection.
///
/// The receiver half of the outbound queue goes to the connection's
/// writer task; everyone else sends through the handle.
#[derive(Debug)]
pub struct Admitted {
    pub handle: Arc<ConnectionHandle>,
    pub outbound: mpsc::Receiver<Outbound>,
}

#[derive(Default)]
struct Inner {
    connections: HashMap<ConnectionId, Arc<ConnectionHandle>>,
    topics: HashMap<String, HashSet<ConnectionId>>,
    subscriptions: HashMap<ConnectionId, BTreeSet<String>>,
}

/// Owns the set of live connections and their topic subscriptions.
pub struct ConnectionRegistry {
    config: RegistryConfig,
    limiter: Arc<RateLimiter>,
    next_id: AtomicU64,
    inner: RwLock<Inner>,
}

impl ConnectionRegistry {
    pub fn new(config: RegistryConfig, limiter: Arc<RateLimiter>) -> Self {
        Self {
            config,
            limiter,
            next_id: AtomicU64::new(1),
            inner: RwLock::new(Inner::default()),
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// The limiter consulted on admission.
    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Admits a new connection from `remote_addr`.
    ///
    /// # Errors
    /// - [`SessionError::AtCapacity`] — `max_connections` already live
    /// - [`SessionError::RateLimited`] — the address exceeded its rate
    pub fn admit(&self, remote_addr: SocketAddr) -> Result<Admitted, SessionError> {
        let mut inner = self.inner.write();

        // Capacity first, so a refused connection doesn't eat rate budget.
        if inner.connections.len() >= self.config.max_connections {
            tracing::warn!(%remote_addr, max = self.config.max_connections, "connection refused: at capacity");
            return Err(SessionError::AtCapacity(self.config.max_connections));
        }
        if !self.limiter.check(remote_addr.ip()) {
            tracing::warn!(%remote_addr, "connection refused: rate limited");
            return Err(SessionError::RateLimited(remote_addr.ip()));
        }

        let id = ConnectionId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(self.config.outbound_queue_size.max(1));
        let handle = Arc::new(ConnectionHandle::new(id, remote_addr, tx));
        inner.connections.insert(id, Arc::clone(&handle));
        let live = inner.connections.len();
        drop(inner);

        tracing::info!(conn_id = %id, %remote_addr, live, "connection admitted");
        Ok(Admitted {
            handle,
            outbound: rx,
        })
    }

    /// Looks up a live connection.
    pub fn get(&self, id: ConnectionId) -> Option<Arc<ConnectionHandle>> {
        self.inner.read().connections.get(&id).cloned()
    }

    /// Removes a connection, its subscriptions, and (through its
    /// cancellation token) every stream it owns.
    ///
    /// Idempotent: returns `None` if the connection was already gone.
    pub fn remove(&self, id: ConnectionId) -> Option<Arc<ConnectionHandle>> {
        self.remove_if(id, |_| true)
    }

    /// Removes `id` only if it is still marked unresponsive.
    ///
    /// The flag is re-read under the registry's write lock, so a connection
    /// that answered a ping after the sweep looked at it survives.
    pub(crate) fn evict_unresponsive(&self, id: ConnectionId) -> Option<Arc<ConnectionHandle>> {
        self.remove_if(id, |handle| !handle.is_alive())
    }

    fn remove_if(
        &self,
        id: ConnectionId,
        pred: impl FnOnce(&ConnectionHandle) -> bool,
    ) -> Option<Arc<ConnectionHandle>> {
        let handle = {
            let mut inner = self.inner.write();
            if !pred(inner.connections.get(&id)?.as_ref()) {
                return None;
            }
            let handle = inner.connections.remove(&id)?;
            if let Some(topics) = inner.subscriptions.remove(&id) {
                for topic in topics {
                    detach(&mut inner.topics, &topic, id);
                }
            }
            handle
        };

        handle.shut();
        tracing::info!(conn_id = %id, messages = handle.message_count(), "connection removed");
        Some(handle)
    }

    /// Snapshot of every live connection.
    pub fn list_all(&self) -> Vec<Arc<ConnectionHandle>> {
        self.inner.read().connections.values().cloned().collect()
    }

    /// Snapshot of every live connection with its topics.
    pub fn infos(&self) -> Vec<ConnectionInfo> {
        let inner = self.inner.read();
        let mut infos: Vec<ConnectionInfo> = inner
            .connections
            .values()
            .map(|h| h.info(topics_in(&inner, h.id())))
            .collect();
        infos.sort_by_key(|info| info.id);
        infos
    }

    /// Snapshot of one connection with its topics.
    pub fn info(&self, id: ConnectionId) -> Option<ConnectionInfo> {
        let inner = self.inner.read();
        let handle = inner.connections.get(&id)?;
        Some(handle.info(topics_in(&inner, id)))
    }

    pub fn len(&self) -> usize {
        self.inner.read().connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of topics with at least one subscriber.
    pub fn topic_count(&self) -> usize {
        self.inner.read().topics.len()
    }

    /// Subscribes `id` to `topics`; returns the resulting topic set.
    ///
    /// Blank topic names are ignored. Subscribing twice is harmless.
    pub fn subscribe(&self, id: ConnectionId, topics: &[String]) -> Result<Vec<String>, SessionError> {
        let mut inner = self.inner.write();
        if !inner.connections.contains_key(&id) {
            return Err(SessionError::NotFound(id));
        }
        for topic in topics.iter().filter(|t| !t.trim().is_empty()) {
            inner.topics.entry(topic.clone()).or_default().insert(id);
            inner.subscriptions.entry(id).or_default().insert(topic.clone());
        }
        let current = topics_in(&inner, id);
        drop(inner);

        tracing::debug!(conn_id = %id, ?topics, "subscribed");
        Ok(current)
    }

    /// Unsubscribes `id` from `topics`; returns the remaining topic set.
    pub fn unsubscribe(&self, id: ConnectionId, topics: &[String]) -> Result<Vec<String>, SessionError> {
        let mut inner = self.inner.write();
        if !inner.connections.contains_key(&id) {
            return Err(SessionError::NotFound(id));
        }
        for topic in topics {
            let now_empty = match inner.subscriptions.get_mut(&id) {
                Some(set) => {
                    if !set.remove(topic) {
                        continue;
                    }
                    set.is_empty()
                }
                None => break,
            };
            if now_empty {
                inner.subscriptions.remove(&id);
            }
            detach(&mut inner.topics, topic, id);
        }
        let current = topics_in(&inner, id);
        drop(inner);

        tracing::debug!(conn_id = %id, ?topics, "unsubscribed");
        Ok(current)
    }

    /// Topics `id` is subscribed to (sorted; empty if unknown).
    pub fn topics_of(&self, id: ConnectionId) -> Vec<String> {
        topics_in(&self.inner.read(), id)
    }

    /// Live subscribers of `topic`.
    pub fn subscribers(&self, topic: &str) -> Vec<Arc<ConnectionHandle>> {
        let inner = self.inner.read();
        let Some(ids) = inner.topics.get(topic) else {
            return Vec::new();
        };
        ids.iter()
            .filter_map(|id| inner.connections.get(id).cloned())
            .collect()
    }

    /// Sends a frame to one connection. `false` if it is gone.
    pub fn send(&self, id: ConnectionId, frame: &OutboundFrame) -> bool {
        match self.get(id) {
            Some(handle) => handle.send_frame(frame),
            None => false,
        }
    }
}

fn topics_in(inner: &Inner, id: ConnectionId) -> Vec<String> {
    inner
        .subscriptions
        .get(&id)
        .map(|set| set.iter().cloned().collect())
        .unwrap_or_default()
}

/// Drops `id` from `topic`'s subscriber set, and the topic once empty.
fn detach(topics: &mut HashMap<String, HashSet<ConnectionId>>, topic: &str, id: ConnectionId) {
    if let Some(subscribers) = topics.get_mut(topic) {
        subscribers.remove(&id);
        if subscribers.is_empty() {
            topics.remove(topic);
        }
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for `ConnectionRegistry`.
    //!
    //! Naming follows `test_{operation}_{scenario}`.

    use super::*;
    use switchyard_ratelimit::RateLimitConfig;

    fn registry(max_connections: usize) -> ConnectionRegistry {
        ConnectionRegistry::new(
            RegistryConfig {
                max_connections,
                outbound_queue_size: 16,
            },
            Arc::new(RateLimiter::default()),
        )
    }

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn topics(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    /// Asserts the forward and reverse indices agree exactly.
    fn assert_indices_consistent(reg: &ConnectionRegistry) {
        let inner = reg.inner.read();
        for (id, set) in &inner.subscriptions {
            assert!(!set.is_empty(), "empty forward entry for {id}");
            assert!(inner.connections.contains_key(id), "dangling forward entry {id}");
            for topic in set {
                assert!(inner.topics.get(topic).is_some_and(|s| s.contains(id)));
            }
        }
        for (topic, ids) in &inner.topics {
            assert!(!ids.is_empty(), "empty reverse entry for {topic}");
            for id in ids {
                assert!(inner.subscriptions.get(id).is_some_and(|s| s.contains(topic)));
            }
        }
    }

    // =====================================================================
    // admit()
    // =====================================================================

    #[tokio::test]
    async fn test_admit_assigns_unique_ids() {
        let reg = registry(10);
        let a = reg.admit(addr(1)).unwrap();
        let b = reg.admit(addr(2)).unwrap();
        assert_ne!(a.handle.id(), b.handle.id());
        assert_eq!(reg.len(), 2);
        assert!(reg.get(a.handle.id()).is_some());
    }

    #[tokio::test]
    async fn test_admit_at_capacity_is_refused() {
        let reg = registry(1);
        let _first = reg.admit(addr(1)).unwrap();
        let second = reg.admit(addr(2));
        assert!(matches!(second, Err(SessionError::AtCapacity(1))));
    }

    #[tokio::test]
    async fn test_admit_rate_limited_is_refused() {
        let limiter = Arc::new(RateLimiter::new(RateLimitConfig {
            max_per_minute: 2,
            ..RateLimitConfig::default()
        }));
        let reg = ConnectionRegistry::new(RegistryConfig::default(), limiter);
        assert!(reg.admit(addr(1)).is_ok());
        assert!(reg.admit(addr(2)).is_ok());
        let third = reg.admit(addr(3));
        assert!(matches!(third, Err(SessionError::RateLimited(_))));
        assert_eq!(reg.len(), 2);
    }

    // =====================================================================
    // remove()
    // =====================================================================

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let reg = registry(10);
        let a = reg.admit(addr(1)).unwrap();
        let id = a.handle.id();

        assert!(reg.remove(id).is_some());
        assert!(reg.remove(id).is_none());
        assert!(reg.get(id).is_none());
        assert!(a.handle.is_closed());
    }

    #[tokio::test]
    async fn test_remove_cancels_child_tokens() {
        let reg = registry(10);
        let a = reg.admit(addr(1)).unwrap();
        let child = a.handle.cancel_token().child_token();

        reg.remove(a.handle.id());
        assert!(child.is_cancelled());
    }

    #[tokio::test]
    async fn test_remove_clears_both_indices() {
        let reg = registry(10);
        let a = reg.admit(addr(1)).unwrap();
        let b = reg.admit(addr(2)).unwrap();
        reg.subscribe(a.handle.id(), &topics(&["news", "sport"])).unwrap();
        reg.subscribe(b.handle.id(), &topics(&["news"])).unwrap();

        reg.remove(a.handle.id());

        assert!(reg.topics_of(a.handle.id()).is_empty());
        assert_eq!(reg.subscribers("news").len(), 1);
        assert!(reg.subscribers("sport").is_empty());
        assert_eq!(reg.topic_count(), 1);
        assert_indices_consistent(&reg);
    }

    #[tokio::test]
    async fn test_send_after_remove_returns_false() {
        let reg = registry(10);
        let a = reg.admit(addr(1)).unwrap();
        let id = a.handle.id();
        assert!(reg.send(id, &OutboundFrame::new("x")));
        reg.remove(id);
        assert!(!reg.send(id, &OutboundFrame::new("x")));
        assert!(!a.handle.send_frame(&OutboundFrame::new("x")));
    }

    // =====================================================================
    // subscribe() / unsubscribe()
    // =====================================================================

    #[tokio::test]
    async fn test_subscribe_then_unsubscribe_leaves_remainder() {
        let reg = registry(10);
        let a = reg.admit(addr(1)).unwrap();
        let id = a.handle.id();

        let after_sub = reg.subscribe(id, &topics(&["a", "b"])).unwrap();
        assert_eq!(after_sub, topics(&["a", "b"]));

        let after_unsub = reg.unsubscribe(id, &topics(&["a"])).unwrap();
        assert_eq!(after_unsub, topics(&["b"]));
        assert_eq!(reg.topics_of(id), topics(&["b"]));
        assert!(reg.subscribers("a").is_empty());
        assert_indices_consistent(&reg);
    }

    #[tokio::test]
    async fn test_subscribe_ignores_blank_and_duplicate_topics() {
        let reg = registry(10);
        let a = reg.admit(addr(1)).unwrap();
        let id = a.handle.id();

        reg.subscribe(id, &topics(&["a", " ", "a"])).unwrap();
        reg.subscribe(id, &topics(&["a"])).unwrap();

        assert_eq!(reg.topics_of(id), topics(&["a"]));
        assert_eq!(reg.subscribers("a").len(), 1);
        assert_indices_consistent(&reg);
    }

    #[tokio::test]
    async fn test_unsubscribe_everything_drops_forward_entry() {
        let reg = registry(10);
        let a = reg.admit(addr(1)).unwrap();
        let id = a.handle.id();
        reg.subscribe(id, &topics(&["a"])).unwrap();

        let remaining = reg.unsubscribe(id, &topics(&["a", "never"])).unwrap();
        assert!(remaining.is_empty());
        assert_eq!(reg.topic_count(), 0);
        assert_indices_consistent(&reg);
    }

    #[tokio::test]
    async fn test_subscribe_unknown_connection_errors() {
        let reg = registry(10);
        let result = reg.subscribe(ConnectionId::new(99), &topics(&["a"]));
        assert!(matches!(result, Err(SessionError::NotFound(_))));
        assert_eq!(reg.topic_count(), 0);
    }

    // =====================================================================
    // snapshots
    // =====================================================================

    #[tokio::test]
    async fn test_infos_include_subscriptions_sorted_by_id() {
        let reg = registry(10);
        let a = reg.admit(addr(1)).unwrap();
        let b = reg.admit(addr(2)).unwrap();
        reg.subscribe(b.handle.id(), &topics(&["z", "m"])).unwrap();

        let infos = reg.infos();
        assert_eq!(infos.len(), 2);
        assert_eq!(infos[0].id, a.handle.id());
        assert_eq!(infos[1].subscriptions, topics(&["m", "z"]));
        assert_eq!(reg.info(b.handle.id()).unwrap().subscriptions.len(), 2);
    }
}
