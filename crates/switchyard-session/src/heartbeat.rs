//! Heartbeat sweep: ping live connections, evict silent ones.
//!
//! Liveness is a two-phase flag on each [`ConnectionHandle`]:
//!
//! ```text
//! sweep N:   flag set?  yes → clear it, queue ping
//! (client answers the ping or sends anything → flag set again)
//! sweep N+1: flag set?  no  → close (1001) and remove
//! ```
//!
//! A client therefore has one full interval to answer; there is no idle
//! timeout beyond that.

use std::sync::Arc;
use std::time::Duration;

use switchyard_transport::CloseReason;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::{ConnectionId, ConnectionRegistry};

/// What one sweep did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeartbeatReport {
    /// Connections that were alive and got a new ping.
    pub pinged: usize,
    /// Connections closed for not answering the previous ping.
    pub evicted: Vec<ConnectionId>,
}

/// Periodic liveness checker for a registry.
pub struct HeartbeatMonitor {
    registry: Arc<ConnectionRegistry>,
    interval: Duration,
}

impl HeartbeatMonitor {
    pub fn new(registry: Arc<ConnectionRegistry>, interval: Duration) -> Self {
        Self { registry, interval }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Runs one sweep over every live connection.
    pub fn sweep(&self) -> HeartbeatReport {
        let mut report = HeartbeatReport::default();

        for handle in self.registry.list_all() {
            if handle.check_alive() {
                // Flag is now cleared; the pong sets it again.
                if handle.ping() {
                    report.pinged += 1;
                }
                continue;
            }

            if let Some(evicted) = self.registry.evict_unresponsive(handle.id()) {
                evicted.close(CloseReason::GoingAway("heartbeat timeout".into()));
                tracing::info!(conn_id = %evicted.id(), "evicted unresponsive connection");
                report.evicted.push(evicted.id());
            }
        }

        if !report.evicted.is_empty() || report.pinged > 0 {
            tracing::debug!(pinged = report.pinged, evicted = report.evicted.len(), "heartbeat sweep");
        }
        report
    }

    /// Sweeps every `interval` until `cancel` fires.
    ///
    /// The first sweep happens one interval after start, so brand-new
    /// connections are never pinged immediately.
    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = time::interval_at(time::Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep();
                }
                () = cancel.cancelled() => {
                    tracing::debug!("heartbeat monitor stopped");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use super::*;
    use crate::{Outbound, RegistryConfig};
    use switchyard_ratelimit::RateLimiter;

    fn registry() -> Arc<ConnectionRegistry> {
        Arc::new(ConnectionRegistry::new(
            RegistryConfig::default(),
            Arc::new(RateLimiter::default()),
        ))
    }

    fn addr() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 9000))
    }

    #[tokio::test]
    async fn test_sweep_pings_alive_connections() {
        let reg = registry();
        let mut a = reg.admit(addr()).unwrap();
        let monitor = HeartbeatMonitor::new(Arc::clone(&reg), Duration::from_secs(30));

        let report = monitor.sweep();

        assert_eq!(report.pinged, 1);
        assert!(report.evicted.is_empty());
        assert!(!a.handle.is_alive(), "flag cleared until the pong arrives");
        assert_eq!(a.outbound.try_recv().unwrap(), Outbound::Ping);
    }

    #[tokio::test]
    async fn test_two_missed_sweeps_evict() {
        let reg = registry();
        let mut a = reg.admit(addr()).unwrap();
        let id = a.handle.id();
        let monitor = HeartbeatMonitor::new(Arc::clone(&reg), Duration::from_secs(30));

        monitor.sweep();
        let report = monitor.sweep();

        assert_eq!(report.evicted, vec![id]);
        assert!(reg.get(id).is_none());
        assert!(a.handle.is_closed());
        assert_eq!(a.outbound.try_recv().unwrap(), Outbound::Ping);
        assert!(matches!(
            a.outbound.try_recv().unwrap(),
            Outbound::Close(CloseReason::GoingAway(_))
        ));
    }

    #[tokio::test]
    async fn test_pong_between_sweeps_keeps_connection() {
        let reg = registry();
        let a = reg.admit(addr()).unwrap();
        let monitor = HeartbeatMonitor::new(Arc::clone(&reg), Duration::from_secs(30));

        for _ in 0..5 {
            monitor.sweep();
            a.handle.mark_alive();
        }

        assert!(reg.get(a.handle.id()).is_some());
    }

    #[tokio::test]
    async fn test_evicted_connection_subscriptions_are_cleared() {
        let reg = registry();
        let a = reg.admit(addr()).unwrap();
        reg.subscribe(a.handle.id(), &["news".to_string()]).unwrap();
        let monitor = HeartbeatMonitor::new(Arc::clone(&reg), Duration::from_secs(30));

        monitor.sweep();
        monitor.sweep();

        assert!(reg.subscribers("news").is_empty());
        assert_eq!(reg.topic_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_evicts_after_two_intervals() {
        let reg = registry();
        let a = reg.admit(addr()).unwrap();
        let cancel = CancellationToken::new();
        let monitor = HeartbeatMonitor::new(Arc::clone(&reg), Duration::from_secs(30));
        let task = tokio::spawn(monitor.run(cancel.clone()));

        time::sleep(Duration::from_secs(31)).await;
        assert!(reg.get(a.handle.id()).is_some(), "first sweep only pings");

        time::sleep(Duration::from_secs(30)).await;
        assert!(reg.get(a.handle.id()).is_none(), "second sweep evicts");

        cancel.cancel();
        task.await.unwrap();
    }
}
