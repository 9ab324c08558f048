//! Periodic background tasks: heartbeat sweep and rate-limit cleanup.
//!
//! Both run on their own timers, independent of each other and of
//! connection traffic, and stop when the server's shutdown token fires.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use switchyard_ratelimit::RateLimiter;
use switchyard_session::HeartbeatMonitor;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::hub::Hub;

/// Upper bound on the random delay added before the first cleanup.
const MAX_CLEANUP_JITTER: Duration = Duration::from_secs(1);

/// Spawns the heartbeat monitor and the rate-limit cleanup loop.
pub(crate) fn spawn(hub: &Arc<Hub>, shutdown: &CancellationToken) -> Vec<JoinHandle<()>> {
    let monitor = HeartbeatMonitor::new(Arc::clone(hub.registry()), hub.config().heartbeat_interval());
    let cleanup_interval = hub.config().rate_limit.cleanup_interval();

    vec![
        tokio::spawn(monitor.run(shutdown.clone())),
        tokio::spawn(cleanup_loop(
            Arc::clone(hub.limiter()),
            cleanup_interval,
            shutdown.clone(),
        )),
    ]
}

/// Drops idle rate-limit records every `interval`.
async fn cleanup_loop(limiter: Arc<RateLimiter>, interval: Duration, shutdown: CancellationToken) {
    let start = time::Instant::now() + interval + initial_jitter(interval);
    let mut ticker = time::interval_at(start, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let removed = limiter.cleanup();
                if removed > 0 {
                    tracing::debug!(removed, remaining = limiter.tracked_addresses(), "rate limit cleanup");
                }
            }
            () = shutdown.cancelled() => {
                tracing::debug!("rate limit cleanup stopped");
                return;
            }
        }
    }
}

/// A random delay in `0..min(interval / 10, 1 s)`, so servers started
/// together don't sweep in lockstep.
fn initial_jitter(interval: Duration) -> Duration {
    let max_ms = (interval / 10).min(MAX_CLEANUP_JITTER).as_millis() as u64;
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::rng().random_range(0..max_ms))
}
