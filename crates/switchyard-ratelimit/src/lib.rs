//! Sliding-window request limiter for Switchyard.
//!
//! Every client address gets a [`RateWindow`]: two ordered timestamp
//! sequences covering the last minute and the last hour. A request is
//! allowed while both sequences are below their ceilings.
//!
//! Entries older than their horizon are purged lazily whenever an address
//! is touched, and [`RateLimiter::cleanup`] sweeps the whole table on a
//! timer so that addresses which stopped sending eventually disappear.
//!
//! # Integration
//!
//! ```ignore
//! if !limiter.check(addr.ip()) {
//!     // admission: close the socket with a policy-violation code
//!     // per message: answer with an `error` frame instead of dispatching
//! }
//! ```
//!
//! The limiter reads time from `tokio::time::Instant`, so tests can drive
//! it with a paused clock.

use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, warn};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Ceilings and horizons for the limiter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RateLimitConfig {
    /// Requests allowed per address inside the short window.
    pub max_per_minute: usize,
    /// Requests allowed per address inside the long window.
    pub max_per_hour: usize,
    /// Period of the background [`RateLimiter::cleanup`] sweep.
    pub cleanup_interval_ms: u64,
    /// Length of the short window. 60 s unless overridden.
    pub minute_window_ms: u64,
    /// Length of the long window. 3600 s unless overridden.
    pub hour_window_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_per_minute: 100,
            max_per_hour: 1000,
            cleanup_interval_ms: 60_000,
            minute_window_ms: 60_000,
            hour_window_ms: 3_600_000,
        }
    }
}

impl RateLimitConfig {
    /// Fixes values that would make the limiter unusable.
    ///
    /// - zero ceilings and zero intervals fall back to the defaults
    /// - the long window is never shorter than the short one
    pub fn validated(mut self) -> Self {
        let defaults = Self::default();
        if self.max_per_minute == 0 {
            warn!("rate limit max_per_minute is zero, using default");
            self.max_per_minute = defaults.max_per_minute;
        }
        if self.max_per_hour == 0 {
            warn!("rate limit max_per_hour is zero, using default");
            self.max_per_hour = defaults.max_per_hour;
        }
        if self.cleanup_interval_ms == 0 {
            warn!("rate limit cleanup interval is zero, using default");
            self.cleanup_interval_ms = defaults.cleanup_interval_ms;
        }
        if self.minute_window_ms == 0 {
            self.minute_window_ms = defaults.minute_window_ms;
        }
        if self.hour_window_ms < self.minute_window_ms {
            warn!(
                hour_window_ms = self.hour_window_ms,
                minute_window_ms = self.minute_window_ms,
                "long rate window shorter than short window, raising it"
            );
            self.hour_window_ms = self.minute_window_ms;
        }
        self
    }

    pub fn minute_window(&self) -> Duration {
        Duration::from_millis(self.minute_window_ms)
    }

    pub fn hour_window(&self) -> Duration {
        Duration::from_millis(self.hour_window_ms)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup_interval_ms)
    }
}

// ---------------------------------------------------------------------------
// Per-address window
// ---------------------------------------------------------------------------

/// Request timestamps for one address, oldest first.
#[derive(Debug, Default)]
struct RateWindow {
    minute: VecDeque<Instant>,
    hour: VecDeque<Instant>,
}

impl RateWindow {
    fn purge(&mut self, now: Instant, minute: Duration, hour: Duration) {
        purge_older_than(&mut self.minute, now, minute);
        purge_older_than(&mut self.hour, now, hour);
    }

    fn within(&self, config: &RateLimitConfig) -> bool {
        self.minute.len() < config.max_per_minute
            && self.hour.len() < config.max_per_hour
    }

    fn push(&mut self, now: Instant) {
        self.minute.push_back(now);
        self.hour.push_back(now);
    }
}

fn purge_older_than(seq: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    let Some(horizon) = now.checked_sub(window) else {
        return;
    };
    while seq.front().is_some_and(|t| *t <= horizon) {
        seq.pop_front();
    }
}

/// Current request counts for one address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowUsage {
    pub per_minute: usize,
    pub per_hour: usize,
}

// ---------------------------------------------------------------------------
// Limiter
// ---------------------------------------------------------------------------

/// Per-address sliding-window rate limiter.
///
/// Internally synchronized; share it behind an `Arc`. The lock is never
/// held across an `.await`.
pub struct RateLimiter {
    config: RateLimitConfig,
    windows: Mutex<HashMap<IpAddr, RateWindow>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config: config.validated(),
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Returns `true` if another request from `addr` fits in both windows.
    ///
    /// An address with no record is always allowed.
    pub fn allow(&self, addr: IpAddr) -> bool {
        let now = Instant::now();
        let mut windows = self.windows.lock();
        let Some(window) = windows.get_mut(&addr) else {
            return true;
        };
        window.purge(now, self.config.minute_window(), self.config.hour_window());
        window.within(&self.config)
    }

    /// Records one request from `addr`.
    pub fn record_request(&self, addr: IpAddr) {
        let now = Instant::now();
        let mut windows = self.windows.lock();
        let window = windows.entry(addr).or_default();
        window.purge(now, self.config.minute_window(), self.config.hour_window());
        window.push(now);
    }

    /// Checks and records in one critical section.
    ///
    /// Rejected requests are not recorded, so a client that backs off
    /// regains capacity as soon as its oldest entries age out.
    pub fn check(&self, addr: IpAddr) -> bool {
        let now = Instant::now();
        let mut windows = self.windows.lock();
        let window = windows.entry(addr).or_default();
        window.purge(now, self.config.minute_window(), self.config.hour_window());
        if window.within(&self.config) {
            window.push(now);
            true
        } else {
            debug!(%addr, per_minute = window.minute.len(), "request rate limited");
            false
        }
    }

    /// Purges every window and drops addresses with no requests left in
    /// the long window. Returns how many addresses were dropped.
    pub fn cleanup(&self) -> usize {
        let now = Instant::now();
        let (minute, hour) = (self.config.minute_window(), self.config.hour_window());
        let mut windows = self.windows.lock();
        let before = windows.len();
        windows.retain(|_, window| {
            window.purge(now, minute, hour);
            !window.hour.is_empty()
        });
        let removed = before - windows.len();
        if removed > 0 {
            debug!(removed, remaining = windows.len(), "rate limit table cleaned");
        }
        removed
    }

    /// Number of addresses currently tracked.
    pub fn tracked_addresses(&self) -> usize {
        self.windows.lock().len()
    }

    /// Request counts for `addr`, or `None` if it is not tracked.
    pub fn usage(&self, addr: IpAddr) -> Option<WindowUsage> {
        let now = Instant::now();
        let mut windows = self.windows.lock();
        let window = windows.get_mut(&addr)?;
        window.purge(now, self.config.minute_window(), self.config.hour_window());
        Some(WindowUsage {
            per_minute: window.minute.len(),
            per_hour: window.hour.len(),
        })
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}
