//! Integration tests for the sliding-window rate limiter.
//!
//! Uses `tokio::time::pause()` (via `start_paused`) so windows can be
//! aged deterministically with `tokio::time::advance`.

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use switchyard_ratelimit::{RateLimitConfig, RateLimiter, WindowUsage};

// =========================================================================
// Helpers
// =========================================================================

fn ip(last: u8) -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(10, 0, 0, last))
}

fn limiter(per_minute: usize, per_hour: usize) -> RateLimiter {
    RateLimiter::new(RateLimitConfig {
        max_per_minute: per_minute,
        max_per_hour: per_hour,
        ..RateLimitConfig::default()
    })
}

// =========================================================================
// Config
// =========================================================================

#[test]
fn test_default_config() {
    let cfg = RateLimitConfig::default();
    assert_eq!(cfg.max_per_minute, 100);
    assert_eq!(cfg.max_per_hour, 1000);
    assert_eq!(cfg.cleanup_interval(), Duration::from_secs(60));
    assert_eq!(cfg.minute_window(), Duration::from_secs(60));
    assert_eq!(cfg.hour_window(), Duration::from_secs(3600));
}

#[test]
fn test_config_deserializes_camel_case_with_defaults() {
    let cfg: RateLimitConfig =
        serde_json::from_str(r#"{"maxPerMinute": 5}"#).unwrap();
    assert_eq!(cfg.max_per_minute, 5);
    assert_eq!(cfg.max_per_hour, 1000);
}

#[test]
fn test_validated_fixes_zero_values() {
    let cfg = RateLimitConfig {
        cleanup_interval_ms: 0,
        minute_window_ms: 0,
        hour_window_ms: 10,
        ..RateLimitConfig::default()
    }
    .validated();
    assert_eq!(cfg.cleanup_interval_ms, 60_000);
    assert_eq!(cfg.minute_window_ms, 60_000);
    assert_eq!(cfg.hour_window_ms, 60_000);
}

#[tokio::test(start_paused = true)]
async fn test_zero_ceilings_fall_back_to_defaults() {
    let cfg = RateLimitConfig {
        max_per_minute: 0,
        max_per_hour: 0,
        ..RateLimitConfig::default()
    }
    .validated();
    assert_eq!(cfg.max_per_minute, 100);
    assert_eq!(cfg.max_per_hour, 1000);

    // The limiter validates its own config.
    let limiter = RateLimiter::new(RateLimitConfig {
        max_per_minute: 0,
        ..RateLimitConfig::default()
    });
    assert!(limiter.check(ip(1)));
}

// =========================================================================
// allow / record / check
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_unknown_address_is_allowed() {
    let l = limiter(1, 1);
    assert!(l.allow(ip(1)));
    assert_eq!(l.tracked_addresses(), 0, "allow must not create records");
}

#[tokio::test(start_paused = true)]
async fn test_burst_allows_exactly_max_per_minute() {
    let l = limiter(100, 1000);
    let results: Vec<bool> = (0..150).map(|_| l.check(ip(1))).collect();

    assert_eq!(results.iter().filter(|ok| **ok).count(), 100);
    // All allowed requests come first, in arrival order.
    assert!(results[..100].iter().all(|ok| *ok));
    assert!(results[100..].iter().all(|ok| !*ok));
}

#[tokio::test(start_paused = true)]
async fn test_allow_then_record_matches_check() {
    let l = limiter(3, 1000);
    let mut allowed = 0;
    for _ in 0..5 {
        if l.allow(ip(1)) {
            l.record_request(ip(1));
            allowed += 1;
        }
    }
    assert_eq!(allowed, 3);
}

#[tokio::test(start_paused = true)]
async fn test_addresses_are_independent() {
    let l = limiter(2, 1000);
    assert!(l.check(ip(1)));
    assert!(l.check(ip(1)));
    assert!(!l.check(ip(1)));
    assert!(l.check(ip(2)), "a different address has its own window");
}

#[tokio::test(start_paused = true)]
async fn test_minute_window_slides() {
    let l = limiter(2, 1000);
    assert!(l.check(ip(1)));
    tokio::time::advance(Duration::from_secs(30)).await;
    assert!(l.check(ip(1)));
    assert!(!l.check(ip(1)));

    // The first request ages out after 60 s; the second is still inside.
    tokio::time::advance(Duration::from_secs(31)).await;
    assert!(l.check(ip(1)));
    assert!(!l.check(ip(1)));
}

#[tokio::test(start_paused = true)]
async fn test_hour_ceiling_applies_across_minutes() {
    let l = limiter(10, 15);
    for _ in 0..10 {
        assert!(l.check(ip(1)));
    }
    tokio::time::advance(Duration::from_secs(61)).await;
    for _ in 0..5 {
        assert!(l.check(ip(1)));
    }
    assert!(!l.check(ip(1)), "hour ceiling reached");
    assert_eq!(
        l.usage(ip(1)),
        Some(WindowUsage {
            per_minute: 5,
            per_hour: 15
        })
    );
}

// =========================================================================
// cleanup
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_cleanup_keeps_addresses_with_recent_requests() {
    let l = limiter(10, 100);
    l.record_request(ip(1));
    tokio::time::advance(Duration::from_secs(120)).await;

    // Minute window is empty, hour window is not.
    assert_eq!(l.cleanup(), 0);
    assert_eq!(l.tracked_addresses(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cleanup_drops_idle_addresses() {
    let l = limiter(10, 100);
    l.record_request(ip(1));
    l.record_request(ip(2));
    tokio::time::advance(Duration::from_secs(1800)).await;
    l.record_request(ip(2));
    tokio::time::advance(Duration::from_secs(1801)).await;

    assert_eq!(l.cleanup(), 1);
    assert_eq!(l.tracked_addresses(), 1);
    assert!(l.usage(ip(1)).is_none());
    assert!(l.usage(ip(2)).is_some());
}
