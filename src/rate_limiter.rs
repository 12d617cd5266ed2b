//! C3 (rate-limit half): a continuously-refilling float token bucket per
//! client IP, matching the literal bucket/refill model of the data model
//! rather than a fixed-window counter — a client that sends one query every
//! two seconds never gets penalized for bursting within a single window.

use std::net::IpAddr;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::RwLock;
use rustc_hash::FxBuildHasher;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub enabled: bool,
    /// Bucket capacity per IP (also the maximum burst).
    pub capacity: f64,
    /// Idle buckets are evicted after this much time without a refill.
    pub idle_eviction: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        RateLimitConfig {
            enabled: false,
            capacity: 100.0,
            idle_eviction: Duration::from_secs(300),
        }
    }
}

#[derive(Debug)]
struct ClientBucket {
    tokens: f64,
    last_refill: Instant,
}

/// Per-IP token bucket rate limiter. `capacity` tokens refill over 60
/// seconds (`capacity / 60.0` tokens/sec), so "capacity" reads naturally as
/// "queries per minute" while still smoothing bursts continuously.
pub struct RateLimiter {
    config: RwLock<RateLimitConfig>,
    buckets: DashMap<IpAddr, ClientBucket, FxBuildHasher>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        RateLimiter {
            config: RwLock::new(config),
            buckets: DashMap::default(),
        }
    }

    /// Swaps in a new rate-limit config on a reload. Existing buckets keep
    /// their accumulated tokens; only the capacity/refill rate and the
    /// enabled flag change going forward.
    pub fn update_config(&self, config: RateLimitConfig) {
        *self.config.write() = config;
    }

    /// Returns true if a query from `ip` at `now` should be allowed, and
    /// consumes one token from its bucket if so.
    pub fn allow(&self, ip: IpAddr, now: Instant) -> bool {
        let config = self.config.read().clone();
        if !config.enabled {
            return true;
        }
        let refill_rate = config.capacity / 60.0;

        let mut bucket = self.buckets.entry(ip).or_insert_with(|| ClientBucket {
            tokens: config.capacity,
            last_refill: now,
        });

        let elapsed = now.saturating_duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * refill_rate).min(config.capacity);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            debug!(%ip, "rate limit exceeded");
            false
        }
    }

    /// Evicts buckets that have not been touched within the idle window,
    /// bounding memory use under a sustained spread of distinct source IPs.
    pub fn evict_idle(&self, now: Instant) -> usize {
        let idle: Vec<IpAddr> = self
            .buckets
            .iter()
            .filter(|entry| now.saturating_duration_since(entry.last_refill) > self.config.idle_eviction)
            .map(|entry| *entry.key())
            .collect();
        let count = idle.len();
        for ip in idle {
            self.buckets.remove(&ip);
        }
        count
    }

    pub fn tracked_clients(&self) -> usize {
        self.buckets.len()
    }
}
