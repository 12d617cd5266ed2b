//! C4: the pool of configured upstream resolvers, tracking health with an
//! exponential moving average of response latency and a consecutive-failure
//! counter, exactly the scheme the donor server used for its own upstream
//! fan-out — generalized here to a single ordered pool rather than a
//! parallel/fallback split.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::events::{EventBus, ServerEvent};

const UNHEALTHY_AFTER_FAILURES: u64 = 3;
const MAX_COOLDOWN_SECS: u64 = 60;

#[derive(Debug)]
struct UpstreamHealth {
    consecutive_failures: AtomicU64,
    is_healthy: AtomicBool,
    last_failure: Mutex<Option<Instant>>,
    avg_response_time_ms: Mutex<Option<f64>>,
    total_requests: AtomicU64,
    total_successes: AtomicU64,
}

impl UpstreamHealth {
    fn new() -> Self {
        UpstreamHealth {
            consecutive_failures: AtomicU64::new(0),
            is_healthy: AtomicBool::new(true),
            last_failure: Mutex::new(None),
            avg_response_time_ms: Mutex::new(None),
            total_requests: AtomicU64::new(0),
            total_successes: AtomicU64::new(0),
        }
    }

    /// Returns `true` if this success just flipped the upstream from failed
    /// back to healthy, so the caller can publish `server.upstream_recovered`
    /// on the edge rather than on every success.
    fn record_success(&self, elapsed: Duration) -> bool {
        let recovered = !self.is_healthy.swap(true, Ordering::Relaxed);
        self.consecutive_failures.store(0, Ordering::Relaxed);
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.total_successes.fetch_add(1, Ordering::Relaxed);

        let mut avg = self.avg_response_time_ms.lock();
        let sample = elapsed.as_secs_f64() * 1000.0;
        *avg = Some(match *avg {
            Some(current) => current * 0.8 + sample * 0.2,
            None => sample,
        });
        recovered
    }

    /// Returns `true` if this failure just crossed the unhealthy threshold,
    /// so the caller can publish `server.upstream_failed` on the edge rather
    /// than on every failure while already down.
    fn record_failure(&self, now: Instant) -> bool {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        *self.last_failure.lock() = Some(now);
        if failures >= UNHEALTHY_AFTER_FAILURES {
            !self.is_healthy.swap(false, Ordering::Relaxed)
        } else {
            false
        }
    }

    fn is_usable(&self, now: Instant) -> bool {
        if self.is_healthy.load(Ordering::Relaxed) {
            return true;
        }
        let last_failure = *self.last_failure.lock();
        match last_failure {
            Some(last) => {
                let failures = self.consecutive_failures.load(Ordering::Relaxed);
                let cooldown = Duration::from_secs(2u64.saturating_pow(failures as u32).min(MAX_COOLDOWN_SECS));
                now.saturating_duration_since(last) >= cooldown
            }
            None => true,
        }
    }

    fn snapshot(&self) -> UpstreamStats {
        let total = self.total_requests.load(Ordering::Relaxed);
        let successes = self.total_successes.load(Ordering::Relaxed);
        UpstreamStats {
            total_requests: total,
            total_successes: successes,
            consecutive_failures: self.consecutive_failures.load(Ordering::Relaxed),
            is_healthy: self.is_healthy.load(Ordering::Relaxed),
            avg_response_time_ms: *self.avg_response_time_ms.lock(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct UpstreamStats {
    pub total_requests: u64,
    pub total_successes: u64,
    pub consecutive_failures: u64,
    pub is_healthy: bool,
    pub avg_response_time_ms: Option<f64>,
}

struct Entry {
    addr: SocketAddr,
    health: UpstreamHealth,
}

/// Ordered pool of upstream resolvers. `select_order` returns addresses to
/// try, healthy servers first in configuration order, then servers whose
/// cooldown has elapsed, so a caller can walk the list for failover (C5).
pub struct UpstreamPool {
    entries: Vec<Entry>,
    events: Arc<EventBus>,
}

impl UpstreamPool {
    pub fn new(addrs: Vec<SocketAddr>) -> Self {
        Self::with_events(addrs, Arc::new(EventBus::new()))
    }

    /// Builds a pool that publishes `server.upstream_failed` /
    /// `server.upstream_recovered` (§4.9) on `events` as upstreams cross the
    /// health threshold.
    pub fn with_events(addrs: Vec<SocketAddr>, events: Arc<EventBus>) -> Self {
        UpstreamPool {
            entries: addrs
                .into_iter()
                .map(|addr| Entry {
                    addr,
                    health: UpstreamHealth::new(),
                })
                .collect(),
            events,
        }
    }

    /// Per §4.4: healthy upstreams first, ordered by the lowest latency EMA
    /// (ties, including upstreams with no samples yet, keep declared order
    /// via a stable sort), then cooled-down recovering upstreams in
    /// declared order as a last resort.
    pub fn select_order(&self, now: Instant) -> Vec<SocketAddr> {
        let mut healthy: Vec<&Entry> = Vec::new();
        let mut recovering = Vec::new();
        for entry in &self.entries {
            if entry.health.is_healthy.load(Ordering::Relaxed) {
                healthy.push(entry);
            } else if entry.health.is_usable(now) {
                recovering.push(entry.addr);
            }
        }
        healthy.sort_by(|a, b| {
            let a_latency = a.health.avg_response_time_ms.lock().unwrap_or(0.0);
            let b_latency = b.health.avg_response_time_ms.lock().unwrap_or(0.0);
            a_latency.partial_cmp(&b_latency).unwrap_or(std::cmp::Ordering::Equal)
        });
        let mut order: Vec<SocketAddr> = healthy.into_iter().map(|e| e.addr).collect();
        order.extend(recovering);
        order
    }

    pub fn record_success(&self, addr: SocketAddr, elapsed: Duration) {
        if let Some(entry) = self.entries.iter().find(|e| e.addr == addr) {
            if entry.health.record_success(elapsed) {
                self.events.publish_server(ServerEvent::UpstreamRecovered { addr: addr.to_string() });
            }
        }
    }

    pub fn record_failure(&self, addr: SocketAddr, now: Instant) {
        if let Some(entry) = self.entries.iter().find(|e| e.addr == addr) {
            if entry.health.record_failure(now) {
                self.events.publish_server(ServerEvent::UpstreamDown { addr: addr.to_string() });
            }
        }
    }

    pub fn stats(&self) -> Vec<(SocketAddr, UpstreamStats)> {
        self.entries
            .iter()
            .map(|e| (e.addr, e.health.snapshot()))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn addr(octet: u8) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(1, 1, 1, octet)), 53)
    }

    #[test]
    fn healthy_servers_with_no_samples_keep_configured_order() {
        let pool = UpstreamPool::new(vec![addr(1), addr(2)]);
        let now = Instant::now();
        assert_eq!(pool.select_order(now), vec![addr(1), addr(2)]);
    }

    #[test]
    fn healthy_servers_are_ordered_by_latency_ema() {
        let pool = UpstreamPool::new(vec![addr(1), addr(2)]);
        let now = Instant::now();
        pool.record_success(addr(1), Duration::from_millis(200));
        pool.record_success(addr(2), Duration::from_millis(20));
        assert_eq!(pool.select_order(now), vec![addr(2), addr(1)]);
    }

    #[test]
    fn three_failures_marks_unhealthy_and_excludes_until_cooldown() {
        let pool = UpstreamPool::new(vec![addr(1), addr(2)]);
        let now = Instant::now();
        pool.record_failure(addr(1), now);
        pool.record_failure(addr(1), now);
        pool.record_failure(addr(1), now);

        let order = pool.select_order(now);
        assert_eq!(order, vec![addr(2)]);

        let later = now + Duration::from_secs(10);
        let order = pool.select_order(later);
        assert_eq!(order, vec![addr(2), addr(1)]);
    }

    #[test]
    fn success_resets_failure_count() {
        let pool = UpstreamPool::new(vec![addr(1)]);
        let now = Instant::now();
        pool.record_failure(addr(1), now);
        pool.record_failure(addr(1), now);
        pool.record_success(addr(1), Duration::from_millis(20));
        let stats = pool.stats();
        assert_eq!(stats[0].1.consecutive_failures, 0);
        assert!(stats[0].1.is_healthy);
    }

    #[test]
    fn crossing_failure_threshold_publishes_upstream_down_once() {
        let events = Arc::new(EventBus::new());
        let pool = UpstreamPool::with_events(vec![addr(1)], events.clone());
        let mut rx = events.subscribe_server();
        let now = Instant::now();

        pool.record_failure(addr(1), now);
        pool.record_failure(addr(1), now);
        assert!(rx.try_recv().is_err(), "should not publish before crossing the threshold");

        pool.record_failure(addr(1), now);
        match rx.try_recv().unwrap() {
            ServerEvent::UpstreamDown { addr: a } => assert_eq!(a, addr(1).to_string()),
            other => panic!("expected UpstreamDown, got {other:?}"),
        }

        pool.record_failure(addr(1), now);
        assert!(rx.try_recv().is_err(), "should not republish while already unhealthy");
    }

    #[test]
    fn recovering_from_unhealthy_publishes_upstream_recovered_once() {
        let events = Arc::new(EventBus::new());
        let pool = UpstreamPool::with_events(vec![addr(1)], events.clone());
        let now = Instant::now();
        pool.record_failure(addr(1), now);
        pool.record_failure(addr(1), now);
        pool.record_failure(addr(1), now);

        let mut rx = events.subscribe_server();
        pool.record_success(addr(1), Duration::from_millis(10));
        match rx.try_recv().unwrap() {
            ServerEvent::UpstreamRecovered { addr: a } => assert_eq!(a, addr(1).to_string()),
            other => panic!("expected UpstreamRecovered, got {other:?}"),
        }

        pool.record_success(addr(1), Duration::from_millis(10));
        assert!(rx.try_recv().is_err(), "should not republish while already healthy");
    }
}
