//! Top-level wiring: builds the C2-C9 components from a [`Config`] snapshot
//! and drives the UDP/TCP frontends and HTTP status surface side by side,
//! with the graceful shutdown sequence from §5. Grounded on the donor's
//! `Server`/`run_udp_server`/`run_tcp_server` trio — the broadcast-based
//! shutdown signal and per-frontend task spawn survive, but the DNSSEC,
//! zone, cluster and buffer-pool wiring that used to live here does not.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{broadcast, Semaphore};
use tracing::{info, warn};

use crate::acl::Acl;
use crate::cache::Cache;
use crate::config::Config;
use crate::error::{DnsError, Result};
use crate::events::{rcode_label, CacheEvent, EventBus, QueryEvent, ServerEvent};
use crate::forwarder::Forwarder;
use crate::http_server::HttpServer;
use crate::metrics::Metrics;
use crate::protocol::{tcp, udp};
use crate::rate_limiter::RateLimiter;
use crate::resolver::Resolver;
use crate::upstream::UpstreamPool;

pub struct Server {
    config: Config,
    resolver: Arc<Resolver>,
    cache: Arc<Cache>,
    metrics: Arc<Metrics>,
}

impl Server {
    pub fn new(config: Config) -> Result<Self> {
        let cache = Arc::new(Cache::new(
            config.cache.max_size_bytes,
            config.cache.min_ttl,
            config.cache.max_ttl,
            config.cache.negative_ttl,
        ));
        let acl: Arc<Acl> = Arc::new(config.security.to_acl());
        let rate_limiter = Arc::new(RateLimiter::new(config.security.to_rate_limit_config()));
        let events = Arc::new(EventBus::new());
        let upstream_addrs = config.upstreams.iter().map(|u| u.socket_addr()).collect();
        let pool = UpstreamPool::with_events(upstream_addrs, events.clone());
        let forwarder = Arc::new(Forwarder::new(config.forwarder.to_runtime(), pool));
        let resolver = Arc::new(Resolver::new(
            cache.clone(),
            acl,
            rate_limiter,
            forwarder,
            events,
        ));
        let metrics = Arc::new(Metrics::new().map_err(|e| DnsError::Config(e.to_string()))?);

        Ok(Server { config, resolver, cache, metrics })
    }

    pub fn resolver(&self) -> &Arc<Resolver> {
        &self.resolver
    }

    /// Runs every frontend until `shutdown` resolves, then drains in-flight
    /// work for up to `server.shutdown_grace_secs` before returning.
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> Result<()> {
        let server_config = self.config.server.clone();
        let (shutdown_tx, _) = broadcast::channel(1);
        let semaphore = Arc::new(Semaphore::new(server_config.max_concurrent_requests));

        if let Some(path) = &self.config.cache.persistence_path {
            match self.cache.load_from_disk(path).await {
                Ok(loaded) => info!(path = %path.display(), loaded, "restored cache from disk"),
                Err(e) => warn!(path = %path.display(), error = %e, "failed to restore cache from disk"),
            }
        }

        self.resolver
            .events()
            .publish_server(ServerEvent::Started { bind_addr: server_config.bind_addr().to_string() });

        let security = &self.config.security;
        let udp_task = tokio::spawn(udp::run(
            server_config.bind_addr(),
            self.resolver.clone(),
            semaphore.clone(),
            self.metrics.clone(),
            security.max_query_length,
            security.block_malformed_requests,
            shutdown_tx.subscribe(),
        ));
        let tcp_task = tokio::spawn(tcp::run(
            server_config.bind_addr(),
            self.resolver.clone(),
            semaphore.clone(),
            self.metrics.clone(),
            server_config.connection_timeout(),
            security.max_query_length,
            security.block_malformed_requests,
            shutdown_tx.subscribe(),
        ));
        let http_task = tokio::spawn(
            HttpServer::new(server_config.http_bind_addr(), self.metrics.clone(), self.cache.clone()).run(),
        );

        spawn_health_sampler(self.resolver.clone(), self.metrics.clone());
        spawn_metrics_bridge(self.resolver.clone(), self.metrics.clone());
        spawn_maintenance_sweep(self.resolver.clone());

        shutdown.await;
        info!("shutdown requested, draining in-flight queries");
        let _ = shutdown_tx.send(());
        http_task.abort();

        let grace = server_config.shutdown_grace();
        let drain = async {
            let _ = udp_task.await;
            let _ = tcp_task.await;
        };
        if tokio::time::timeout(grace, drain).await.is_err() {
            warn!(grace_secs = grace.as_secs(), "shutdown grace period elapsed with tasks still running");
        }

        if let Some(path) = &self.config.cache.persistence_path {
            match self.cache.save_to_disk(path).await {
                Ok(saved) => info!(path = %path.display(), saved, "persisted cache to disk"),
                Err(e) => warn!(path = %path.display(), error = %e, "failed to persist cache to disk"),
            }
        }

        self.resolver.events().publish_server(ServerEvent::Stopped);
        Ok(())
    }
}

/// Drives the Prometheus counters/histograms that have no natural polling
/// point of their own by subscribing to the event bus: every query and cache
/// event the resolver already publishes for observability also feeds a
/// metric here, so nothing needs a second code path just to be counted.
fn spawn_metrics_bridge(resolver: Arc<Resolver>, metrics: Arc<Metrics>) {
    let mut queries = resolver.events().subscribe_queries();
    let query_metrics = metrics.clone();
    tokio::spawn(async move {
        loop {
            match queries.recv().await {
                Ok(QueryEvent::Answered { rcode, latency, .. }) => {
                    query_metrics.record_query_duration(rcode_label(rcode), latency.as_secs_f64());
                }
                Ok(QueryEvent::Rejected { reason, .. }) => {
                    query_metrics.record_rejection(reason);
                }
                Ok(QueryEvent::Received { .. }) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let mut cache_events = resolver.events().subscribe_cache();
    let cache_metrics = metrics.clone();
    tokio::spawn(async move {
        loop {
            match cache_events.recv().await {
                Ok(CacheEvent::Hit { negative, .. }) => cache_metrics.record_cache_hit(negative),
                Ok(CacheEvent::Miss { .. }) => cache_metrics.record_cache_miss(),
                Ok(CacheEvent::Evicted { .. }) => cache_metrics.record_cache_eviction("lru"),
                Ok(CacheEvent::Inserted { .. }) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(5));
        loop {
            interval.tick().await;
            metrics.set_events_dropped(resolver.events().dropped_count());
        }
    });
}

/// Sweeps expired cache entries and idle rate-limit buckets on a fixed
/// interval. Lookups and `allow()` already evict lazily on the hot path, but
/// a name that's never queried again would otherwise sit in the cache or the
/// bucket map forever; this bounds that to the sweep interval instead.
fn spawn_maintenance_sweep(resolver: Arc<Resolver>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
        loop {
            interval.tick().await;
            let now = std::time::Instant::now();
            let flushed = resolver.cache().flush(now);
            let evicted = resolver.rate_limiter().evict_idle(now);
            if flushed > 0 || evicted > 0 {
                tracing::debug!(flushed, evicted, "maintenance sweep");
            }
        }
    });
}

/// Periodically mirrors upstream health and cache size into the Prometheus
/// registry, since those gauges are only ever pushed, never pulled on
/// scrape for anything but cache size (see `http_server::metrics_handler`).
fn spawn_health_sampler(resolver: Arc<Resolver>, metrics: Arc<Metrics>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(5));
        loop {
            interval.tick().await;
            for (addr, stats) in resolver.forwarder().pool().stats() {
                metrics.set_upstream_stats(
                    &addr.to_string(),
                    stats.is_healthy,
                    stats.avg_response_time_ms.unwrap_or(0.0),
                    stats.consecutive_failures as u32,
                );
            }
        }
    });
}
