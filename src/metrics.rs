//! C12: observability. A Prometheus `Registry` with the counters/gauges/
//! histograms §10.3 calls for, grounded on the donor's `DnsMetrics` — the
//! metric families and the `opts!`/`histogram_opts!` registration style
//! survive, but the per-protocol/blocking/cluster label dimensions that had
//! no counterpart in this crate's architecture are gone.

use prometheus::{
    CounterVec, Encoder, Gauge, GaugeVec, HistogramVec, Registry, TextEncoder, histogram_opts,
    opts,
};

/// Prometheus metrics registry and collectors for the resolver.
pub struct Metrics {
    registry: Registry,

    cache_hits: CounterVec,
    cache_misses: CounterVec,
    cache_evictions: CounterVec,
    cache_size_bytes: Gauge,

    query_duration: HistogramVec,
    rejections_total: CounterVec,

    upstream_health: GaugeVec,
    upstream_latency_ms: GaugeVec,
    upstream_consecutive_failures: GaugeVec,

    active_connections: GaugeVec,

    events_dropped: Gauge,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let cache_hits = CounterVec::new(
            opts!("wayfind_cache_hits_total", "Total cache lookups that hit"),
            &["kind"],
        )?;
        let cache_misses = CounterVec::new(
            opts!("wayfind_cache_misses_total", "Total cache lookups that missed"),
            &[],
        )?;
        let cache_evictions = CounterVec::new(
            opts!(
                "wayfind_cache_evictions_total",
                "Total cache entries evicted"
            ),
            &["reason"],
        )?;
        let cache_size_bytes = Gauge::with_opts(opts!(
            "wayfind_cache_size_bytes",
            "Current estimated size of the cache in bytes"
        ))?;

        let query_duration = HistogramVec::new(
            histogram_opts!(
                "wayfind_query_duration_seconds",
                "Time to answer a query, end to end"
            ),
            &["outcome"],
        )?;
        let rejections_total = CounterVec::new(
            opts!(
                "wayfind_rejections_total",
                "Queries rejected before reaching the forwarder"
            ),
            &["reason"],
        )?;

        let upstream_health = GaugeVec::new(
            opts!(
                "wayfind_upstream_health",
                "Upstream health (1 = healthy, 0 = in cooldown)"
            ),
            &["upstream"],
        )?;
        let upstream_latency_ms = GaugeVec::new(
            opts!(
                "wayfind_upstream_latency_ms",
                "Exponential moving average of upstream response latency"
            ),
            &["upstream"],
        )?;
        let upstream_consecutive_failures = GaugeVec::new(
            opts!(
                "wayfind_upstream_consecutive_failures",
                "Consecutive failed attempts against an upstream"
            ),
            &["upstream"],
        )?;

        let active_connections = GaugeVec::new(
            opts!(
                "wayfind_active_connections",
                "Currently in-flight requests per frontend"
            ),
            &["protocol"],
        )?;

        let events_dropped = Gauge::with_opts(opts!(
            "wayfind_events_dropped_total",
            "Event bus messages dropped because no subscriber was listening"
        ))?;

        registry.register(Box::new(cache_hits.clone()))?;
        registry.register(Box::new(cache_misses.clone()))?;
        registry.register(Box::new(cache_evictions.clone()))?;
        registry.register(Box::new(cache_size_bytes.clone()))?;
        registry.register(Box::new(query_duration.clone()))?;
        registry.register(Box::new(rejections_total.clone()))?;
        registry.register(Box::new(upstream_health.clone()))?;
        registry.register(Box::new(upstream_latency_ms.clone()))?;
        registry.register(Box::new(upstream_consecutive_failures.clone()))?;
        registry.register(Box::new(active_connections.clone()))?;
        registry.register(Box::new(events_dropped.clone()))?;

        Ok(Self {
            registry,
            cache_hits,
            cache_misses,
            cache_evictions,
            cache_size_bytes,
            query_duration,
            rejections_total,
            upstream_health,
            upstream_latency_ms,
            upstream_consecutive_failures,
            active_connections,
            events_dropped,
        })
    }

    pub fn record_cache_hit(&self, negative: bool) {
        let kind = if negative { "negative" } else { "positive" };
        self.cache_hits.with_label_values(&[kind]).inc();
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.with_label_values(&[]).inc();
    }

    pub fn record_cache_eviction(&self, reason: &str) {
        self.cache_evictions.with_label_values(&[reason]).inc();
    }

    pub fn set_cache_size_bytes(&self, bytes: usize) {
        self.cache_size_bytes.set(bytes as f64);
    }

    pub fn record_query_duration(&self, outcome: &str, seconds: f64) {
        self.query_duration
            .with_label_values(&[outcome])
            .observe(seconds);
    }

    pub fn record_rejection(&self, reason: &str) {
        self.rejections_total.with_label_values(&[reason]).inc();
    }

    pub fn set_upstream_stats(&self, upstream: &str, healthy: bool, latency_ms: f64, consecutive_failures: u32) {
        self.upstream_health
            .with_label_values(&[upstream])
            .set(if healthy { 1.0 } else { 0.0 });
        self.upstream_latency_ms
            .with_label_values(&[upstream])
            .set(latency_ms);
        self.upstream_consecutive_failures
            .with_label_values(&[upstream])
            .set(consecutive_failures as f64);
    }

    pub fn set_active_connections(&self, protocol: &str, count: i64) {
        self.active_connections
            .with_label_values(&[protocol])
            .set(count as f64);
    }

    pub fn set_events_dropped(&self, count: u64) {
        self.events_dropped.set(count as f64);
    }

    /// Renders the registry in Prometheus text exposition format.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_includes_registered_families() {
        let metrics = Metrics::new().unwrap();
        metrics.record_cache_hit(false);
        metrics.record_cache_miss();
        metrics.set_upstream_stats("1.1.1.1:53", true, 12.5, 0);

        let text = metrics.render().unwrap();
        assert!(text.contains("wayfind_cache_hits_total"));
        assert!(text.contains("wayfind_upstream_health"));
    }
}
