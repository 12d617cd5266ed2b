//! C9: an internal event bus. The donor codebase wires `tracing` directly
//! into every layer and leaves it at that; this crate additionally exposes a
//! structured pub/sub surface so an embedder (or the HTTP status surface) can
//! observe query/cache/server lifecycle without scraping log lines. Modeled
//! on the broadcast-channel single-flight idiom already used for in-flight
//! query dedup: cheap clone, many subscribers, no back-pressure on the
//! publisher.

use std::net::IpAddr;
use std::time::Duration;

use tokio::sync::broadcast;

use crate::constants::Rcode;

const CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub enum QueryEvent {
    Received { client: IpAddr, name: String, qtype: u16 },
    Answered { client: IpAddr, name: String, rcode: u8, latency: Duration, cache_hit: bool },
    Rejected { client: IpAddr, reason: &'static str },
}

#[derive(Debug, Clone)]
pub enum CacheEvent {
    Hit { name: String, negative: bool },
    Miss { name: String },
    Inserted { name: String, ttl: u32 },
    Evicted { name: String },
}

#[derive(Debug, Clone)]
pub enum ServerEvent {
    Started { bind_addr: String },
    UpstreamDown { addr: String },
    UpstreamRecovered { addr: String },
    Stopped,
}

/// One broadcast channel per topic. Publishing never blocks or fails the hot
/// path: a full or subscriber-less channel just drops the event, tracked by
/// `dropped`.
pub struct EventBus {
    query_tx: broadcast::Sender<QueryEvent>,
    cache_tx: broadcast::Sender<CacheEvent>,
    server_tx: broadcast::Sender<ServerEvent>,
    dropped: std::sync::atomic::AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        let (query_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (cache_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (server_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        EventBus {
            query_tx,
            cache_tx,
            server_tx,
            dropped: std::sync::atomic::AtomicU64::new(0),
        }
    }

    pub fn publish_query(&self, event: QueryEvent) {
        if self.query_tx.send(event).is_err() {
            self.note_dropped();
        }
    }

    pub fn publish_cache(&self, event: CacheEvent) {
        if self.cache_tx.send(event).is_err() {
            self.note_dropped();
        }
    }

    pub fn publish_server(&self, event: ServerEvent) {
        if self.server_tx.send(event).is_err() {
            self.note_dropped();
        }
    }

    pub fn subscribe_queries(&self) -> broadcast::Receiver<QueryEvent> {
        self.query_tx.subscribe()
    }

    pub fn subscribe_cache(&self) -> broadcast::Receiver<CacheEvent> {
        self.cache_tx.subscribe()
    }

    pub fn subscribe_server(&self) -> broadcast::Receiver<ServerEvent> {
        self.server_tx.subscribe()
    }

    /// `send` on a `broadcast::Sender` only errors when there are no
    /// subscribers; that's the common case when nobody is watching, so we
    /// count it rather than log it on every query.
    fn note_dropped(&self) {
        self.dropped.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(std::sync::atomic::Ordering::Relaxed)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

pub fn rcode_label(rcode: u8) -> &'static str {
    match rcode {
        v if v == Rcode::NOERROR => "noerror",
        v if v == Rcode::FORMERR => "formerr",
        v if v == Rcode::SERVFAIL => "servfail",
        v if v == Rcode::NXDOMAIN => "nxdomain",
        v if v == Rcode::NOTIMP => "notimp",
        v if v == Rcode::REFUSED => "refused",
        _ => "other",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_without_subscribers_counts_as_dropped() {
        let bus = EventBus::new();
        bus.publish_server(ServerEvent::Stopped);
        assert_eq!(bus.dropped_count(), 1);
    }

    #[test]
    fn subscriber_receives_published_event() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe_cache();
        bus.publish_cache(CacheEvent::Hit { name: "example.com".into(), negative: false });
        let event = rx.try_recv().unwrap();
        assert!(matches!(event, CacheEvent::Hit { .. }));
        assert_eq!(bus.dropped_count(), 0);
    }
}
