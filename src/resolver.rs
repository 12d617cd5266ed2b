//! C6: the resolver core. Validates an inbound query, enforces ACL and
//! rate-limit policy, serves from cache, and otherwise forwards upstream
//! with single-flight deduplication so a thundering herd of identical
//! queries produces exactly one upstream round trip. Grounded on the donor
//! resolver's `resolve`/`resolve_with_deduplication`/`InFlightQuery`
//! machinery, with the DNSSEC, zone, blocking and iterative-resolution
//! paths removed — this crate only forwards.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Instant;

use dashmap::mapref::entry::Entry as DashEntry;
use dashmap::DashMap;
use rustc_hash::FxBuildHasher;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::acl::Acl;
use crate::cache::{Cache, CacheKey};
use crate::constants::Rcode;
use crate::dns::types::{Opcode, RecordClass};
use crate::dns::{Message, Question};
use crate::error::{DnsError, Result};
use crate::events::{CacheEvent, EventBus, QueryEvent};
use crate::forwarder::Forwarder;
use crate::query_context::{QueryContext, Transport};
use crate::rate_limiter::RateLimiter;

/// Result of a single upstream round trip, shared with everyone who rode
/// along on the same in-flight query. A `DnsError` isn't `Clone` (it wraps
/// `std::io::Error`), so waiters get the rendered message back instead; it's
/// only ever turned into a RCODE from here, not matched on.
type Outcome = Arc<std::result::Result<Message, String>>;

pub struct Resolver {
    cache: Arc<Cache>,
    acl: Arc<Acl>,
    rate_limiter: Arc<RateLimiter>,
    forwarder: Arc<Forwarder>,
    events: Arc<EventBus>,
    in_flight: DashMap<CacheKey, broadcast::Sender<Outcome>, FxBuildHasher>,
}

impl Resolver {
    pub fn new(
        cache: Arc<Cache>,
        acl: Arc<Acl>,
        rate_limiter: Arc<RateLimiter>,
        forwarder: Arc<Forwarder>,
        events: Arc<EventBus>,
    ) -> Self {
        Resolver {
            cache,
            acl,
            rate_limiter,
            forwarder,
            events,
            in_flight: DashMap::default(),
        }
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn cache(&self) -> &Arc<Cache> {
        &self.cache
    }

    pub fn forwarder(&self) -> &Arc<Forwarder> {
        &self.forwarder
    }

    pub fn acl(&self) -> &Arc<Acl> {
        &self.acl
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }

    /// Resolves one inbound query, returning the response to serialize back
    /// to the client, or `None` if the query should be dropped without any
    /// reply at all. Per §4.3, an ACL-blocked client gets silence (UDP) or a
    /// closed connection (TCP) rather than a signal that anything is even
    /// listening; only rate-limiting earns an explicit REFUSED. Aside from
    /// that one case, this never surfaces an `Err`: every other failure mode
    /// is folded into an RCODE-bearing `Message`, since §4.6 treats "no
    /// answer" and "SERVFAIL" as the same wire event.
    pub async fn resolve(&self, query: &Message, client: IpAddr, transport: Transport) -> Option<Message> {
        let ctx = QueryContext::new(client, transport);
        self.resolve_with_context(query, &ctx).await
    }

    /// The actual resolution pipeline, parameterized over an already-built
    /// [`QueryContext`] so a caller that needs the request id up front (for
    /// its own pre-resolve logging) can construct one itself.
    pub async fn resolve_with_context(&self, query: &Message, ctx: &QueryContext) -> Option<Message> {
        let client = ctx.client;

        if let Err(e) = validate(query) {
            debug!(request_id = %ctx.request_id, %client, error = %e, "rejecting malformed or unsupported query");
            return Some(query.new_response(e.to_rcode(), Vec::new()));
        }

        let question = &query.questions[0];

        if !self.acl.is_allowed(client) {
            self.events.publish_query(QueryEvent::Rejected { client, reason: "acl" });
            return None;
        }

        if !self.rate_limiter.allow(client, ctx.arrival) {
            self.events.publish_query(QueryEvent::Rejected { client, reason: "rate_limit" });
            return Some(query.new_response(Rcode::REFUSED, Vec::new()));
        }

        self.events.publish_query(QueryEvent::Received {
            client,
            name: question.name.clone(),
            qtype: u16::from(question.qtype),
        });

        let key = CacheKey::from_question(question);
        if let Some(cached) = self.cache.lookup(&key, ctx.arrival) {
            let negative = crate::cache::is_negative_response(&cached);
            self.events.publish_cache(CacheEvent::Hit { name: question.name.clone(), negative });
            let response = query.new_response(cached.rcode(), cached.answers.clone());
            self.events.publish_query(QueryEvent::Answered {
                client,
                name: question.name.clone(),
                rcode: response.rcode(),
                latency: ctx.arrival.elapsed(),
                cache_hit: true,
            });
            return Some(response);
        }
        self.events.publish_cache(CacheEvent::Miss { name: question.name.clone() });

        let response = match self.resolve_upstream(question.clone(), key.clone()).await {
            Ok(upstream) => {
                match self.cache.insert(key, upstream.clone(), Instant::now()) {
                    Err(e) => {
                        warn!(request_id = %ctx.request_id, error = %e, "failed to cache upstream response");
                    }
                    Ok(evicted) => {
                        self.events.publish_cache(CacheEvent::Inserted {
                            name: question.name.clone(),
                            ttl: upstream.answers.iter().map(|rr| rr.ttl).min().unwrap_or(0),
                        });
                        if evicted > 0 {
                            self.events.publish_cache(CacheEvent::Evicted { name: question.name.clone() });
                        }
                    }
                }
                query.new_response(upstream.rcode(), upstream.answers.clone())
            }
            Err(e) => {
                warn!(request_id = %ctx.request_id, transport = %ctx.transport, name = %question.name, error = %e, "upstream resolution failed");
                query.new_response(e.to_rcode(), Vec::new())
            }
        };

        self.events.publish_query(QueryEvent::Answered {
            client,
            name: question.name.clone(),
            rcode: response.rcode(),
            latency: ctx.arrival.elapsed(),
            cache_hit: false,
        });
        Some(response)
    }

    /// Deduplicates concurrent identical lookups onto a single upstream
    /// round trip. The first caller to claim `key` in `in_flight` becomes
    /// the leader and performs the query; everyone else subscribes to its
    /// broadcast and waits for the shared result.
    async fn resolve_upstream(&self, question: Question, key: CacheKey) -> Result<Message> {
        loop {
            if let Some(sender) = self.in_flight.get(&key) {
                let mut rx = sender.subscribe();
                drop(sender);
                match rx.recv().await {
                    Ok(outcome) => return unwrap_outcome(outcome),
                    Err(broadcast::error::RecvError::Closed) => continue,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                }
            }

            let (tx, _rx) = broadcast::channel(1);
            match self.in_flight.entry(key.clone()) {
                DashEntry::Occupied(_) => continue,
                DashEntry::Vacant(vacant) => {
                    vacant.insert(tx.clone());
                }
            }

            let result = self.forwarder.forward(&question).await;
            let outcome: Outcome = Arc::new(result.map_err(|e| e.to_string()));
            self.in_flight.remove(&key);
            let _ = tx.send(outcome.clone());
            return unwrap_outcome(outcome);
        }
    }
}

fn unwrap_outcome(outcome: Outcome) -> Result<Message> {
    match outcome.as_ref() {
        Ok(message) => Ok(message.clone()),
        Err(reason) => Err(DnsError::ServFail(reason.clone())),
    }
}

/// §4.6 step 1: reject before touching ACL, cache, or upstreams.
fn validate(query: &Message) -> Result<()> {
    if query.header.opcode() != Opcode::Query {
        return Err(DnsError::NotImplemented(query.header.opcode));
    }
    if query.questions.len() != 1 {
        return Err(DnsError::FormatError(format!(
            "expected exactly one question, got {}",
            query.questions.len()
        )));
    }
    if query.questions[0].qclass != RecordClass::IN {
        return Err(DnsError::Refused("only class IN is served".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acl::Acl;
    use crate::dns::types::RecordType;
    use crate::dns::Header;
    use crate::rate_limiter::{RateLimitConfig, RateLimiter};

    fn sample_query(opcode: u8, qdcount: u16, qclass: RecordClass) -> Message {
        let questions = if qdcount == 1 {
            vec![Question {
                name: "example.com".into(),
                qtype: RecordType::A,
                qclass,
            }]
        } else {
            Vec::new()
        };
        Message {
            header: Header {
                id: 42,
                qr: false,
                opcode,
                aa: false,
                tc: false,
                rd: true,
                ra: false,
                z: 0,
                rcode: 0,
                qdcount,
                ancount: 0,
                nscount: 0,
                arcount: 0,
            },
            questions,
            answers: Vec::new(),
            authorities: Vec::new(),
            additional: Vec::new(),
            soa_minimum: None,
        }
    }

    #[test]
    fn validate_rejects_non_query_opcode() {
        let query = sample_query(1, 1, RecordClass::IN);
        assert!(matches!(validate(&query), Err(DnsError::NotImplemented(1))));
    }

    #[test]
    fn validate_rejects_multi_question() {
        let mut query = sample_query(0, 1, RecordClass::IN);
        query.questions.push(query.questions[0].clone());
        assert!(matches!(validate(&query), Err(DnsError::FormatError(_))));
    }

    #[test]
    fn validate_rejects_non_in_class() {
        let query = sample_query(0, 1, RecordClass::CH);
        assert!(matches!(validate(&query), Err(DnsError::Refused(_))));
    }

    #[test]
    fn validate_accepts_well_formed_query() {
        let query = sample_query(0, 1, RecordClass::IN);
        assert!(validate(&query).is_ok());
    }

    #[tokio::test]
    async fn acl_blocked_client_gets_silently_dropped() {
        use std::net::Ipv4Addr;

        let resolver = Resolver::new(
            Arc::new(Cache::new(1_000_000, 0, 86400, 300)),
            Arc::new(Acl::new(Vec::new(), crate::acl::Action::Deny)),
            Arc::new(RateLimiter::new(RateLimitConfig::default())),
            Arc::new(Forwarder::new(Default::default(), crate::upstream::UpstreamPool::new(Vec::new()))),
            Arc::new(EventBus::new()),
        );

        let query = sample_query(0, 1, RecordClass::IN);
        let response = resolver
            .resolve(&query, IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), crate::query_context::Transport::Udp)
            .await;
        assert!(response.is_none());
        assert_eq!(resolver.cache().len(), 0);
    }

    #[tokio::test]
    async fn rate_limited_client_gets_refused() {
        use std::net::Ipv4Addr;

        let resolver = Resolver::new(
            Arc::new(Cache::new(1_000_000, 0, 86400, 300)),
            Arc::new(Acl::permissive()),
            Arc::new(RateLimiter::new(RateLimitConfig { enabled: true, capacity: 1.0, ..Default::default() })),
            Arc::new(Forwarder::new(Default::default(), crate::upstream::UpstreamPool::new(Vec::new()))),
            Arc::new(EventBus::new()),
        );

        let client = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
        let query = sample_query(0, 1, RecordClass::IN);
        // The forwarder has no upstreams configured, so the first query
        // resolves to SERVFAIL rather than a real answer; that's fine, only
        // the rate limiter's behavior on the second query is under test.
        let _ = resolver.resolve(&query, client, crate::query_context::Transport::Udp).await;
        let response = resolver.resolve(&query, client, crate::query_context::Transport::Udp).await;
        assert_eq!(response.unwrap().rcode(), Rcode::REFUSED);
    }
}
