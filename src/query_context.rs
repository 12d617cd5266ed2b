//! §3's `QueryContext`: the bundle of per-request state a frontend creates on
//! ingress and that dies with the resolution, never cached or stored
//! alongside an answer. It exists so a request id survives across the
//! cache-lookup/single-flight/forwarder hops for correlating log lines, not
//! because any of those hops branch on it.

use std::net::IpAddr;
use std::time::Instant;

use uuid::Uuid;

/// Which socket a query arrived on. Carried through to tracing spans so a
/// UDP retry and its TCP fallback read as distinct events in the logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Udp,
    Tcp,
}

impl std::fmt::Display for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Transport::Udp => "udp",
            Transport::Tcp => "tcp",
        })
    }
}

/// Created by a frontend the moment a query is parsed, and dropped once the
/// response has been sent (or the query discarded). Never survives past a
/// single resolution, so it carries no `Clone` impl of its own beyond what's
/// needed to pass it by value into the resolver.
#[derive(Debug)]
pub struct QueryContext {
    pub request_id: Uuid,
    pub client: IpAddr,
    pub transport: Transport,
    pub arrival: Instant,
}

impl QueryContext {
    pub fn new(client: IpAddr, transport: Transport) -> Self {
        QueryContext {
            request_id: Uuid::new_v4(),
            client,
            transport,
            arrival: Instant::now(),
        }
    }
}
