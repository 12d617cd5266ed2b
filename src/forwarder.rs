//! C5: forwards a single question to the upstream pool, retrying across
//! servers on timeout or malformed reply and falling back to TCP when a UDP
//! reply comes back truncated. Grounded on the donor resolver's
//! `query_upstream`/`send_query_with_timeout`/`send_udp_query`/`send_tcp_query`
//! chain, stripped of recursive/iterative resolution and DNSSEC validation,
//! which are out of scope here.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use rand::Rng;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::dns::{Message, Question};
use crate::error::{DnsError, Result};
use crate::upstream::UpstreamPool;

#[derive(Debug, Clone)]
pub struct ForwarderConfig {
    pub max_attempts: usize,
    pub per_attempt_timeout: Duration,
    /// Overall budget across every attempt; bounds the tail latency of a
    /// query that exhausts retries against slow-but-not-quite-timed-out
    /// upstreams.
    pub query_timeout: Duration,
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        ForwarderConfig {
            max_attempts: 3,
            per_attempt_timeout: Duration::from_secs(2),
            query_timeout: Duration::from_secs(5),
        }
    }
}

pub struct Forwarder {
    config: ForwarderConfig,
    pool: UpstreamPool,
}

impl Forwarder {
    pub fn new(config: ForwarderConfig, pool: UpstreamPool) -> Self {
        Forwarder { config, pool }
    }

    pub fn pool(&self) -> &UpstreamPool {
        &self.pool
    }

    /// Forwards `question` upstream, trying servers in health order up to
    /// `max_attempts` times, bounded overall by `query_timeout`. A truncated
    /// UDP reply is retried over TCP against the same upstream before moving
    /// to the next one. Returns the first well-formed reply (NXDOMAIN/NODATA
    /// count as success), [`DnsError::AllUpstreamsFailed`] if every attempt
    /// failed, or [`DnsError::UpstreamTimeout`] if the overall budget runs
    /// out first.
    pub async fn forward(&self, question: &Question) -> Result<Message> {
        match timeout(self.config.query_timeout, self.forward_inner(question)).await {
            Ok(result) => result,
            Err(_) => Err(DnsError::UpstreamTimeout),
        }
    }

    async fn forward_inner(&self, question: &Question) -> Result<Message> {
        let now = Instant::now();
        let order = self.pool.select_order(now);
        if order.is_empty() {
            return Err(DnsError::AllUpstreamsFailed("no upstreams configured".into()));
        }

        let mut last_err = String::new();
        for addr in order.into_iter().take(self.config.max_attempts) {
            match self.query_one(addr, question).await {
                Ok(response) => return Ok(response),
                Err(e) => {
                    debug!(%addr, error = %e, "upstream attempt failed");
                    last_err = e.to_string();
                }
            }
        }

        Err(DnsError::AllUpstreamsFailed(last_err))
    }

    async fn query_one(&self, addr: SocketAddr, question: &Question) -> Result<Message> {
        let start = Instant::now();
        let query = build_query(question);

        let result = timeout(self.config.per_attempt_timeout, self.send_udp(addr, &query)).await;
        let response = match result {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                self.pool.record_failure(addr, Instant::now());
                return Err(e);
            }
            Err(_) => {
                self.pool.record_failure(addr, Instant::now());
                return Err(DnsError::UpstreamTimeout);
            }
        };

        if let Err(e) = verify_reply(&query, question, &response) {
            self.pool.record_failure(addr, Instant::now());
            return Err(e);
        }

        if response.header.tc {
            let tcp_result = timeout(self.config.per_attempt_timeout, self.send_tcp(addr, &query)).await;
            let response = match tcp_result {
                Ok(Ok(response)) => response,
                Ok(Err(e)) => {
                    self.pool.record_failure(addr, Instant::now());
                    return Err(e);
                }
                Err(_) => {
                    self.pool.record_failure(addr, Instant::now());
                    return Err(DnsError::UpstreamTimeout);
                }
            };
            self.pool.record_success(addr, start.elapsed());
            return Ok(response);
        }

        self.pool.record_success(addr, start.elapsed());
        Ok(response)
    }

    async fn send_udp(&self, addr: SocketAddr, query: &Message) -> Result<Message> {
        let local: SocketAddr = if addr.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" }.parse().unwrap();
        let socket = UdpSocket::bind(local).await?;
        socket.connect(addr).await?;

        let (bytes, _) = query.serialize(Some(4096))?;
        socket.send(&bytes).await?;

        let mut buf = vec![0u8; 4096];
        let n = socket.recv(&mut buf).await?;
        Message::parse(&buf[..n])
    }

    async fn send_tcp(&self, addr: SocketAddr, query: &Message) -> Result<Message> {
        let mut stream = TcpStream::connect(addr).await?;
        let (bytes, _) = query.serialize(None)?;
        let len = (bytes.len() as u16).to_be_bytes();
        stream.write_all(&len).await?;
        stream.write_all(&bytes).await?;

        let mut len_buf = [0u8; 2];
        stream.read_exact(&mut len_buf).await?;
        let response_len = u16::from_be_bytes(len_buf) as usize;
        let mut response_buf = vec![0u8; response_len];
        stream.read_exact(&mut response_buf).await?;
        Message::parse(&response_buf)
    }
}

/// P8: an accepted reply must carry the transaction id we sent and a
/// question section matching what we asked, name/type/class. A reply with
/// no question section at all is rejected rather than treated as a vacuous
/// match — otherwise a spoofed empty-question reply would sail through.
fn verify_reply(query: &Message, question: &Question, response: &Message) -> Result<()> {
    if response.header.id != query.header.id {
        return Err(DnsError::ReplyMismatch);
    }
    let Some(reply_question) = response.questions.first() else {
        return Err(DnsError::ReplyMismatch);
    };
    if !question.matches(reply_question) {
        return Err(DnsError::ReplyMismatch);
    }
    Ok(())
}

fn build_query(question: &Question) -> Message {
    use crate::dns::Header;

    let id = rand::rng().random();
    let header = Header {
        id,
        qr: false,
        opcode: 0,
        aa: false,
        tc: false,
        rd: true,
        ra: false,
        z: 0,
        rcode: 0,
        qdcount: 1,
        ancount: 0,
        nscount: 0,
        arcount: 0,
    };
    Message {
        header,
        questions: vec![question.clone()],
        answers: Vec::new(),
        authorities: Vec::new(),
        additional: Vec::new(),
        soa_minimum: None,
    }
}
