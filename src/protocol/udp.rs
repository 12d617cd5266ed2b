//! C7: UDP frontend. Grounded on the donor's `run_udp_server`/`handle_dns_query`
//! pair — the receive loop, semaphore-bounded concurrency, and per-query
//! spawn survive; the buffer-pool and zero-copy fast paths are dropped since
//! this crate's codec is already copy-once, and the DNSSEC/zone/blocking
//! branches in `handle_parsed_query` have no counterpart here.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, Semaphore};
use tracing::{debug, info, warn};

use crate::constants::CLASSIC_UDP_MAX_SIZE;
use crate::dns::Message;
use crate::error::Result;
use crate::metrics::Metrics;
use crate::query_context::Transport;
use crate::resolver::Resolver;

pub async fn run(
    bind_addr: SocketAddr,
    resolver: Arc<Resolver>,
    semaphore: Arc<Semaphore>,
    metrics: Arc<Metrics>,
    max_query_length: usize,
    block_malformed_requests: bool,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<()> {
    let socket = Arc::new(UdpSocket::bind(bind_addr).await?);
    info!(%bind_addr, "UDP frontend listening");

    let active = Arc::new(AtomicI64::new(0));
    let mut buf = BytesMut::zeroed(4096);
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                info!("UDP frontend shutting down");
                break;
            }
            result = socket.recv_from(&mut buf) => {
                let (len, src) = result?;

                if len > max_query_length {
                    debug!(%src, len, max_query_length, "dropping oversized UDP query");
                    continue;
                }

                let permit = match semaphore.clone().try_acquire_owned() {
                    Ok(permit) => permit,
                    Err(_) => {
                        warn!(%src, "max concurrent requests reached, dropping UDP query");
                        continue;
                    }
                };

                let query_bytes = Bytes::copy_from_slice(&buf[..len]);
                let resolver = resolver.clone();
                let socket = socket.clone();
                let active = active.clone();
                let metrics = metrics.clone();

                tokio::spawn(async move {
                    let _permit = permit;
                    metrics.set_active_connections("udp", active.fetch_add(1, Ordering::Relaxed) + 1);
                    handle_query(&query_bytes, &resolver, &socket, src, block_malformed_requests).await;
                    metrics.set_active_connections("udp", active.fetch_sub(1, Ordering::Relaxed) - 1);
                });
            }
        }
    }
    Ok(())
}

async fn handle_query(
    query_bytes: &[u8],
    resolver: &Resolver,
    socket: &UdpSocket,
    src: SocketAddr,
    block_malformed_requests: bool,
) {
    let query = match Message::parse(query_bytes) {
        Ok(query) => query,
        Err(e) => {
            debug!(%src, error = %e, "malformed UDP query");
            if !block_malformed_requests {
                return;
            }
            if let Some(id) = crate::dns::message::recover_id(query_bytes) {
                let response = crate::dns::message::error_response_for_id(id, e.to_rcode());
                send_response(socket, src, &response, CLASSIC_UDP_MAX_SIZE).await;
            }
            return;
        }
    };

    let max_len = query
        .edns()
        .map(|opt| opt.clamped_udp_size() as usize)
        .unwrap_or(CLASSIC_UDP_MAX_SIZE);

    let Some(response) = resolver.resolve(&query, src.ip(), Transport::Udp).await else {
        // ACL-blocked: dropped without a reply, per §4.3.
        return;
    };
    send_response(socket, src, &response, max_len).await;
}

async fn send_response(socket: &UdpSocket, dst: SocketAddr, response: &Message, max_len: usize) {
    match response.serialize(Some(max_len)) {
        Ok((bytes, _truncated)) => {
            if let Err(e) = socket.send_to(&bytes, dst).await {
                warn!(%dst, error = %e, "failed to send UDP response");
            }
        }
        Err(e) => warn!(%dst, error = %e, "failed to serialize UDP response"),
    }
}
