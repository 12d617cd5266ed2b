//! C8: TCP frontend. Each connection is read in a loop of 2-byte
//! length-prefixed messages per RFC 1035 §4.2.2, grounded on the donor's
//! `run_tcp_server`/`handle_tcp_connection`. A query that disconnects
//! mid-flight just drops its own task; the single-flight dedup in the
//! resolver keeps the underlying upstream query alive for anyone else still
//! waiting on it.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, Semaphore};
use tracing::{debug, info, warn};

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
    connection_timeout: Duration,
    max_query_length: usize,
    block_malformed_requests: bool,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<()> {
    let listener = TcpListener::bind(bind_addr).await?;
    info!(%bind_addr, "TCP frontend listening");

    let active = Arc::new(AtomicI64::new(0));
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                info!("TCP frontend shutting down");
                break;
            }
            result = listener.accept() => {
                let (stream, src) = result?;
                let resolver = resolver.clone();
                let semaphore = semaphore.clone();
                let metrics = metrics.clone();
                let active = active.clone();

                tokio::spawn(async move {
                    metrics.set_active_connections("tcp", active.fetch_add(1, Ordering::Relaxed) + 1);
                    let result = handle_connection(
                        stream,
                        src,
                        resolver,
                        semaphore,
                        connection_timeout,
                        max_query_length,
                        block_malformed_requests,
                    )
                    .await;
                    if let Err(e) = result {
                        debug!(%src, error = %e, "TCP connection ended");
                    }
                    metrics.set_active_connections("tcp", active.fetch_sub(1, Ordering::Relaxed) - 1);
                });
            }
        }
    }
    Ok(())
}

async fn handle_connection(
    mut stream: TcpStream,
    src: SocketAddr,
    resolver: Arc<Resolver>,
    semaphore: Arc<Semaphore>,
    connection_timeout: Duration,
    max_query_length: usize,
    block_malformed_requests: bool,
) -> Result<()> {
    loop {
        let mut len_buf = [0u8; 2];
        let read = tokio::time::timeout(connection_timeout, stream.read_exact(&mut len_buf)).await;
        match read {
            Ok(Ok(_)) => {}
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(()),
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => return Ok(()),
        }

        let message_len = u16::from_be_bytes(len_buf) as usize;
        if message_len > max_query_length {
            debug!(%src, message_len, max_query_length, "closing TCP connection over max query length");
            return Ok(());
        }
        let mut message_buf = BytesMut::zeroed(message_len);
        stream.read_exact(&mut message_buf).await?;

        let permit = match semaphore.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                warn!(%src, "max concurrent requests reached, closing TCP connection");
                return Ok(());
            }
        };

        let response = match Message::parse(&message_buf) {
            Ok(query) => {
                let response = resolver.resolve(&query, src.ip(), Transport::Tcp).await;
                drop(permit);
                match response {
                    Some(response) => response,
                    // ACL-blocked: close the connection without a reply, per §4.3.
                    None => return Ok(()),
                }
            }
            Err(e) => {
                drop(permit);
                debug!(%src, error = %e, "malformed TCP query");
                if !block_malformed_requests {
                    return Ok(());
                }
                match crate::dns::message::recover_id(&message_buf) {
                    Some(id) => crate::dns::message::error_response_for_id(id, e.to_rcode()),
                    None => return Ok(()),
                }
            }
        };

        let (bytes, _truncated) = response.serialize(None)?;
        let len = (bytes.len() as u16).to_be_bytes();
        stream.write_all(&len).await?;
        stream.write_all(&bytes).await?;
        stream.flush().await?;
    }
}
