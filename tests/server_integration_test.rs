//! Full-stack tests: bind a real `Server` on an ephemeral port and drive it
//! over the wire, the way a client would. No real upstream is reachable in
//! CI, so these exercise the parts of the pipeline that don't require one
//! (malformed queries, ACL drops, SERVFAIL on upstream failure) rather than
//! a genuine recursive answer.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::broadcast;
use tokio::time::timeout;
use wayfind_dns::config::Config;
use wayfind_dns::Server;

fn build_query(id: u16, domain: &str) -> Vec<u8> {
    let mut packet = Vec::new();
    packet.extend_from_slice(&id.to_be_bytes());
    packet.extend_from_slice(&[0x01, 0x00]); // RD=1
    packet.extend_from_slice(&[0x00, 0x01]); // QDCOUNT
    packet.extend_from_slice(&[0x00, 0x00, 0x00, 0x00, 0x00, 0x00]);
    for label in domain.split('.') {
        packet.push(label.len() as u8);
        packet.extend_from_slice(label.as_bytes());
    }
    packet.push(0);
    packet.extend_from_slice(&[0x00, 0x01]); // A
    packet.extend_from_slice(&[0x00, 0x01]); // IN
    packet
}

/// Starts UDP+TCP frontends bound to `port` and returns a shutdown handle.
/// An unreachable upstream (TEST-NET-1, RFC 5737) with a short timeout
/// keeps the failure-path tests below from hanging on a real network call.
async fn start_on(port: u16) -> (SocketAddr, broadcast::Sender<()>, tokio::task::JoinHandle<()>) {
    let mut config = Config::default();
    config.server.bind_address = Ipv4Addr::LOCALHOST.into();
    config.server.dns_port = port;
    config.server.http_port = 0;
    config.upstreams = vec![wayfind_dns::config::UpstreamConfig::new([192, 0, 2, 1].into(), 53)];
    config.forwarder.per_attempt_timeout_secs = 1;
    config.forwarder.query_timeout_secs = 1;
    config.forwarder.max_attempts = 1;

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let mut shutdown_rx = shutdown_tx.subscribe();
    let server = Server::new(config).unwrap();
    let handle = tokio::spawn(async move {
        let _ = server
            .run(async move {
                let _ = shutdown_rx.recv().await;
            })
            .await;
    });
    // Give the frontends a moment to bind.
    tokio::time::sleep(Duration::from_millis(100)).await;
    (SocketAddr::new(Ipv4Addr::LOCALHOST.into(), port), shutdown_tx, handle)
}

#[tokio::test]
async fn udp_roundtrip_returns_servfail_when_upstream_unreachable() {
    let (addr, shutdown_tx, handle) = start_on(15353).await;

    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    socket.connect(addr).await.unwrap();
    socket.send(&build_query(0xABCD, "example.com")).await.unwrap();

    let mut buf = [0u8; 512];
    let len = timeout(Duration::from_secs(2), socket.recv(&mut buf)).await.unwrap().unwrap();
    assert!(len >= 12);
    assert_eq!(u16::from_be_bytes([buf[0], buf[1]]), 0xABCD);
    let rcode = buf[3] & 0x0F;
    assert_eq!(rcode, 2, "expected SERVFAIL when no upstream answers");

    let _ = shutdown_tx.send(());
    let _ = timeout(Duration::from_secs(2), handle).await;
}

#[tokio::test]
async fn tcp_roundtrip_is_length_prefixed() {
    let (addr, shutdown_tx, handle) = start_on(15354).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    let query = build_query(0x1234, "example.org");
    stream.write_all(&(query.len() as u16).to_be_bytes()).await.unwrap();
    stream.write_all(&query).await.unwrap();

    let mut len_buf = [0u8; 2];
    timeout(Duration::from_secs(2), stream.read_exact(&mut len_buf)).await.unwrap().unwrap();
    let resp_len = u16::from_be_bytes(len_buf) as usize;
    let mut resp_buf = vec![0u8; resp_len];
    stream.read_exact(&mut resp_buf).await.unwrap();
    assert_eq!(u16::from_be_bytes([resp_buf[0], resp_buf[1]]), 0x1234);

    let _ = shutdown_tx.send(());
    let _ = timeout(Duration::from_secs(2), handle).await;
}

#[tokio::test]
async fn malformed_udp_packet_too_short_for_an_id_is_dropped_silently() {
    let (addr, shutdown_tx, handle) = start_on(15355).await;

    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    socket.connect(addr).await.unwrap();
    socket.send(&[0x00]).await.unwrap(); // too short to even recover a transaction id

    let mut buf = [0u8; 512];
    let result = timeout(Duration::from_millis(300), socket.recv(&mut buf)).await;
    assert!(result.is_err(), "a packet with no recoverable id should get no response at all");

    let _ = shutdown_tx.send(());
    let _ = timeout(Duration::from_secs(2), handle).await;
}

#[tokio::test]
async fn malformed_udp_packet_with_recoverable_id_gets_formerr() {
    let (addr, shutdown_tx, handle) = start_on(15356).await;

    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    socket.connect(addr).await.unwrap();
    socket.send(&[0x43, 0x21]).await.unwrap(); // id only, header otherwise truncated

    let mut buf = [0u8; 512];
    let len = timeout(Duration::from_secs(2), socket.recv(&mut buf)).await.unwrap().unwrap();
    assert!(len >= 12);
    assert_eq!(u16::from_be_bytes([buf[0], buf[1]]), 0x4321);
    let rcode = buf[3] & 0x0F;
    assert_eq!(rcode, 1, "expected FORMERR when only the id could be recovered");

    let _ = shutdown_tx.send(());
    let _ = timeout(Duration::from_secs(2), handle).await;
}
