use std::net::{IpAddr, SocketAddr};

use serde::Deserialize;

use crate::error::{DnsError, Result};

fn default_port() -> u16 {
    53
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    pub address: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl UpstreamConfig {
    pub fn new(address: IpAddr, port: u16) -> Self {
        UpstreamConfig { address, port }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }
}

/// Parses a comma-separated `WAYFIND_UPSTREAMS` list of `ip:port` pairs.
pub(super) fn parse_list(raw: &str) -> Result<Vec<UpstreamConfig>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            let addr: SocketAddr = s
                .parse()
                .map_err(|_| DnsError::Config(format!("invalid upstream address: {s}")))?;
            Ok(UpstreamConfig::new(addr.ip(), addr.port()))
        })
        .collect()
}
