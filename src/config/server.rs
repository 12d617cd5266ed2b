use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{DnsError, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: IpAddr,
    pub dns_port: u16,
    /// Port for the `/metrics` and `/health` HTTP status surface.
    pub http_port: u16,
    /// Tokio worker threads; 0 lets the runtime pick (number of cores).
    pub workers: usize,
    pub max_concurrent_requests: usize,
    pub request_queue_size: usize,
    pub connection_timeout_secs: u64,
    /// Grace period for in-flight queries to finish during shutdown.
    pub shutdown_grace_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            bind_address: IpAddr::from([0, 0, 0, 0]),
            dns_port: crate::constants::DEFAULT_PORT,
            http_port: 9053,
            workers: 0,
            max_concurrent_requests: 10_000,
            request_queue_size: 1_000,
            connection_timeout_secs: 10,
            shutdown_grace_secs: 10,
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.dns_port)
    }

    pub fn http_bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.http_port)
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    pub(super) fn apply_env(&mut self) -> Result<()> {
        if let Ok(v) = std::env::var("WAYFIND_BIND_ADDRESS") {
            self.bind_address = v
                .parse()
                .map_err(|_| DnsError::Config(format!("invalid WAYFIND_BIND_ADDRESS: {v}")))?;
        }
        if let Ok(v) = std::env::var("WAYFIND_DNS_PORT") {
            self.dns_port = v
                .parse()
                .map_err(|_| DnsError::Config(format!("invalid WAYFIND_DNS_PORT: {v}")))?;
        }
        if let Ok(v) = std::env::var("WAYFIND_HTTP_PORT") {
            self.http_port = v
                .parse()
                .map_err(|_| DnsError::Config(format!("invalid WAYFIND_HTTP_PORT: {v}")))?;
        }
        if let Ok(v) = std::env::var("WAYFIND_WORKERS") {
            self.workers = v
                .parse()
                .map_err(|_| DnsError::Config(format!("invalid WAYFIND_WORKERS: {v}")))?;
        }
        if let Ok(v) = std::env::var("WAYFIND_MAX_CONCURRENT_REQUESTS") {
            self.max_concurrent_requests = v
                .parse()
                .map_err(|_| DnsError::Config(format!("invalid WAYFIND_MAX_CONCURRENT_REQUESTS: {v}")))?;
        }
        if let Ok(v) = std::env::var("WAYFIND_REQUEST_QUEUE_SIZE") {
            self.request_queue_size = v
                .parse()
                .map_err(|_| DnsError::Config(format!("invalid WAYFIND_REQUEST_QUEUE_SIZE: {v}")))?;
        }
        if let Ok(v) = std::env::var("WAYFIND_CONNECTION_TIMEOUT_SECS") {
            self.connection_timeout_secs = v
                .parse()
                .map_err(|_| DnsError::Config(format!("invalid WAYFIND_CONNECTION_TIMEOUT_SECS: {v}")))?;
        }
        if let Ok(v) = std::env::var("WAYFIND_SHUTDOWN_GRACE_SECS") {
            self.shutdown_grace_secs = v
                .parse()
                .map_err(|_| DnsError::Config(format!("invalid WAYFIND_SHUTDOWN_GRACE_SECS: {v}")))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_addr_combines_address_and_port() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr().port(), crate::constants::DEFAULT_PORT);
    }
}
