use std::path::PathBuf;

use serde::Deserialize;

use crate::error::{DnsError, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub max_size_bytes: usize,
    pub min_ttl: u32,
    pub max_ttl: u32,
    pub negative_ttl: u32,
    /// Optional disk snapshot path. When set, the cache is loaded from this
    /// path on startup and saved back to it on graceful shutdown; unset
    /// means an always-cold cache, which is always a legal starting state.
    pub persistence_path: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            max_size_bytes: 64 * 1024 * 1024,
            min_ttl: 0,
            max_ttl: 86_400,
            negative_ttl: 300,
            persistence_path: None,
        }
    }
}

impl CacheConfig {
    pub(super) fn apply_env(&mut self) -> Result<()> {
        if let Ok(v) = std::env::var("WAYFIND_CACHE_MAX_SIZE_BYTES") {
            self.max_size_bytes = v
                .parse()
                .map_err(|_| DnsError::Config(format!("invalid WAYFIND_CACHE_MAX_SIZE_BYTES: {v}")))?;
        }
        if let Ok(v) = std::env::var("WAYFIND_CACHE_MIN_TTL") {
            self.min_ttl = v
                .parse()
                .map_err(|_| DnsError::Config(format!("invalid WAYFIND_CACHE_MIN_TTL: {v}")))?;
        }
        if let Ok(v) = std::env::var("WAYFIND_CACHE_MAX_TTL") {
            self.max_ttl = v
                .parse()
                .map_err(|_| DnsError::Config(format!("invalid WAYFIND_CACHE_MAX_TTL: {v}")))?;
        }
        if let Ok(v) = std::env::var("WAYFIND_CACHE_NEGATIVE_TTL") {
            self.negative_ttl = v
                .parse()
                .map_err(|_| DnsError::Config(format!("invalid WAYFIND_CACHE_NEGATIVE_TTL: {v}")))?;
        }
        if let Ok(v) = std::env::var("WAYFIND_CACHE_PERSISTENCE_PATH") {
            self.persistence_path = Some(PathBuf::from(v));
        }
        Ok(())
    }
}
