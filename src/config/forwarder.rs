use std::time::Duration;

use serde::Deserialize;

use crate::error::{DnsError, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ForwarderConfig {
    /// Overall budget for resolving one query, across every attempt.
    pub query_timeout_secs: u64,
    pub per_attempt_timeout_secs: u64,
    pub max_attempts: usize,
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        ForwarderConfig {
            query_timeout_secs: 5,
            per_attempt_timeout_secs: 2,
            max_attempts: 3,
        }
    }
}

impl ForwarderConfig {
    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }

    pub fn per_attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.per_attempt_timeout_secs)
    }

    /// Converts the declarative config into the forwarder's own runtime
    /// config type.
    pub fn to_runtime(&self) -> crate::forwarder::ForwarderConfig {
        crate::forwarder::ForwarderConfig {
            max_attempts: self.max_attempts,
            per_attempt_timeout: self.per_attempt_timeout(),
            query_timeout: self.query_timeout(),
        }
    }

    pub(super) fn apply_env(&mut self) -> Result<()> {
        if let Ok(v) = std::env::var("WAYFIND_QUERY_TIMEOUT_SECS") {
            self.query_timeout_secs = v
                .parse()
                .map_err(|_| DnsError::Config(format!("invalid WAYFIND_QUERY_TIMEOUT_SECS: {v}")))?;
        }
        if let Ok(v) = std::env::var("WAYFIND_PER_ATTEMPT_TIMEOUT_SECS") {
            self.per_attempt_timeout_secs = v
                .parse()
                .map_err(|_| DnsError::Config(format!("invalid WAYFIND_PER_ATTEMPT_TIMEOUT_SECS: {v}")))?;
        }
        if let Ok(v) = std::env::var("WAYFIND_MAX_ATTEMPTS") {
            self.max_attempts = v
                .parse()
                .map_err(|_| DnsError::Config(format!("invalid WAYFIND_MAX_ATTEMPTS: {v}")))?;
        }
        Ok(())
    }
}
