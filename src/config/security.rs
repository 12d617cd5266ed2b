use ipnet::IpNet;
use serde::Deserialize;

use crate::acl::{Acl, AclRule, Action};
use crate::error::{DnsError, Result};
use crate::rate_limiter::RateLimitConfig;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Queries per minute allowed per client IP; 0 disables rate limiting.
    pub rate_limit_per_ip: f64,
    pub allowed_networks: Vec<IpNet>,
    pub blocked_networks: Vec<IpNet>,
    pub max_query_length: usize,
    pub block_malformed_requests: bool,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        SecurityConfig {
            rate_limit_per_ip: 0.0,
            allowed_networks: Vec::new(),
            blocked_networks: Vec::new(),
            max_query_length: 512,
            block_malformed_requests: true,
        }
    }
}

impl SecurityConfig {
    /// Builds the runtime ACL: blocked networks first (so an explicit deny
    /// wins over a broader allow), falling back to permissive when neither
    /// list is configured.
    pub fn to_acl(&self) -> Acl {
        let (rules, default_action) = self.to_acl_parts();
        Acl::new(rules, default_action)
    }

    /// The rule set and default action underlying [`to_acl`](Self::to_acl),
    /// exposed separately so a config reload can hand them to
    /// [`Acl::replace`] without constructing a throwaway `Acl` just to tear
    /// it back apart.
    pub fn to_acl_parts(&self) -> (Vec<AclRule>, Action) {
        if self.allowed_networks.is_empty() && self.blocked_networks.is_empty() {
            return (Vec::new(), Action::Allow);
        }
        let mut rules: Vec<AclRule> = self
            .blocked_networks
            .iter()
            .map(|net| AclRule { network: *net, action: Action::Deny })
            .collect();
        rules.extend(self.allowed_networks.iter().map(|net| AclRule {
            network: *net,
            action: Action::Allow,
        }));
        let default_action = if self.allowed_networks.is_empty() { Action::Allow } else { Action::Deny };
        (rules, default_action)
    }

    /// `0.0` disables rate limiting; otherwise it is read as a per-minute
    /// burst capacity, per [`RateLimiter`](crate::rate_limiter::RateLimiter).
    pub fn to_rate_limit_config(&self) -> RateLimitConfig {
        RateLimitConfig {
            enabled: self.rate_limit_per_ip > 0.0,
            capacity: self.rate_limit_per_ip.max(1.0),
            ..RateLimitConfig::default()
        }
    }

    pub(super) fn apply_env(&mut self) -> Result<()> {
        if let Ok(v) = std::env::var("WAYFIND_RATE_LIMIT_PER_IP") {
            self.rate_limit_per_ip = v
                .parse()
                .map_err(|_| DnsError::Config(format!("invalid WAYFIND_RATE_LIMIT_PER_IP: {v}")))?;
        }
        if let Ok(v) = std::env::var("WAYFIND_MAX_QUERY_LENGTH") {
            self.max_query_length = v
                .parse()
                .map_err(|_| DnsError::Config(format!("invalid WAYFIND_MAX_QUERY_LENGTH: {v}")))?;
        }
        if let Ok(v) = std::env::var("WAYFIND_BLOCK_MALFORMED_REQUESTS") {
            self.block_malformed_requests = parse_bool(&v)
                .ok_or_else(|| DnsError::Config(format!("invalid WAYFIND_BLOCK_MALFORMED_REQUESTS: {v}")))?;
        }
        Ok(())
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}
