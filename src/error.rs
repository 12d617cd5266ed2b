//! Unified error taxonomy. Every fallible call in the core returns through
//! [`Result`]; the network boundary (see [`crate::resolver`]) is the single
//! place this enum gets collapsed down to an RCODE.

use thiserror::Error;

use crate::constants::Rcode;

pub type Result<T> = std::result::Result<T, DnsError>;

#[derive(Error, Debug)]
pub enum DnsError {
    #[error("malformed packet: {0}")]
    FormatError(String),

    #[error("unsupported opcode {0}")]
    NotImplemented(u8),

    #[error("refused: {0}")]
    Refused(String),

    #[error("server failure: {0}")]
    ServFail(String),

    #[error("name error (nxdomain)")]
    NxDomain,

    #[error("no data")]
    NoData,

    #[error("all upstreams failed: {0}")]
    AllUpstreamsFailed(String),

    #[error("upstream timed out")]
    UpstreamTimeout,

    #[error("upstream reply did not match outstanding query")]
    ReplyMismatch,

    #[error("rate limit exceeded")]
    RateLimited,

    #[error("blocked by access control")]
    AclBlocked,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl DnsError {
    /// Maps an internal error to the RCODE surfaced to the client.
    /// This is the one place the taxonomy of §7 becomes wire bytes; callers
    /// elsewhere in the core should match on the enum itself, not on RCODE.
    pub fn to_rcode(&self) -> u8 {
        match self {
            DnsError::FormatError(_) => Rcode::FORMERR,
            DnsError::NotImplemented(_) => Rcode::NOTIMP,
            DnsError::Refused(_) | DnsError::RateLimited | DnsError::AclBlocked => Rcode::REFUSED,
            DnsError::NxDomain => Rcode::NXDOMAIN,
            DnsError::NoData => Rcode::NOERROR,
            DnsError::ServFail(_)
            | DnsError::AllUpstreamsFailed(_)
            | DnsError::UpstreamTimeout
            | DnsError::ReplyMismatch
            | DnsError::Config(_)
            | DnsError::Io(_) => Rcode::SERVFAIL,
        }
    }
}
