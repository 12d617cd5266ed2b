//! EDNS0 OPT pseudo-record (RFC 6891). Only the UDP payload size is acted
//! on; other options are parsed for round-tripping but otherwise ignored —
//! the data model's non-goals exclude EDNS client subnet and DNSSEC OK
//! handling beyond a no-op passthrough of the flags field.

use crate::constants::{MAX_EDNS_UDP_SIZE, MIN_EDNS_UDP_SIZE};
use crate::error::Result;

use super::resource::ResourceRecord;
use super::types::RecordType;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EdnsOpt {
    pub udp_payload_size: u16,
    pub extended_rcode: u8,
    pub version: u8,
    pub flags: u16,
}

impl EdnsOpt {
    pub fn new(udp_payload_size: u16) -> Self {
        EdnsOpt {
            udp_payload_size,
            extended_rcode: 0,
            version: 0,
            flags: 0,
        }
    }

    /// The UDP response size ceiling this OPT record implies, clamped to the
    /// range this resolver is willing to honor.
    pub fn clamped_udp_size(&self) -> u16 {
        self.udp_payload_size
            .clamp(MIN_EDNS_UDP_SIZE, MAX_EDNS_UDP_SIZE)
    }

    pub fn from_resource_record(rr: &ResourceRecord) -> Option<Self> {
        if rr.rtype != RecordType::OPT {
            return None;
        }
        let udp_payload_size = u16::from(rr.rclass);
        let extended_rcode = ((rr.ttl >> 24) & 0xFF) as u8;
        let version = ((rr.ttl >> 16) & 0xFF) as u8;
        let flags = (rr.ttl & 0xFFFF) as u16;
        Some(EdnsOpt {
            udp_payload_size,
            extended_rcode,
            version,
            flags,
        })
    }

    /// Builds the pseudo-RR carrying this OPT record, echoing no options
    /// (options are accepted at size zero, per §6).
    pub fn to_resource_record(&self) -> Result<ResourceRecord> {
        let ttl = ((self.extended_rcode as u32) << 24)
            | ((self.version as u32) << 16)
            | (self.flags as u32);
        Ok(ResourceRecord {
            name: String::new(),
            rtype: RecordType::OPT,
            rclass: self.udp_payload_size.into(),
            ttl,
            rdata: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamps_below_minimum() {
        let opt = EdnsOpt::new(100);
        assert_eq!(opt.clamped_udp_size(), MIN_EDNS_UDP_SIZE);
    }

    #[test]
    fn clamps_above_maximum() {
        let opt = EdnsOpt::new(65000);
        assert_eq!(opt.clamped_udp_size(), MAX_EDNS_UDP_SIZE);
    }

    #[test]
    fn round_trips_through_resource_record() {
        let opt = EdnsOpt::new(1232);
        let rr = opt.to_resource_record().unwrap();
        let parsed = EdnsOpt::from_resource_record(&rr).unwrap();
        assert_eq!(parsed.udp_payload_size, 1232);
    }
}
