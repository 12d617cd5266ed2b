//! Resource records. RDATA is kept as opaque bytes for most types — a
//! forwarding resolver relays what it's given — except where the resolver
//! itself needs a field (SOA MINIMUM, for negative-cache TTL derivation).

use std::collections::HashMap;
use std::net::{Ipv4Addr, Ipv6Addr};

use crate::error::Result;

use super::name::{read_name, write_name};
use super::question::{read_u16, read_u32};
use super::types::{RecordClass, RecordType};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceRecord {
    pub name: String,
    pub rtype: RecordType,
    pub rclass: RecordClass,
    pub ttl: u32,
    pub rdata: Vec<u8>,
}

impl ResourceRecord {
    pub fn new_a(name: impl Into<String>, ttl: u32, addr: Ipv4Addr) -> Self {
        ResourceRecord {
            name: name.into(),
            rtype: RecordType::A,
            rclass: RecordClass::IN,
            ttl,
            rdata: addr.octets().to_vec(),
        }
    }

    pub fn new_aaaa(name: impl Into<String>, ttl: u32, addr: Ipv6Addr) -> Self {
        ResourceRecord {
            name: name.into(),
            rtype: RecordType::AAAA,
            rclass: RecordClass::IN,
            ttl,
            rdata: addr.octets().to_vec(),
        }
    }

    pub fn write(&self, out: &mut Vec<u8>, dictionary: &mut HashMap<String, u16>) -> Result<()> {
        write_name(out, &self.name, dictionary)?;
        out.extend_from_slice(&u16::from(self.rtype).to_be_bytes());
        out.extend_from_slice(&u16::from(self.rclass).to_be_bytes());
        out.extend_from_slice(&self.ttl.to_be_bytes());
        out.extend_from_slice(&(self.rdata.len() as u16).to_be_bytes());
        out.extend_from_slice(&self.rdata);
        Ok(())
    }

    pub fn read(buf: &[u8], pos: &mut usize) -> Result<Self> {
        let name = read_name(buf, pos)?;
        let rtype = RecordType::from(read_u16(buf, pos)?);
        let rclass = RecordClass::from(read_u16(buf, pos)?);
        let ttl = read_u32(buf, pos)?;
        let rdlength = read_u16(buf, pos)? as usize;
        let start = *pos;
        let end = start + rdlength;
        let rdata = buf
            .get(start..end)
            .ok_or_else(|| crate::error::DnsError::FormatError("rdata extends past message".into()))?
            .to_vec();
        *pos = end;
        Ok(ResourceRecord {
            name,
            rtype,
            rclass,
            ttl,
            rdata,
        })
    }

    /// Extracts the MINIMUM field of an SOA record, used to derive a
    /// negative-cache TTL per RFC 2308. `message` is the full wire buffer so
    /// that compressed names inside the RDATA (MNAME/RNAME) can be followed.
    pub fn soa_minimum(&self, message: &[u8], rdata_offset: usize) -> Option<u32> {
        if self.rtype != RecordType::SOA {
            return None;
        }
        let mut pos = rdata_offset;
        let _mname = read_name(message, &mut pos).ok()?;
        let _rname = read_name(message, &mut pos).ok()?;
        let _serial = read_u32(message, &mut pos).ok()?;
        let _refresh = read_u32(message, &mut pos).ok()?;
        let _retry = read_u32(message, &mut pos).ok()?;
        let _expire = read_u32(message, &mut pos).ok()?;
        read_u32(message, &mut pos).ok()
    }

    pub fn as_ipv4(&self) -> Option<Ipv4Addr> {
        if self.rtype != RecordType::A || self.rdata.len() != 4 {
            return None;
        }
        Some(Ipv4Addr::new(
            self.rdata[0],
            self.rdata[1],
            self.rdata[2],
            self.rdata[3],
        ))
    }
}
