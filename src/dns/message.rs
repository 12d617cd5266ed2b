//! The full DNS message: header + question/answer/authority/additional
//! sections. `parse`/`serialize` are the two halves of the wire codec
//! contract in §4.1; `serialize` implements compression-aware truncation
//! for the UDP frontend.

use std::collections::HashMap;

use crate::constants::{CLASSIC_UDP_MAX_SIZE, Rcode};
use crate::error::Result;

use super::edns::EdnsOpt;
use super::header::Header;
use super::question::Question;
use super::resource::ResourceRecord;
use super::types::RecordType;

#[derive(Clone, Debug, Default)]
pub struct Message {
    pub header: Header,
    pub questions: Vec<Question>,
    pub answers: Vec<ResourceRecord>,
    pub authorities: Vec<ResourceRecord>,
    pub additional: Vec<ResourceRecord>,
    /// Derived from an SOA record in the authority section during parsing,
    /// used by the cache to compute the RFC 2308 negative TTL. Not part of
    /// the wire format itself.
    pub soa_minimum: Option<u32>,
}

impl Message {
    pub fn parse(buf: &[u8]) -> Result<Self> {
        let header = Header::read(buf)?;
        let mut pos = 12usize;

        let mut questions = Vec::with_capacity(header.qdcount as usize);
        for _ in 0..header.qdcount {
            questions.push(Question::read(buf, &mut pos)?);
        }

        let mut answers = Vec::with_capacity(header.ancount as usize);
        for _ in 0..header.ancount {
            answers.push(ResourceRecord::read(buf, &mut pos)?);
        }

        let mut authorities = Vec::with_capacity(header.nscount as usize);
        let mut soa_minimum = None;
        for _ in 0..header.nscount {
            let rr = ResourceRecord::read(buf, &mut pos)?;
            let rdata_offset = pos - rr.rdata.len();
            if rr.rtype == RecordType::SOA {
                soa_minimum = rr.soa_minimum(buf, rdata_offset);
            }
            authorities.push(rr);
        }

        let mut additional = Vec::with_capacity(header.arcount as usize);
        for _ in 0..header.arcount {
            additional.push(ResourceRecord::read(buf, &mut pos)?);
        }

        Ok(Message {
            header,
            questions,
            answers,
            authorities,
            additional,
            soa_minimum,
        })
    }

    /// Returns the EDNS0 OPT pseudo-record advertised in the additional
    /// section, if any.
    pub fn edns(&self) -> Option<EdnsOpt> {
        self.additional
            .iter()
            .find(|rr| rr.rtype == RecordType::OPT)
            .and_then(EdnsOpt::from_resource_record)
    }

    /// Serializes the message. When `max_len` is set, trailing RRs are
    /// dropped (additional, then authority, then answer, each from the end)
    /// until the encoding fits, TC is set, and the question section is kept
    /// intact — mirroring §4.1/§4.7/P7.
    pub fn serialize(&self, max_len: Option<usize>) -> Result<(Vec<u8>, bool)> {
        let full = build(
            &counted_header(&self.header, &self.questions, &self.answers, &self.authorities, &self.additional, false),
            &self.questions,
            &self.answers,
            &self.authorities,
            &self.additional,
        )?;

        let Some(limit) = max_len else {
            return Ok((full, false));
        };
        if full.len() <= limit {
            return Ok((full, false));
        }

        let mut additional = self.additional.clone();
        let mut authorities = self.authorities.clone();
        let mut answers = self.answers.clone();

        loop {
            if !additional.is_empty() {
                additional.pop();
            } else if !authorities.is_empty() {
                authorities.pop();
            } else if !answers.is_empty() {
                answers.pop();
            } else {
                break;
            }

            let header = counted_header(&self.header, &self.questions, &answers, &authorities, &additional, true);
            let candidate = build(&header, &self.questions, &answers, &authorities, &additional)?;
            if candidate.len() <= limit {
                return Ok((candidate, true));
            }
        }

        let header = counted_header(&self.header, &self.questions, &[], &[], &[], true);
        let candidate = build(&header, &self.questions, &[], &[], &[])?;
        Ok((candidate, true))
    }

    /// Builds a response to `self` (a query) carrying `answers`, reusing the
    /// request id and setting RA/QR/RD appropriately, per §4.6 step 4.
    pub fn new_response(&self, rcode: u8, answers: Vec<ResourceRecord>) -> Message {
        let header = Header {
            id: self.header.id,
            qr: true,
            opcode: self.header.opcode,
            aa: false,
            tc: false,
            rd: self.header.rd,
            ra: true,
            z: 0,
            rcode,
            qdcount: self.questions.len() as u16,
            ancount: answers.len() as u16,
            nscount: 0,
            arcount: 0,
        };
        Message {
            header,
            questions: self.questions.clone(),
            answers,
            authorities: Vec::new(),
            additional: Vec::new(),
            soa_minimum: None,
        }
    }

    pub fn rcode(&self) -> u8 {
        self.header.rcode
    }
}

fn counted_header(
    base: &Header,
    questions: &[Question],
    answers: &[ResourceRecord],
    authorities: &[ResourceRecord],
    additional: &[ResourceRecord],
    truncated: bool,
) -> Header {
    let mut header = base.clone();
    header.qdcount = questions.len() as u16;
    header.ancount = answers.len() as u16;
    header.nscount = authorities.len() as u16;
    header.arcount = additional.len() as u16;
    header.tc = truncated;
    header
}

fn build(
    header: &Header,
    questions: &[Question],
    answers: &[ResourceRecord],
    authorities: &[ResourceRecord],
    additional: &[ResourceRecord],
) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    header.write(&mut out)?;
    let mut dictionary = HashMap::new();
    for q in questions {
        q.write(&mut out, &mut dictionary)?;
    }
    for rr in answers.iter().chain(authorities).chain(additional) {
        rr.write(&mut out, &mut dictionary)?;
    }
    Ok(out)
}

/// Builds a minimal FORMERR/NOTIMP/REFUSED response from just a request id,
/// for the case where the inbound packet was too malformed to fully parse
/// but the 16-bit id was still recoverable.
pub fn error_response_for_id(id: u16, rcode: u8) -> Message {
    Message {
        header: Header {
            id,
            qr: true,
            opcode: 0,
            aa: false,
            tc: false,
            rd: false,
            ra: true,
            z: 0,
            rcode,
            qdcount: 0,
            ancount: 0,
            nscount: 0,
            arcount: 0,
        },
        questions: Vec::new(),
        answers: Vec::new(),
        authorities: Vec::new(),
        additional: Vec::new(),
        soa_minimum: None,
    }
}

/// The smallest prefix of an inbound packet from which the 16-bit
/// transaction id can be recovered even if the rest is malformed.
pub fn recover_id(buf: &[u8]) -> Option<u16> {
    if buf.len() < 2 {
        return None;
    }
    Some(u16::from_be_bytes([buf[0], buf[1]]))
}

pub const DEFAULT_UDP_MAX: usize = CLASSIC_UDP_MAX_SIZE;

pub fn servfail_rcode() -> u8 {
    Rcode::SERVFAIL
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::types::RecordClass;
    use std::net::Ipv4Addr;

    fn sample_query() -> Message {
        Message {
            header: Header {
                id: 0x1234,
                qr: false,
                opcode: 0,
                aa: false,
                tc: false,
                rd: true,
                ra: false,
                z: 0,
                rcode: 0,
                qdcount: 1,
                ancount: 0,
                nscount: 0,
                arcount: 0,
            },
            questions: vec![Question {
                name: "example.com".into(),
                qtype: RecordType::A,
                qclass: RecordClass::IN,
            }],
            answers: Vec::new(),
            authorities: Vec::new(),
            additional: Vec::new(),
            soa_minimum: None,
        }
    }

    #[test]
    fn parse_serialize_round_trip() {
        let msg = sample_query();
        let (bytes, truncated) = msg.serialize(None).unwrap();
        assert!(!truncated);
        let parsed = Message::parse(&bytes).unwrap();
        assert_eq!(parsed.header.id, 0x1234);
        assert_eq!(parsed.questions.len(), 1);
        assert_eq!(parsed.questions[0].name, "example.com");
    }

    #[test]
    fn response_round_trip_with_answer() {
        let query = sample_query();
        let answer = ResourceRecord::new_a("example.com", 3600, Ipv4Addr::new(93, 184, 216, 34));
        let response = query.new_response(0, vec![answer.clone()]);
        let (bytes, truncated) = response.serialize(None).unwrap();
        assert!(!truncated);
        let parsed = Message::parse(&bytes).unwrap();
        assert_eq!(parsed.header.id, 0x1234);
        assert!(parsed.header.qr);
        assert!(parsed.header.ra);
        assert_eq!(parsed.answers.len(), 1);
        assert_eq!(parsed.answers[0].as_ipv4(), answer.as_ipv4());
    }

    #[test]
    fn truncation_drops_answers_and_sets_tc() {
        let query = sample_query();
        let many_txt: Vec<ResourceRecord> = (0..50)
            .map(|_| ResourceRecord {
                name: "big.example".into(),
                rtype: RecordType::TXT,
                rclass: RecordClass::IN,
                ttl: 60,
                rdata: vec![b'x'; 200],
            })
            .collect();
        let response = query.new_response(0, many_txt);
        let (bytes, truncated) = response.serialize(Some(512)).unwrap();
        assert!(truncated);
        assert!(bytes.len() <= 512);
        let parsed = Message::parse(&bytes).unwrap();
        assert!(parsed.header.tc);
        assert_eq!(parsed.questions.len(), 1, "question section must survive truncation");
    }

    #[test]
    fn recover_id_from_short_buffer() {
        assert_eq!(recover_id(&[0x12, 0x34]), Some(0x1234));
        assert_eq!(recover_id(&[0x12]), None);
    }
}
