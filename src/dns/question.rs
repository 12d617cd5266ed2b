use crate::error::Result;

use super::name::{read_name, write_name};
use super::types::{RecordClass, RecordType};
use std::collections::HashMap;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Question {
    pub name: String,
    pub qtype: RecordType,
    pub qclass: RecordClass,
}

impl Question {
    pub fn write(&self, out: &mut Vec<u8>, dictionary: &mut HashMap<String, u16>) -> Result<()> {
        write_name(out, &self.name, dictionary)?;
        out.extend_from_slice(&u16::from(self.qtype).to_be_bytes());
        out.extend_from_slice(&u16::from(self.qclass).to_be_bytes());
        Ok(())
    }

    pub fn read(buf: &[u8], pos: &mut usize) -> Result<Self> {
        let name = read_name(buf, pos)?;
        let qtype = RecordType::from(read_u16(buf, pos)?);
        let qclass = RecordClass::from(read_u16(buf, pos)?);
        Ok(Question {
            name,
            qtype,
            qclass,
        })
    }

    /// Whether `other`'s question matches this one on name/type/class — used
    /// to defeat reply-mismatch / cache-poisoning style attacks (P8).
    pub fn matches(&self, other: &Question) -> bool {
        self.name.eq_ignore_ascii_case(&other.name)
            && u16::from(self.qtype) == u16::from(other.qtype)
            && u16::from(self.qclass) == u16::from(other.qclass)
    }
}

pub(super) fn read_u16(buf: &[u8], pos: &mut usize) -> Result<u16> {
    let bytes = buf
        .get(*pos..*pos + 2)
        .ok_or_else(|| crate::error::DnsError::FormatError("truncated u16 field".into()))?;
    *pos += 2;
    Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
}

pub(super) fn read_u32(buf: &[u8], pos: &mut usize) -> Result<u32> {
    let bytes = buf
        .get(*pos..*pos + 4)
        .ok_or_else(|| crate::error::DnsError::FormatError("truncated u32 field".into()))?;
    *pos += 4;
    Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn question_round_trips() {
        let q = Question {
            name: "example.com".into(),
            qtype: RecordType::A,
            qclass: RecordClass::IN,
        };
        let mut dict = HashMap::new();
        let mut buf = Vec::new();
        q.write(&mut buf, &mut dict).unwrap();
        let mut pos = 0;
        let parsed = Question::read(&buf, &mut pos).unwrap();
        assert_eq!(parsed, q);
        assert_eq!(pos, buf.len());
    }

    #[test]
    fn matches_is_case_insensitive() {
        let a = Question {
            name: "Example.com".into(),
            qtype: RecordType::A,
            qclass: RecordClass::IN,
        };
        let b = Question {
            name: "example.com".into(),
            qtype: RecordType::A,
            qclass: RecordClass::IN,
        };
        assert!(a.matches(&b));
    }
}
