//! RFC 1035 §4.1.1 header: 12 bytes, the first two packed as bitfields.

use bitstream_io::{BigEndian, BitRead, BitReader, BitWrite, BitWriter};

use crate::error::{DnsError, Result};

use super::types::Opcode;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Header {
    pub id: u16,
    pub qr: bool,
    pub opcode: u8,
    pub aa: bool,
    pub tc: bool,
    pub rd: bool,
    pub ra: bool,
    pub z: u8,
    pub rcode: u8,
    pub qdcount: u16,
    pub ancount: u16,
    pub nscount: u16,
    pub arcount: u16,
}

fn fmt_err<E: std::fmt::Display>(e: E) -> DnsError {
    DnsError::FormatError(e.to_string())
}

impl Header {
    pub fn opcode(&self) -> Opcode {
        Opcode::from(self.opcode)
    }

    pub fn write(&self, out: &mut Vec<u8>) -> Result<()> {
        let mut writer = BitWriter::endian(out, BigEndian);
        writer.write_var::<u16>(16, self.id).map_err(fmt_err)?;
        writer.write_bit(self.qr).map_err(fmt_err)?;
        writer.write_var::<u8>(4, self.opcode).map_err(fmt_err)?;
        writer.write_bit(self.aa).map_err(fmt_err)?;
        writer.write_bit(self.tc).map_err(fmt_err)?;
        writer.write_bit(self.rd).map_err(fmt_err)?;
        writer.write_bit(self.ra).map_err(fmt_err)?;
        writer.write_var::<u8>(3, self.z).map_err(fmt_err)?;
        writer.write_var::<u8>(4, self.rcode).map_err(fmt_err)?;
        writer.write_var::<u16>(16, self.qdcount).map_err(fmt_err)?;
        writer.write_var::<u16>(16, self.ancount).map_err(fmt_err)?;
        writer.write_var::<u16>(16, self.nscount).map_err(fmt_err)?;
        writer.write_var::<u16>(16, self.arcount).map_err(fmt_err)?;
        Ok(())
    }

    pub fn read(buf: &[u8]) -> Result<Self> {
        if buf.len() < 12 {
            return Err(DnsError::FormatError("header shorter than 12 bytes".into()));
        }
        let mut reader = BitReader::endian(buf, BigEndian);
        let id = reader.read_var::<u16>(16).map_err(fmt_err)?;
        let qr = reader.read_bit().map_err(fmt_err)?;
        let opcode = reader.read_var::<u8>(4).map_err(fmt_err)?;
        let aa = reader.read_bit().map_err(fmt_err)?;
        let tc = reader.read_bit().map_err(fmt_err)?;
        let rd = reader.read_bit().map_err(fmt_err)?;
        let ra = reader.read_bit().map_err(fmt_err)?;
        let z = reader.read_var::<u8>(3).map_err(fmt_err)?;
        let rcode = reader.read_var::<u8>(4).map_err(fmt_err)?;
        let qdcount = reader.read_var::<u16>(16).map_err(fmt_err)?;
        let ancount = reader.read_var::<u16>(16).map_err(fmt_err)?;
        let nscount = reader.read_var::<u16>(16).map_err(fmt_err)?;
        let arcount = reader.read_var::<u16>(16).map_err(fmt_err)?;

        Ok(Header {
            id,
            qr,
            opcode,
            aa,
            tc,
            rd,
            ra,
            z,
            rcode,
            qdcount,
            ancount,
            nscount,
            arcount,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trips() {
        let header = Header {
            id: 0x1234,
            qr: true,
            opcode: 0,
            aa: false,
            tc: false,
            rd: true,
            ra: true,
            z: 0,
            rcode: 0,
            qdcount: 1,
            ancount: 1,
            nscount: 0,
            arcount: 0,
        };
        let mut buf = Vec::new();
        header.write(&mut buf).unwrap();
        assert_eq!(buf.len(), 12);
        let parsed = Header::read(&buf).unwrap();
        assert_eq!(parsed, header);
    }

    #[test]
    fn header_rejects_short_buffer() {
        assert!(Header::read(&[0u8; 4]).is_err());
    }
}
