//! Protocol-level constants shared across the codec, frontends and resolver.

/// Default DNS port for both frontends.
pub const DEFAULT_PORT: u16 = 1053;

/// Classic UDP response ceiling absent any EDNS0 OPT record.
pub const CLASSIC_UDP_MAX_SIZE: usize = 512;

/// Upper bound honored for an EDNS0-advertised UDP payload size.
pub const MAX_EDNS_UDP_SIZE: u16 = 4096;

/// Lower bound honored for an EDNS0-advertised UDP payload size.
pub const MIN_EDNS_UDP_SIZE: u16 = 512;

/// EDNS version this resolver implements (EDNS0 only).
pub const EDNS_VERSION: u8 = 0;

/// RFC 1035 §2.3.4: maximum length of a single label, in bytes.
pub const MAX_LABEL_LENGTH: usize = 63;

/// RFC 1035 §2.3.4: maximum length of an encoded domain name, in bytes.
pub const MAX_NAME_LENGTH: usize = 255;

/// Guard against compression pointer loops: no message should ever require
/// following more pointers than it has bytes.
pub const MAX_COMPRESSION_POINTERS: usize = 128;

/// DNS response codes, RFC 1035 §4.1.1 plus RFC 2671 extensions we surface.
pub struct Rcode;

impl Rcode {
    pub const NOERROR: u8 = 0;
    pub const FORMERR: u8 = 1;
    pub const SERVFAIL: u8 = 2;
    pub const NXDOMAIN: u8 = 3;
    pub const NOTIMP: u8 = 4;
    pub const REFUSED: u8 = 5;
}
