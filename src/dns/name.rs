//! Domain name label encoding: compression on write, decompression with a
//! loop guard on read. Names are normalized to lowercase ASCII throughout,
//! per the data model's "lowercased, dot-separated labels" definition.

use std::collections::HashMap;

use crate::constants::{MAX_COMPRESSION_POINTERS, MAX_LABEL_LENGTH, MAX_NAME_LENGTH};
use crate::error::{DnsError, Result};

const POINTER_TAG: u8 = 0xC0;

/// Reads a (possibly compressed) name starting at `pos` within `buf`.
/// `pos` is advanced past the encoded name in the *caller's* section, even
/// when the name's labels are read by following a pointer elsewhere.
pub fn read_name(buf: &[u8], pos: &mut usize) -> Result<String> {
    let mut labels: Vec<String> = Vec::new();
    let mut cursor = *pos;
    let mut jumped = false;
    let mut end_pos = None;
    let mut jumps = 0usize;
    let mut total_len = 0usize;

    loop {
        let len_byte = *buf
            .get(cursor)
            .ok_or_else(|| DnsError::FormatError("name extends past end of message".into()))?;

        if len_byte == 0 {
            cursor += 1;
            if !jumped {
                end_pos = Some(cursor);
            }
            break;
        }

        if len_byte & POINTER_TAG == POINTER_TAG {
            jumps += 1;
            if jumps > MAX_COMPRESSION_POINTERS {
                return Err(DnsError::FormatError("compression pointer loop".into()));
            }
            let hi = (len_byte & !POINTER_TAG) as usize;
            let lo = *buf
                .get(cursor + 1)
                .ok_or_else(|| DnsError::FormatError("truncated compression pointer".into()))?
                as usize;
            let pointer = (hi << 8) | lo;
            if pointer >= cursor {
                return Err(DnsError::FormatError(
                    "compression pointer does not point backward".into(),
                ));
            }
            if !jumped {
                end_pos = Some(cursor + 2);
                jumped = true;
            }
            cursor = pointer;
            continue;
        }

        if len_byte as usize > MAX_LABEL_LENGTH {
            return Err(DnsError::FormatError("label exceeds 63 bytes".into()));
        }

        let start = cursor + 1;
        let end = start + len_byte as usize;
        let label_bytes = buf
            .get(start..end)
            .ok_or_else(|| DnsError::FormatError("label extends past end of message".into()))?;
        let label = std::str::from_utf8(label_bytes)
            .map_err(|_| DnsError::FormatError("label is not valid utf-8".into()))?
            .to_ascii_lowercase();
        total_len += label.len() + 1;
        if total_len > MAX_NAME_LENGTH {
            return Err(DnsError::FormatError("name exceeds 255 bytes".into()));
        }
        labels.push(label);
        cursor = end;
    }

    *pos = end_pos.unwrap_or(cursor);
    Ok(labels.join("."))
}

/// Writes `name`, emitting a compression pointer to the longest previously
/// written suffix found in `dictionary`, and registering any newly written
/// suffixes (at offsets that fit in 14 bits) for reuse by later names.
pub fn write_name(out: &mut Vec<u8>, name: &str, dictionary: &mut HashMap<String, u16>) -> Result<()> {
    if name.is_empty() {
        out.push(0);
        return Ok(());
    }

    let labels: Vec<&str> = name.split('.').filter(|l| !l.is_empty()).collect();

    for (i, label) in labels.iter().enumerate() {
        if label.len() > MAX_LABEL_LENGTH {
            return Err(DnsError::FormatError("label exceeds 63 bytes".into()));
        }
        let suffix = labels[i..].join(".");
        if let Some(&offset) = dictionary.get(&suffix) {
            let pointer = ((POINTER_TAG as u16) << 8) | offset;
            out.push((pointer >> 8) as u8);
            out.push((pointer & 0xFF) as u8);
            return Ok(());
        }

        if out.len() <= 0x3FFF {
            dictionary.insert(suffix, out.len() as u16);
        }

        out.push(label.len() as u8);
        out.extend_from_slice(label.as_bytes());
    }

    out.push(0);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_name_round_trips() {
        let mut dict = HashMap::new();
        let mut buf = Vec::new();
        write_name(&mut buf, "example.com", &mut dict).unwrap();
        let mut pos = 0;
        let name = read_name(&buf, &mut pos).unwrap();
        assert_eq!(name, "example.com");
        assert_eq!(pos, buf.len());
    }

    #[test]
    fn root_name_is_a_single_zero_byte() {
        let mut dict = HashMap::new();
        let mut buf = Vec::new();
        write_name(&mut buf, "", &mut dict).unwrap();
        assert_eq!(buf, vec![0]);
    }

    #[test]
    fn second_occurrence_compresses_to_a_pointer() {
        let mut dict = HashMap::new();
        let mut buf = Vec::new();
        write_name(&mut buf, "example.com", &mut dict).unwrap();
        let second_start = buf.len();
        write_name(&mut buf, "example.com", &mut dict).unwrap();
        assert_eq!(buf.len() - second_start, 2);
        assert_eq!(buf[second_start] & 0xC0, 0xC0);

        let mut pos = second_start;
        let name = read_name(&buf, &mut pos).unwrap();
        assert_eq!(name, "example.com");
    }

    #[test]
    fn compression_loop_is_rejected() {
        // A pointer at offset 0 pointing to itself must never validate:
        // read_name requires pointers to point strictly backward.
        let buf = vec![0xC0, 0x00];
        let mut pos = 0;
        assert!(read_name(&buf, &mut pos).is_err());
    }

    #[test]
    fn names_are_lowercased() {
        let mut dict = HashMap::new();
        let mut buf = Vec::new();
        write_name(&mut buf, "EXAMPLE.COM", &mut dict).unwrap();
        let mut pos = 0;
        assert_eq!(read_name(&buf, &mut pos).unwrap(), "example.com");
    }
}
