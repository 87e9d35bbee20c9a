//! Octet Encoding Rules helpers shared by the ILP and STREAM codecs.
//!
//! Readers take a `&mut &[u8]` cursor and fail with [`PayError::Codec`]
//! instead of panicking when the input is truncated.

use crate::error::{PayError, Result};
use bytes::{Buf, BufMut, BytesMut};

pub(crate) fn put_var_len(buf: &mut BytesMut, len: usize) {
    if len < 128 {
        buf.put_u8(len as u8);
    } else {
        let be = (len as u64).to_be_bytes();
        let skip = be.iter().take_while(|b| **b == 0).count();
        buf.put_u8(0x80 | (be.len() - skip) as u8);
        buf.put_slice(&be[skip..]);
    }
}

pub(crate) fn put_var_octets(buf: &mut BytesMut, bytes: &[u8]) {
    put_var_len(buf, bytes.len());
    buf.put_slice(bytes);
}

pub(crate) fn put_var_uint(buf: &mut BytesMut, value: u64) {
    let be = value.to_be_bytes();
    // Zero still takes one octet.
    let skip = be.iter().take_while(|b| **b == 0).count().min(be.len() - 1);
    put_var_octets(buf, &be[skip..]);
}

fn ensure(buf: &[u8], needed: usize, what: &str) -> Result<()> {
    if buf.len() < needed {
        return Err(PayError::Codec(format!(
            "unexpected end of input reading {what}: need {needed} bytes, have {}",
            buf.len()
        )));
    }
    Ok(())
}

pub(crate) fn read_u8(buf: &mut &[u8], what: &str) -> Result<u8> {
    ensure(buf, 1, what)?;
    Ok(buf.get_u8())
}

pub(crate) fn read_u64(buf: &mut &[u8], what: &str) -> Result<u64> {
    ensure(buf, 8, what)?;
    Ok(buf.get_u64())
}

pub(crate) fn read_array<const N: usize>(buf: &mut &[u8], what: &str) -> Result<[u8; N]> {
    ensure(buf, N, what)?;
    let mut out = [0u8; N];
    buf.copy_to_slice(&mut out);
    Ok(out)
}

pub(crate) fn read_var_len(buf: &mut &[u8], what: &str) -> Result<usize> {
    let first = read_u8(buf, what)?;
    if first & 0x80 == 0 {
        return Ok(first as usize);
    }
    let n = (first & 0x7f) as usize;
    if n == 0 || n > 8 {
        return Err(PayError::Codec(format!(
            "invalid length prefix for {what}: {n} length octets"
        )));
    }
    ensure(buf, n, what)?;
    let len = buf[..n].iter().fold(0u64, |acc, b| (acc << 8) | *b as u64);
    buf.advance(n);
    usize::try_from(len).map_err(|_| PayError::Codec(format!("{what} length overflows")))
}

pub(crate) fn read_var_octets<'a>(buf: &mut &'a [u8], what: &str) -> Result<&'a [u8]> {
    let len = read_var_len(buf, what)?;
    ensure(buf, len, what)?;
    let rest: &'a [u8] = *buf;
    let (head, tail) = rest.split_at(len);
    *buf = tail;
    Ok(head)
}

pub(crate) fn read_var_string(buf: &mut &[u8], what: &str) -> Result<String> {
    let bytes = read_var_octets(buf, what)?;
    String::from_utf8(bytes.to_vec())
        .map_err(|_| PayError::Codec(format!("{what} is not valid UTF-8")))
}

pub(crate) fn read_var_uint(buf: &mut &[u8], what: &str) -> Result<u64> {
    let bytes = read_var_octets(buf, what)?;
    if bytes.is_empty() || bytes.len() > 8 {
        return Err(PayError::Codec(format!(
            "{what} must be 1 to 8 octets, got {}",
            bytes.len()
        )));
    }
    Ok(bytes.iter().fold(0u64, |acc, b| (acc << 8) | *b as u64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_long_length_prefix() {
        let mut buf = BytesMut::new();
        put_var_octets(&mut buf, &[7u8; 300]);
        // 0x82 = two length octets follow, 300 = 0x012c
        assert_eq!(&buf[..3], &[0x82, 0x01, 0x2c]);

        let mut cursor = &buf[..];
        let decoded = read_var_octets(&mut cursor, "data").unwrap();
        assert_eq!(decoded.len(), 300);
        assert!(cursor.is_empty());
    }

    #[test]
    fn test_var_uint_is_minimal() {
        let mut buf = BytesMut::new();
        put_var_uint(&mut buf, 0);
        put_var_uint(&mut buf, 256);
        assert_eq!(&buf[..], &[0x01, 0x00, 0x02, 0x01, 0x00]);

        let mut cursor = &buf[..];
        assert_eq!(read_var_uint(&mut cursor, "a").unwrap(), 0);
        assert_eq!(read_var_uint(&mut cursor, "b").unwrap(), 256);
    }

    #[test]
    fn test_truncated_input_is_an_error() {
        let mut cursor: &[u8] = &[0x05, 0x01];
        assert!(matches!(
            read_var_octets(&mut cursor, "data"),
            Err(PayError::Codec(_))
        ));
    }
}
