//! Wire primitives shared by all payloads.
//!
//! Bitcoin payloads are little-endian with variable-length integers
//! ("compact size") prefixing collections and strings.

use crate::error::{NetworkError, NetworkResult};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Longest accepted var-string, in bytes.
const MAX_STRING: u64 = 256;

/// Guard against short reads before calling the panicking `Buf` getters.
pub fn need(buf: &impl Buf, size: usize) -> NetworkResult<()> {
    if buf.remaining() < size {
        return Err(NetworkError::InvalidMessage);
    }
    Ok(())
}

/// Read a compact-size integer (1, 3, 5 or 9 bytes).
pub fn read_compact_size(buf: &mut Bytes) -> NetworkResult<u64> {
    need(buf, 1)?;
    match buf.get_u8() {
        0xfd => {
            need(buf, 2)?;
            Ok(buf.get_u16_le() as u64)
        }
        0xfe => {
            need(buf, 4)?;
            Ok(buf.get_u32_le() as u64)
        }
        0xff => {
            need(buf, 8)?;
            Ok(buf.get_u64_le())
        }
        byte => Ok(byte as u64),
    }
}

/// Write a compact-size integer in its minimal form.
pub fn write_compact_size(buf: &mut BytesMut, value: u64) {
    match value {
        0..=0xfc => buf.put_u8(value as u8),
        0xfd..=0xffff => {
            buf.put_u8(0xfd);
            buf.put_u16_le(value as u16);
        }
        0x10000..=0xffff_ffff => {
            buf.put_u8(0xfe);
            buf.put_u32_le(value as u32);
        }
        _ => {
            buf.put_u8(0xff);
            buf.put_u64_le(value);
        }
    }
}

/// Read a compact-size-prefixed UTF-8 string.
pub fn read_var_string(buf: &mut Bytes) -> NetworkResult<String> {
    let length = read_compact_size(buf)?;
    if length > MAX_STRING {
        return Err(NetworkError::InvalidMessage);
    }
    let length = length as usize;
    need(buf, length)?;
    let raw = buf.copy_to_bytes(length);
    String::from_utf8(raw.to_vec()).map_err(|_| NetworkError::InvalidMessage)
}

/// Write a compact-size-prefixed string.
pub fn write_var_string(buf: &mut BytesMut, value: &str) {
    write_compact_size(buf, value.len() as u64);
    buf.put_slice(value.as_bytes());
}

/// Read a compact-size-prefixed byte blob, bounded by `maximum`.
pub fn read_var_bytes(buf: &mut Bytes, maximum: u64) -> NetworkResult<Bytes> {
    let length = read_compact_size(buf)?;
    if length > maximum {
        return Err(NetworkError::InvalidMessage);
    }
    let length = length as usize;
    need(buf, length)?;
    Ok(buf.copy_to_bytes(length))
}

/// Write a compact-size-prefixed byte blob.
pub fn write_var_bytes(buf: &mut BytesMut, value: &[u8]) {
    write_compact_size(buf, value.len() as u64);
    buf.put_slice(value);
}

/// Read a fixed 32-byte hash.
pub fn read_hash(buf: &mut Bytes) -> NetworkResult<[u8; 32]> {
    need(buf, 32)?;
    let mut hash = [0u8; 32];
    buf.copy_to_slice(&mut hash);
    Ok(hash)
}

/// Byte length of a compact-size integer.
pub fn compact_size_len(value: u64) -> usize {
    match value {
        0..=0xfc => 1,
        0xfd..=0xffff => 3,
        0x10000..=0xffff_ffff => 5,
        _ => 9,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(value: u64) -> u64 {
        let mut buf = BytesMut::new();
        write_compact_size(&mut buf, value);
        assert_eq!(buf.len(), compact_size_len(value));
        read_compact_size(&mut buf.freeze()).unwrap()
    }

    #[test]
    fn test_compact_size_boundaries() {
        for value in [0, 1, 0xfc, 0xfd, 0xffff, 0x10000, 0xffff_ffff, u64::MAX] {
            assert_eq!(round_trip(value), value);
        }
    }

    #[test]
    fn test_var_string_round_trip() {
        let mut buf = BytesMut::new();
        write_var_string(&mut buf, "/Satoshi:25.0.0/");
        let decoded = read_var_string(&mut buf.freeze()).unwrap();
        assert_eq!(decoded, "/Satoshi:25.0.0/");
    }

    #[test]
    fn test_var_string_rejects_oversize() {
        let mut buf = BytesMut::new();
        write_compact_size(&mut buf, 100_000);
        assert_eq!(
            read_var_string(&mut buf.freeze()),
            Err(NetworkError::InvalidMessage)
        );
    }

    #[test]
    fn test_truncated_read_fails() {
        let mut buf = Bytes::from_static(&[0xfd, 0x01]);
        assert_eq!(read_compact_size(&mut buf), Err(NetworkError::InvalidMessage));
    }
}
