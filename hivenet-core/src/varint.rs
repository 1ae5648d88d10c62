//! LEB128-style variable length integers.
//!
//! Every header field on the RPC wire is one of these: seven data bits per
//! byte, least significant group first, high bit set on every byte except
//! the last. Signed values are zig-zag mapped before encoding so small
//! negative numbers stay short.

use bytes::{BufMut, BytesMut};

/// Longest possible encoding of a `u64`.
pub const MAX_VARINT_LEN: usize = 10;

/// Encode `value` into the front of `dst`.
///
/// Returns the number of bytes written, or 0 if `dst` is too small to hold
/// the whole encoding (in which case the contents of `dst` are unspecified).
pub fn encode_u64(dst: &mut [u8], mut value: u64) -> usize {
    let mut pos = 0;
    loop {
        if pos >= dst.len() {
            return 0;
        }
        if value < 0x80 {
            dst[pos] = value as u8;
            return pos + 1;
        }
        dst[pos] = (value as u8 & 0x7f) | 0x80;
        value >>= 7;
        pos += 1;
    }
}

/// Decode a `u64` from the front of `src`.
///
/// Returns the value and the number of bytes consumed. `None` means the
/// input ended mid-varint or needs more than 64 bits of shift.
pub fn decode_u64(src: &[u8]) -> Option<(u64, usize)> {
    let mut value: u64 = 0;
    let mut shift: u32 = 0;
    for (pos, &byte) in src.iter().enumerate() {
        if shift > 63 {
            return None;
        }
        value |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Some((value, pos + 1));
        }
        shift += 7;
    }
    None
}

/// Zig-zag encode a signed value, then write it as an unsigned varint.
pub fn encode_i64(dst: &mut [u8], value: i64) -> usize {
    encode_u64(dst, zigzag(value))
}

/// Inverse of [`encode_i64`].
pub fn decode_i64(src: &[u8]) -> Option<(i64, usize)> {
    decode_u64(src).map(|(v, n)| (unzigzag(v), n))
}

/// Number of bytes `value` occupies once encoded.
#[inline]
pub const fn encoded_len(value: u64) -> usize {
    let bits = 64 - (value | 1).leading_zeros() as usize;
    (bits + 6) / 7
}

/// Append `value` to a growable buffer.
pub fn put_u64(dst: &mut BytesMut, value: u64) {
    let mut tmp = [0u8; MAX_VARINT_LEN];
    let n = encode_u64(&mut tmp, value);
    dst.put_slice(&tmp[..n]);
}

#[inline]
const fn zigzag(v: i64) -> u64 {
    ((v << 1) ^ (v >> 63)) as u64
}

#[inline]
const fn unzigzag(v: u64) -> i64 {
    ((v >> 1) as i64) ^ -((v & 1) as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_byte_values() {
        let mut buf = [0u8; MAX_VARINT_LEN];
        assert_eq!(encode_u64(&mut buf, 0), 1);
        assert_eq!(buf[0], 0);
        assert_eq!(encode_u64(&mut buf, 127), 1);
        assert_eq!(buf[0], 0x7f);
        assert_eq!(encode_u64(&mut buf, 128), 2);
        assert_eq!(&buf[..2], &[0x80, 0x01]);
    }

    #[test]
    fn test_extremes_round_trip() {
        let mut buf = [0u8; MAX_VARINT_LEN];
        for v in [0u64, 1, 300, u64::from(u32::MAX), u64::MAX - 1, u64::MAX] {
            let n = encode_u64(&mut buf, v);
            assert_eq!(n, encoded_len(v));
            assert_eq!(decode_u64(&buf[..n]), Some((v, n)));
        }
        assert_eq!(encode_u64(&mut buf, u64::MAX), MAX_VARINT_LEN);
    }

    #[test]
    fn test_destination_too_small() {
        let mut buf = [0u8; 2];
        assert_eq!(encode_u64(&mut buf, 1 << 20), 0);
        assert_eq!(encode_u64(&mut [], 0), 0);
    }

    #[test]
    fn test_truncated_input() {
        let mut buf = [0u8; MAX_VARINT_LEN];
        let n = encode_u64(&mut buf, 1 << 40);
        for cut in 0..n {
            assert_eq!(decode_u64(&buf[..cut]), None);
        }
    }

    #[test]
    fn test_overlong_input_rejected() {
        // Eleven continuation bytes would need a 77-bit shift.
        let data = [0xffu8; 11];
        assert_eq!(decode_u64(&data), None);
    }

    #[test]
    fn test_zigzag() {
        let mut buf = [0u8; MAX_VARINT_LEN];
        for v in [0i64, -1, 1, -64, 63, i64::MIN, i64::MAX] {
            let n = encode_i64(&mut buf, v);
            assert_eq!(decode_i64(&buf[..n]), Some((v, n)));
        }
        assert_eq!(encode_i64(&mut buf, -1), 1);
        assert_eq!(buf[0], 1);
    }

    #[test]
    fn test_put_u64() {
        let mut out = BytesMut::new();
        put_u64(&mut out, 300);
        assert_eq!(&out[..], &[0xac, 0x02]);
    }
}
