// VCDIFF variable-length integers (RFC 3284, Section 2).
//
// Base-128, most-significant group first. Every byte except the last has
// bit 7 set.

use std::io::{self, Read};

use thiserror::Error;

/// Longest encoding of a `u64` (ceil(64 / 7)).
pub const MAX_LEN: usize = 10;

/// Set when the next `<< 7` would lose bits.
const OVERFLOW_MASK: u64 = 0xFE00_0000_0000_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum VarIntError {
    #[error("varint underflow (truncated input)")]
    Underflow,
    #[error("varint overflow")]
    Overflow,
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Append the encoding of `num` to `out`.
pub fn push(out: &mut Vec<u8>, num: u64) {
    let mut scratch = [0u8; MAX_LEN];
    let bytes = encode(num, &mut scratch);
    out.extend_from_slice(bytes);
}

/// Encode `num` into the tail of `scratch` and return the used suffix.
pub fn encode(mut num: u64, scratch: &mut [u8; MAX_LEN]) -> &[u8] {
    let mut start = MAX_LEN;
    loop {
        start -= 1;
        scratch[start] = (num as u8 & 0x7F) | 0x80;
        num >>= 7;
        if num == 0 {
            break;
        }
    }
    scratch[MAX_LEN - 1] &= 0x7F;
    &scratch[start..]
}

/// Encoded length of `num`.
#[inline]
pub fn encoded_len(num: u64) -> usize {
    let bits = 64 - num.leading_zeros();
    bits.max(1).div_ceil(7) as usize
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Decode from the front of `data`; returns the value and bytes consumed.
pub fn decode(data: &[u8]) -> Result<(u64, usize), VarIntError> {
    let mut val = 0u64;
    for (i, &byte) in data.iter().enumerate() {
        if val & OVERFLOW_MASK != 0 {
            return Err(VarIntError::Overflow);
        }
        val = (val << 7) | u64::from(byte & 0x7F);
        if byte & 0x80 == 0 {
            return Ok((val, i + 1));
        }
    }
    Err(VarIntError::Underflow)
}

/// Decode a value that must fit in `u32` (instruction sizes).
pub fn decode_u32(data: &[u8]) -> Result<(u32, usize), VarIntError> {
    let (val, len) = decode(data)?;
    let val = u32::try_from(val).map_err(|_| VarIntError::Overflow)?;
    Ok((val, len))
}

/// Read one varint from a stream.
///
/// An `UnexpectedEof` from the reader is passed through so the caller can
/// tell a truncated header from other I/O failures.
pub fn read_from<R: Read>(r: &mut R) -> io::Result<u64> {
    let mut val = 0u64;
    let mut byte = [0u8; 1];
    loop {
        r.read_exact(&mut byte)?;
        if val & OVERFLOW_MASK != 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidData, VarIntError::Overflow));
        }
        val = (val << 7) | u64::from(byte[0] & 0x7F);
        if byte[0] & 0x80 == 0 {
            return Ok(val);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundaries_roundtrip() {
        for val in [0u64, 1, 127, 128, 16_383, 16_384, u32::MAX as u64, u64::MAX] {
            let mut out = Vec::new();
            push(&mut out, val);
            assert_eq!(out.len(), encoded_len(val), "length for {val}");
            assert_eq!(decode(&out), Ok((val, out.len())));
        }
    }

    #[test]
    fn most_significant_group_first() {
        let mut out = Vec::new();
        push(&mut out, 300);
        assert_eq!(out, [0x82, 0x2C]);
    }

    #[test]
    fn truncated_input_underflows() {
        assert_eq!(decode(&[0x80, 0x81]), Err(VarIntError::Underflow));
        assert_eq!(decode(&[]), Err(VarIntError::Underflow));
    }

    #[test]
    fn oversized_value_overflows() {
        let data = [0xFF; 11];
        assert_eq!(decode(&data), Err(VarIntError::Overflow));

        let mut out = Vec::new();
        push(&mut out, u64::from(u32::MAX) + 1);
        assert_eq!(decode_u32(&out), Err(VarIntError::Overflow));
    }

    #[test]
    fn stream_read_reports_eof() {
        let mut cursor = io::Cursor::new(vec![0x81]);
        let err = read_from(&mut cursor).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);

        let mut cursor = io::Cursor::new(vec![0x87, 0x68]);
        assert_eq!(read_from(&mut cursor).unwrap(), 1000);
    }
}
