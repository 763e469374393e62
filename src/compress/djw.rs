// DJW section decoding (secondary compressor id 1).
//
// DJW is xdelta3's semi-static Huffman coder. Only decoding is provided, so
// deltas produced by xdelta3 with DJW sections can be read back.
//
// A section is a varint plain size followed by a bit stream, read least
// significant bit first within each byte:
//   groups - 1 (3 bits), then the sector size (5 bits) if groups > 1
//   the code-length code: extra count (4 bits), then 4-bit lengths
//   code lengths for every group, move-to-front and run coded
//   one group selector per sector if groups > 1, coded the same way
//   the symbols, each sector using its group's code

use super::secondary::CompressBackend;
use crate::vcdiff::decoder::DecodeError;
use crate::vcdiff::varint;

/// Secondary compressor id for DJW.
pub const VCD_DJW_ID: u8 = 1;

const ALPHABET_SIZE: usize = 256;
const MAX_CODELEN: usize = 20;
/// Two run codes plus one code per move-to-front position.
const TOTAL_CODES: usize = MAX_CODELEN + 2;
const RUN_1: usize = 1;

const GROUP_BITS: u32 = 3;
const MAX_GROUPS: usize = 1 << GROUP_BITS;
const SECTOR_SIZE_BITS: u32 = 5;
const SECTOR_SIZE_MULT: usize = 5;

const EXTRA_CODE_BITS: u32 = 4;
/// Code lengths always present: both run codes and five positions.
const BASIC_CODES: usize = 7;
const CLCLEN_BITS: u32 = 4;
const MAX_CLCLEN: usize = 15;

const GBCLEN_BITS: u32 = 3;
const MAX_GBCLEN: usize = 7;

/// Move-to-front order code lengths start from.
const CLEN_MTF: [u8; MAX_CODELEN + 1] = [
    0, 4, 5, 6, 7, 8, 9, 10, 3, 11, 2, 12, 13, 1, 14, 15, 16, 17, 18, 19, 20,
];

fn corrupt(what: &str) -> DecodeError {
    DecodeError::InvalidInput(format!("DJW section: {what}"))
}

// ---------------------------------------------------------------------------
// Bit input
// ---------------------------------------------------------------------------

struct BitReader<'a> {
    input: &'a [u8],
    pos: usize,
    byte: u8,
    /// Next bit of `byte`; 0x100 once it is used up.
    mask: u16,
}

impl<'a> BitReader<'a> {
    fn new(input: &'a [u8]) -> Self {
        Self {
            input,
            pos: 0,
            byte: 0,
            mask: 0x100,
        }
    }

    fn bit(&mut self) -> Result<usize, DecodeError> {
        if self.mask == 0x100 {
            self.byte = *self.input.get(self.pos).ok_or(DecodeError::Truncated)?;
            self.pos += 1;
            self.mask = 1;
        }
        let bit = u16::from(self.byte) & self.mask != 0;
        self.mask <<= 1;
        Ok(usize::from(bit))
    }

    /// `n` bits, first bit most significant.
    fn bits(&mut self, n: u32) -> Result<usize, DecodeError> {
        let mut value = 0;
        for _ in 0..n {
            value = (value << 1) | self.bit()?;
        }
        Ok(value)
    }

    fn consumed(&self) -> usize {
        self.pos
    }
}

// ---------------------------------------------------------------------------
// Canonical prefix codes
// ---------------------------------------------------------------------------

/// Decoding tables for a canonical prefix code given by its code lengths.
struct PrefixCode {
    /// Symbols ordered by code.
    inorder: Vec<u16>,
    base: [usize; MAX_CODELEN + 1],
    limit: [usize; MAX_CODELEN + 1],
    min_len: usize,
    max_len: usize,
}

impl PrefixCode {
    fn new(lengths: &[u8], max_len: usize) -> Result<Self, DecodeError> {
        let mut counts = [0usize; MAX_CODELEN + 1];
        for &len in lengths {
            let len = usize::from(len);
            if len > max_len {
                return Err(corrupt("code length out of range"));
            }
            counts[len] += 1;
        }
        let min_len = (1..=max_len)
            .find(|&l| counts[l] != 0)
            .ok_or_else(|| corrupt("empty prefix code"))?;
        let max_code_len = (1..=max_len).rev().find(|&l| counts[l] != 0).unwrap_or(min_len);

        let mut first = [0usize; MAX_CODELEN + 1];
        let mut base = [0usize; MAX_CODELEN + 1];
        let mut limit = [0usize; MAX_CODELEN + 1];
        limit[min_len] = counts[min_len] - 1;
        for len in min_len + 1..=max_code_len {
            let start = (limit[len - 1] + 1) << 1;
            first[len] = first[len - 1] + counts[len - 1];
            limit[len] = start + counts[len] - 1;
            base[len] = start - first[len];
        }

        let mut inorder = vec![0u16; lengths.len()];
        for (symbol, &len) in lengths.iter().enumerate() {
            if len != 0 {
                let slot = &mut first[usize::from(len)];
                inorder[*slot] = symbol as u16;
                *slot += 1;
            }
        }
        Ok(Self {
            inorder,
            base,
            limit,
            min_len,
            max_len: max_code_len,
        })
    }

    fn decode(&self, bits: &mut BitReader<'_>) -> Result<usize, DecodeError> {
        let mut code = 0;
        for len in 1..=self.max_len {
            code = (code << 1) | bits.bit()?;
            if len >= self.min_len && code <= self.limit[len] {
                return code
                    .checked_sub(self.base[len])
                    .and_then(|i| self.inorder.get(i))
                    .map(|&symbol| usize::from(symbol))
                    .ok_or_else(|| corrupt("invalid code"));
            }
        }
        Err(corrupt("invalid code"))
    }
}

fn move_to_front(mtf: &mut [u8], index: usize) -> u8 {
    let value = mtf[index];
    mtf.copy_within(0..index, 1);
    mtf[0] = value;
    value
}

/// Fill `out` from move-to-front positions coded with `code`. Symbols 0
/// and 1 are bijective base-2 digits of a repeat count for the front
/// value. With `skip > 0`, `out[n]` is 0 without reading whenever
/// `out[n - skip]` is.
fn decode_mtf_runs(
    bits: &mut BitReader<'_>,
    code: &PrefixCode,
    mtf: &mut [u8],
    out: &mut [u8],
    skip: usize,
) -> Result<(), DecodeError> {
    let mut n = 0;
    let mut repeat = 0usize;
    let mut pending = 0usize;
    let mut shift = 0u32;
    while n < out.len() {
        if skip != 0 && n >= skip && out[n - skip] == 0 {
            out[n] = 0;
        } else if repeat != 0 {
            out[n] = mtf[0];
            repeat -= 1;
        } else if pending != 0 {
            out[n] = move_to_front(mtf, pending);
            pending = 0;
        } else {
            let symbol = code.decode(bits)?;
            if symbol <= RUN_1 {
                if shift >= usize::BITS - 2 {
                    return Err(corrupt("repeat count overflows"));
                }
                repeat = (symbol + 1) << shift;
                if repeat > out.len() - n {
                    return Err(corrupt("repeat runs past the end"));
                }
                shift += 1;
            } else {
                pending = symbol - 1;
                if pending >= mtf.len() {
                    return Err(corrupt("move-to-front position out of range"));
                }
                shift = 0;
            }
            continue;
        }
        n += 1;
    }
    if repeat != 0 {
        return Err(corrupt("repeat codes left over"));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

/// Decode the bit stream of one section into `size` bytes.
fn decode_bits(input: &[u8], size: usize) -> Result<Vec<u8>, DecodeError> {
    if size == 0 {
        return Err(corrupt("empty output"));
    }
    let mut bits = BitReader::new(input);

    let groups = bits.bits(GROUP_BITS)? + 1;
    let sector_size = if groups > 1 {
        (bits.bits(SECTOR_SIZE_BITS)? + 1) * SECTOR_SIZE_MULT
    } else {
        size
    };
    let sectors = 1 + (size - 1) / sector_size;

    let count = bits.bits(EXTRA_CODE_BITS)? + BASIC_CODES;
    let mut cl_lengths = [0u8; TOTAL_CODES];
    for len in &mut cl_lengths[..count] {
        *len = bits.bits(CLCLEN_BITS)? as u8;
    }
    let cl_code = PrefixCode::new(&cl_lengths, MAX_CLCLEN)?;
    let mut cl_mtf = CLEN_MTF;
    let mut lengths = vec![0u8; ALPHABET_SIZE * groups];
    decode_mtf_runs(&mut bits, &cl_code, &mut cl_mtf, &mut lengths, ALPHABET_SIZE)?;
    let codes = lengths
        .chunks(ALPHABET_SIZE)
        .map(|group| PrefixCode::new(group, MAX_CODELEN))
        .collect::<Result<Vec<_>, _>>()?;

    let mut selectors = vec![0u8; sectors];
    if groups > 1 {
        let mut sel_lengths = [0u8; MAX_GROUPS + 1];
        for len in &mut sel_lengths[..=groups] {
            *len = bits.bits(GBCLEN_BITS)? as u8;
        }
        let sel_code = PrefixCode::new(&sel_lengths[..=groups], MAX_GBCLEN)?;
        let mut sel_mtf: Vec<u8> = (0..=groups as u8).collect();
        decode_mtf_runs(&mut bits, &sel_code, &mut sel_mtf, &mut selectors, 0)?;
    }

    let mut out = Vec::new();
    out.try_reserve_exact(size)
        .map_err(|_| DecodeError::Allocation(size))?;
    for &group in &selectors {
        let code = codes
            .get(usize::from(group))
            .ok_or_else(|| corrupt("group selector out of range"))?;
        let n = sector_size.min(size - out.len());
        for _ in 0..n {
            out.push(code.decode(&mut bits)? as u8);
        }
    }
    if bits.consumed() != input.len() {
        return Err(corrupt("unused input"));
    }
    Ok(out)
}

/// Reads DJW-compressed sections.
#[derive(Debug, Clone, Copy, Default)]
pub struct DjwBackend;

impl CompressBackend for DjwBackend {
    fn id(&self) -> u8 {
        VCD_DJW_ID
    }

    fn compress(&self, _data: &[u8]) -> std::io::Result<Vec<u8>> {
        Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "DJW sections can only be decoded",
        ))
    }

    fn decompress(&self, data: &[u8], limit: usize) -> Result<Vec<u8>, DecodeError> {
        let (size, used) = varint::decode(data)
            .map_err(|e| corrupt(&format!("plain size: {e}")))?;
        if size > limit as u64 {
            return Err(DecodeError::SectionTooLarge {
                limit: limit as u64,
            });
        }
        decode_bits(&data[used..], size as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Pack bits into bytes, least significant bit first.
    fn pack(bits: &str) -> Vec<u8> {
        let bits: Vec<u8> = bits.bytes().filter(|b| !b.is_ascii_whitespace()).collect();
        bits.chunks(8)
            .map(|chunk| {
                chunk
                    .iter()
                    .enumerate()
                    .fold(0u8, |byte, (i, &b)| byte | (u8::from(b == b'1') << i))
            })
            .collect()
    }

    #[test]
    fn bits_are_read_low_bit_first() {
        let input = [0b0000_0110, 0b1000_0000];
        let mut bits = BitReader::new(&input);
        assert_eq!(bits.bits(3).unwrap(), 0b011);
        assert_eq!(bits.bits(5).unwrap(), 0);
        assert_eq!(bits.bits(8).unwrap(), 1);
        assert!(matches!(bits.bit(), Err(DecodeError::Truncated)));
    }

    #[test]
    fn canonical_code_assignment() {
        // a=2 bits, b=1 bit, c=3 bits, d=3 bits: b=0 a=10 c=110 d=111.
        let code = PrefixCode::new(&[2, 1, 3, 3], 20).unwrap();
        let input = pack("0 10 110 111");
        let mut bits = BitReader::new(&input);
        let symbols: Vec<usize> = (0..4).map(|_| code.decode(&mut bits).unwrap()).collect();
        assert_eq!(symbols, [1, 0, 2, 3]);
    }

    #[test]
    fn empty_or_oversized_lengths_rejected() {
        assert!(PrefixCode::new(&[0, 0, 0], 20).is_err());
        assert!(PrefixCode::new(&[1, 9], 7).is_err());
    }

    #[test]
    fn runs_repeat_the_front_value() {
        // Symbols 0..=3 with 2-bit codes: RUN_0, RUN_1, position 1, position 2.
        let code = PrefixCode::new(&[2, 2, 2, 2], 20).unwrap();
        // RUN_1 RUN_0 = 2 + 1*2 = 4 copies of mtf[0], then position 2.
        let input = pack("01 00 11");
        let mut bits = BitReader::new(&input);
        let mut mtf = [7u8, 8, 9];
        let mut out = [0u8; 5];
        decode_mtf_runs(&mut bits, &code, &mut mtf, &mut out, 0).unwrap();
        assert_eq!(out, [7, 7, 7, 7, 9]);
        assert_eq!(mtf, [9, 7, 8]);
    }

    #[test]
    fn overlong_repeat_rejected() {
        let code = PrefixCode::new(&[2, 2, 2, 2], 20).unwrap();
        let input = pack("01 01");
        let mut bits = BitReader::new(&input);
        let mut mtf = [1u8, 2, 3];
        let mut out = [0u8; 3];
        assert!(decode_mtf_runs(&mut bits, &code, &mut mtf, &mut out, 0).is_err());
    }

    #[test]
    fn declared_size_is_bounded() {
        let mut section = Vec::new();
        varint::push(&mut section, 1 << 30);
        section.extend_from_slice(&[0; 8]);
        assert!(matches!(
            DjwBackend.decompress(&section, 1 << 20),
            Err(DecodeError::SectionTooLarge { limit }) if limit == 1 << 20
        ));
    }

    #[test]
    fn garbage_never_panics() {
        let mut state = 17u32;
        for len in 0..64 {
            let mut section = vec![0x40];
            section.extend((0..len).map(|_| {
                state = state.wrapping_mul(1_103_515_245).wrapping_add(12_345);
                (state >> 16) as u8
            }));
            let _ = DjwBackend.decompress(&section, 1 << 16);
        }
    }
}
