// Window decoder: executes a window's instructions against the source
// segment and the target bytes produced so far.

use thiserror::Error;

use super::address_cache::AddressCache;
use super::code_table::{Op, table};
use super::header::WindowRecord;
use super::{adler32, varint};
use crate::compress::secondary;
use crate::window::SourceSegment;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("truncated input")]
    Truncated,
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("checksum mismatch: expected {expected:#010X}, got {actual:#010X}")]
    ChecksumMismatch { expected: u32, actual: u32 },
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("section expands past the {limit}-byte limit")]
    SectionTooLarge { limit: u64 },
    #[error("failed to allocate {0} bytes")]
    Allocation(usize),
}

/// Cursor over the three sections of a window.
struct Sections<'a> {
    data: &'a [u8],
    inst: &'a [u8],
    addr: &'a [u8],
    data_pos: usize,
    inst_pos: usize,
    addr_pos: usize,
}

impl<'a> Sections<'a> {
    fn explicit_size(&mut self) -> Result<u32, DecodeError> {
        let rest = &self.inst[self.inst_pos..];
        let (size, used) = varint::decode_u32(rest)
            .map_err(|e| DecodeError::InvalidInput(format!("instruction size: {e}")))?;
        self.inst_pos += used;
        Ok(size)
    }

    fn literal(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        let end = self
            .data_pos
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| DecodeError::InvalidInput("data section underflow".into()))?;
        let bytes = &self.data[self.data_pos..end];
        self.data_pos = end;
        Ok(bytes)
    }
}

/// Decode one window record.
///
/// `secondary_id` comes from the file header; `source` must cover exactly
/// the segment the window header names. Compressed sections may expand to
/// at most `section_limit` bytes each.
pub fn decode_window(
    record: &WindowRecord,
    secondary_id: Option<u8>,
    source: Option<&SourceSegment<'_>>,
    verify_checksum: bool,
    section_limit: u64,
) -> Result<Vec<u8>, DecodeError> {
    let header = &record.header;
    let (data, inst, addr) = secondary::decompress_sections(record, secondary_id, section_limit)?;

    let copy_len = if header.has_source() {
        let segment = source.ok_or_else(|| {
            DecodeError::InvalidInput("window copies from a source but none is available".into())
        })?;
        if segment.len() != header.copy_len {
            return Err(DecodeError::InvalidInput(format!(
                "source segment holds {} bytes, window needs {}",
                segment.len(),
                header.copy_len
            )));
        }
        header.copy_len
    } else {
        0
    };

    let target_len = usize::try_from(header.target_len)
        .map_err(|_| DecodeError::InvalidInput("target window too large".into()))?;
    let mut out = Vec::new();
    out.try_reserve_exact(target_len)
        .map_err(|_| DecodeError::Allocation(target_len))?;

    let mut sections = Sections {
        data: &data,
        inst: &inst,
        addr: &addr,
        data_pos: 0,
        inst_pos: 0,
        addr_pos: 0,
    };
    let mut cache = AddressCache::new();
    let codes = table();

    while sections.inst_pos < sections.inst.len() {
        let opcode = codes[sections.inst[sections.inst_pos] as usize];
        sections.inst_pos += 1;
        for (op, size) in [opcode.first, opcode.second] {
            if op == Op::Noop {
                continue;
            }
            let size = if size == 0 {
                sections.explicit_size()?
            } else {
                u32::from(size)
            };
            if out.len() as u64 + u64::from(size) > header.target_len {
                return Err(DecodeError::InvalidInput(format!(
                    "instructions overrun the {}-byte target window",
                    header.target_len
                )));
            }
            execute(op, size as usize, &mut sections, &mut cache, copy_len, source, &mut out)?;
        }
    }

    if out.len() as u64 != header.target_len {
        return Err(DecodeError::InvalidInput(format!(
            "window produced {} bytes, header declares {}",
            out.len(),
            header.target_len
        )));
    }
    if sections.data_pos != data.len() || sections.addr_pos != addr.len() {
        return Err(DecodeError::InvalidInput(
            "unused bytes left in data or address section".into(),
        ));
    }
    if verify_checksum && let Some(expected) = header.adler32 {
        let actual = adler32(&out);
        if actual != expected {
            return Err(DecodeError::ChecksumMismatch { expected, actual });
        }
    }
    Ok(out)
}

fn execute(
    op: Op,
    size: usize,
    sections: &mut Sections<'_>,
    cache: &mut AddressCache,
    copy_len: u64,
    source: Option<&SourceSegment<'_>>,
    out: &mut Vec<u8>,
) -> Result<(), DecodeError> {
    match op {
        Op::Noop => {}
        Op::Add => {
            let bytes = sections.literal(size)?;
            out.extend_from_slice(bytes);
        }
        Op::Run => {
            let byte = sections.literal(1)?[0];
            out.resize(out.len() + size, byte);
        }
        Op::Copy(mode) => {
            let here = copy_len + out.len() as u64;
            let addr = cache
                .decode(mode, sections.addr, &mut sections.addr_pos, here)
                .map_err(|e| DecodeError::InvalidInput(e.to_string()))?;

            if addr < copy_len {
                if addr + size as u64 > copy_len {
                    return Err(DecodeError::InvalidInput(
                        "copy spans the source and target regions".into(),
                    ));
                }
                let copied = source.is_some_and(|segment| segment.copy_into(addr, size, out));
                if !copied {
                    return Err(DecodeError::InvalidInput(format!(
                        "copy of {size} bytes at source offset {addr} is out of range"
                    )));
                }
            } else {
                let start = (addr - copy_len) as usize;
                if start + size <= out.len() {
                    out.extend_from_within(start..start + size);
                } else {
                    // Overlapping copy: each byte may be one just written.
                    for i in 0..size {
                        let byte = out[start + i];
                        out.push(byte);
                    }
                }
            }
        }
    }
    Ok(())
}
