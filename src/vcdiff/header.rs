// File header and per-window header (RFC 3284, Sections 4.1 and 4.2).

use std::io::{self, Read};

use bitflags::bitflags;

use super::DecodeError;
use super::varint;

pub const VCDIFF_MAGIC: [u8; 4] = [0xD6, 0xC3, 0xC4, 0x00];

/// Largest target window any conforming decoder has to accept.
pub const HARD_MAX_WINDOW: u64 = 1 << 24;

bitflags! {
    /// `Hdr_Indicator`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct HeaderFlags: u8 {
        const SECONDARY = 1 << 0;
        const CODETABLE = 1 << 1;
        const APPHEADER = 1 << 2;
    }

    /// `Win_Indicator`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct WindowFlags: u8 {
        const SOURCE = 1 << 0;
        const TARGET = 1 << 1;
        const ADLER32 = 1 << 2;
    }

    /// `Delta_Indicator`: which sections carry secondary compression.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DeltaFlags: u8 {
        const DATACOMP = 1 << 0;
        const INSTCOMP = 1 << 1;
        const ADDRCOMP = 1 << 2;
    }
}

/// Map EOF in the middle of a structure to `Truncated`.
pub(crate) fn truncated(e: io::Error) -> DecodeError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        DecodeError::Truncated
    } else if e.kind() == io::ErrorKind::InvalidData {
        DecodeError::InvalidInput(e.to_string())
    } else {
        DecodeError::Io(e)
    }
}

fn read_byte<R: Read>(r: &mut R) -> Result<u8, DecodeError> {
    let mut b = [0u8; 1];
    r.read_exact(&mut b).map_err(truncated)?;
    Ok(b[0])
}

/// Read one byte, or `None` on a clean end of input.
fn read_first_byte<R: Read>(r: &mut R) -> Result<Option<u8>, DecodeError> {
    let mut b = [0u8; 1];
    loop {
        match r.read(&mut b) {
            Ok(0) => return Ok(None),
            Ok(_) => return Ok(Some(b[0])),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(DecodeError::Io(e)),
        }
    }
}

fn read_varint<R: Read>(r: &mut R) -> Result<u64, DecodeError> {
    varint::read_from(r).map_err(truncated)
}

// ---------------------------------------------------------------------------
// File header
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileHeader {
    pub flags: HeaderFlags,
    pub secondary_id: Option<u8>,
    pub app_header: Option<Vec<u8>>,
}

impl FileHeader {
    pub fn new(secondary_id: Option<u8>) -> Self {
        let flags = if secondary_id.is_some() {
            HeaderFlags::SECONDARY
        } else {
            HeaderFlags::empty()
        };
        Self {
            flags,
            secondary_id,
            app_header: None,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = VCDIFF_MAGIC.to_vec();
        let mut flags = self.flags;
        flags.set(HeaderFlags::SECONDARY, self.secondary_id.is_some());
        flags.set(HeaderFlags::APPHEADER, self.app_header.is_some());
        out.push(flags.bits());
        if let Some(id) = self.secondary_id {
            out.push(id);
        }
        if let Some(app) = &self.app_header {
            varint::push(&mut out, app.len() as u64);
            out.extend_from_slice(app);
        }
        out
    }

    /// Parse a file header. Returns `None` if the input is empty.
    pub fn read_from<R: Read>(r: &mut R) -> Result<Option<Self>, DecodeError> {
        let Some(first) = read_first_byte(r)? else {
            return Ok(None);
        };
        let mut magic = [first, 0, 0, 0];
        r.read_exact(&mut magic[1..]).map_err(truncated)?;
        if magic[..3] != VCDIFF_MAGIC[..3] {
            return Err(DecodeError::InvalidInput(format!(
                "bad magic {:02X} {:02X} {:02X}",
                magic[0], magic[1], magic[2]
            )));
        }
        if magic[3] != 0 {
            return Err(DecodeError::Unsupported(format!(
                "VCDIFF version {:#04X}",
                magic[3]
            )));
        }

        let raw = read_byte(r)?;
        let flags = HeaderFlags::from_bits(raw).ok_or_else(|| {
            DecodeError::InvalidInput(format!("invalid header indicator {raw:#04X}"))
        })?;
        let secondary_id = if flags.contains(HeaderFlags::SECONDARY) {
            Some(read_byte(r)?)
        } else {
            None
        };
        if flags.contains(HeaderFlags::CODETABLE) {
            return Err(DecodeError::Unsupported(
                "application-defined code tables".into(),
            ));
        }
        let app_header = if flags.contains(HeaderFlags::APPHEADER) {
            let len = read_varint(r)?;
            let mut data = Vec::new();
            r.by_ref().take(len).read_to_end(&mut data).map_err(DecodeError::Io)?;
            if (data.len() as u64) < len {
                return Err(DecodeError::Truncated);
            }
            Some(data)
        } else {
            None
        };

        Ok(Some(Self {
            flags,
            secondary_id,
            app_header,
        }))
    }
}

// ---------------------------------------------------------------------------
// Window header
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WindowHeader {
    pub flags: WindowFlags,
    /// Length of the source segment the window copies from.
    pub copy_len: u64,
    /// Absolute offset of that segment in the source stream.
    pub copy_offset: u64,
    pub enc_len: u64,
    pub target_len: u64,
    pub delta: DeltaFlags,
    pub data_len: u64,
    pub inst_len: u64,
    pub addr_len: u64,
    pub adler32: Option<u32>,
}

impl WindowHeader {
    #[inline]
    pub fn has_source(&self) -> bool {
        self.flags.contains(WindowFlags::SOURCE)
    }

    /// `Length of the delta encoding`: everything after the field itself.
    pub fn computed_enc_len(&self) -> u64 {
        let sections = self
            .data_len
            .saturating_add(self.inst_len)
            .saturating_add(self.addr_len);
        let lengths = [self.target_len, self.data_len, self.inst_len, self.addr_len]
            .iter()
            .map(|&n| varint::encoded_len(n) as u64)
            .sum::<u64>();
        let checksum = if self.adler32.is_some() { 4 } else { 0 };
        sections.saturating_add(lengths + 1 + checksum)
    }

    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.push(self.flags.bits());
        if self.flags.intersects(WindowFlags::SOURCE | WindowFlags::TARGET) {
            varint::push(out, self.copy_len);
            varint::push(out, self.copy_offset);
        }
        varint::push(out, self.enc_len);
        varint::push(out, self.target_len);
        out.push(self.delta.bits());
        varint::push(out, self.data_len);
        varint::push(out, self.inst_len);
        varint::push(out, self.addr_len);
        if let Some(sum) = self.adler32 {
            out.extend_from_slice(&sum.to_be_bytes());
        }
    }

    /// Parse a window header. Returns `None` at a clean end of input.
    pub fn read_from<R: Read>(r: &mut R) -> Result<Option<Self>, DecodeError> {
        let Some(raw) = read_first_byte(r)? else {
            return Ok(None);
        };
        let flags = WindowFlags::from_bits(raw).ok_or_else(|| {
            DecodeError::InvalidInput(format!("invalid window indicator {raw:#04X}"))
        })?;
        if flags.contains(WindowFlags::TARGET) {
            return Err(DecodeError::Unsupported(
                "windows copying from earlier target data".into(),
            ));
        }

        let (copy_len, copy_offset) = if flags.contains(WindowFlags::SOURCE) {
            (read_varint(r)?, read_varint(r)?)
        } else {
            (0, 0)
        };
        let enc_len = read_varint(r)?;
        let target_len = read_varint(r)?;
        let raw_delta = read_byte(r)?;
        let delta = DeltaFlags::from_bits(raw_delta).ok_or_else(|| {
            DecodeError::InvalidInput(format!("invalid delta indicator {raw_delta:#04X}"))
        })?;
        let data_len = read_varint(r)?;
        let inst_len = read_varint(r)?;
        let addr_len = read_varint(r)?;
        let adler32 = if flags.contains(WindowFlags::ADLER32) {
            let mut sum = [0u8; 4];
            r.read_exact(&mut sum).map_err(truncated)?;
            Some(u32::from_be_bytes(sum))
        } else {
            None
        };

        let header = Self {
            flags,
            copy_len,
            copy_offset,
            enc_len,
            target_len,
            delta,
            data_len,
            inst_len,
            addr_len,
            adler32,
        };
        if copy_offset.checked_add(copy_len).is_none() {
            return Err(DecodeError::InvalidInput("source segment overflows".into()));
        }
        if header.computed_enc_len() != enc_len {
            return Err(DecodeError::InvalidInput(format!(
                "delta encoding length {enc_len} does not match its sections ({})",
                header.computed_enc_len()
            )));
        }
        Ok(Some(header))
    }
}

// ---------------------------------------------------------------------------
// Window record
// ---------------------------------------------------------------------------

/// A parsed window: header plus its three raw (possibly compressed) sections.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WindowRecord {
    pub header: WindowHeader,
    pub data: Vec<u8>,
    pub inst: Vec<u8>,
    pub addr: Vec<u8>,
}

impl WindowRecord {
    /// Read the sections that follow `header`.
    ///
    /// Buffers grow as bytes arrive, so a lying length field on a short
    /// input fails with `Truncated` rather than a huge allocation.
    pub fn read_sections<R: Read>(header: WindowHeader, r: &mut R) -> Result<Self, DecodeError> {
        let mut section = |len: u64| -> Result<Vec<u8>, DecodeError> {
            let mut buf = Vec::new();
            r.by_ref()
                .take(len)
                .read_to_end(&mut buf)
                .map_err(DecodeError::Io)?;
            if (buf.len() as u64) < len {
                return Err(DecodeError::Truncated);
            }
            Ok(buf)
        };
        let data = section(header.data_len)?;
        let inst = section(header.inst_len)?;
        let addr = section(header.addr_len)?;
        Ok(Self {
            header,
            data,
            inst,
            addr,
        })
    }

    /// Serialize header and sections.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(
            32 + self.data.len() + self.inst.len() + self.addr.len(),
        );
        self.header.write_to(&mut out);
        out.extend_from_slice(&self.data);
        out.extend_from_slice(&self.inst);
        out.extend_from_slice(&self.addr);
        out
    }
}
