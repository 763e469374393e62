// Secondary compression of window sections.
//
// A window's DATA, INST and ADDR sections may each be compressed again with a
// general-purpose compressor named by the file header's secondary id:
//   ID 1 = DJW (feature `djw-secondary`), decode only, as written by xdelta3
//   ID 2 = LZMA (lzma-rs, feature `lzma-secondary`), raw .lzma sections
//   ID 3 = Zlib (flate2, feature `zlib-secondary`)
//
// LZMA and Zlib sections use this crate's own framing and are not readable
// by xdelta3. A section is only stored compressed when that makes it
// smaller; the window's delta indicator records which ones were.

use std::borrow::Cow;
use std::io;

#[cfg(feature = "djw-secondary")]
use super::djw::{DjwBackend, VCD_DJW_ID};
use crate::vcdiff::decoder::DecodeError;
use crate::vcdiff::encoder::WindowSections;
use crate::vcdiff::header::{DeltaFlags, WindowRecord};

/// Secondary compressor id for LZMA.
pub const VCD_LZMA_ID: u8 = 2;

/// Secondary compressor id for Zlib.
pub const VCD_ZLIB_ID: u8 = 3;

/// Sections shorter than this are never worth compressing.
const MIN_COMPRESS_SIZE: usize = 32;

/// A pluggable secondary compressor.
pub trait CompressBackend: Send + Sync {
    /// Id stored in the file header.
    fn id(&self) -> u8;

    fn compress(&self, data: &[u8]) -> io::Result<Vec<u8>>;

    /// Expand one section. Output longer than `limit` bytes fails with
    /// [`DecodeError::SectionTooLarge`].
    fn decompress(&self, data: &[u8], limit: usize) -> Result<Vec<u8>, DecodeError>;

    fn should_compress(&self, data: &[u8]) -> bool {
        data.len() >= MIN_COMPRESS_SIZE
    }
}

// ---------------------------------------------------------------------------
// LZMA
// ---------------------------------------------------------------------------

#[cfg(feature = "lzma-secondary")]
#[derive(Debug, Clone, Copy, Default)]
pub struct LzmaBackend;

#[cfg(feature = "lzma-secondary")]
impl CompressBackend for LzmaBackend {
    fn id(&self) -> u8 {
        VCD_LZMA_ID
    }

    fn compress(&self, data: &[u8]) -> io::Result<Vec<u8>> {
        let options = lzma_rs::compress::Options {
            unpacked_size: lzma_rs::compress::UnpackedSize::WriteToHeader(Some(data.len() as u64)),
        };
        let mut input = io::Cursor::new(data);
        let mut output = Vec::new();
        lzma_rs::lzma_compress_with_options(&mut input, &mut output, &options)?;
        Ok(output)
    }

    fn decompress(&self, data: &[u8], limit: usize) -> Result<Vec<u8>, DecodeError> {
        // Header: properties (1), dictionary size (4), plain size (8, LE).
        if let Some(size) = data.get(5..13) {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(size);
            let size = u64::from_le_bytes(raw);
            if size != u64::MAX && size > limit as u64 {
                return Err(DecodeError::SectionTooLarge {
                    limit: limit as u64,
                });
            }
        }
        let options = lzma_rs::decompress::Options {
            memlimit: Some(limit.max(1)),
            ..Default::default()
        };
        let mut input = io::BufReader::new(io::Cursor::new(data));
        let mut output = BoundedSink::new(limit);
        match lzma_rs::lzma_decompress_with_options(&mut input, &mut output, &options) {
            Ok(()) => Ok(output.bytes),
            Err(_) if output.overflowed => Err(DecodeError::SectionTooLarge {
                limit: limit as u64,
            }),
            Err(lzma_rs::error::Error::LzmaError(msg)) if msg.contains("memory limit") => {
                Err(DecodeError::SectionTooLarge {
                    limit: limit as u64,
                })
            }
            Err(e) => Err(DecodeError::InvalidInput(format!("LZMA section: {e}"))),
        }
    }
}

/// Collects decoder output, refusing to grow past `limit` bytes.
#[cfg(feature = "lzma-secondary")]
struct BoundedSink {
    bytes: Vec<u8>,
    limit: usize,
    overflowed: bool,
}

#[cfg(feature = "lzma-secondary")]
impl BoundedSink {
    fn new(limit: usize) -> Self {
        Self {
            bytes: Vec::new(),
            limit,
            overflowed: false,
        }
    }
}

#[cfg(feature = "lzma-secondary")]
impl io::Write for BoundedSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.bytes.len() + buf.len() > self.limit {
            self.overflowed = true;
            return Err(io::Error::other("section exceeds its size limit"));
        }
        self.bytes.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Zlib
// ---------------------------------------------------------------------------

/// Zlib-framed deflate, so each section carries its own checksum.
#[cfg(feature = "zlib-secondary")]
#[derive(Debug, Clone, Copy)]
pub struct ZlibBackend {
    level: flate2::Compression,
}

#[cfg(feature = "zlib-secondary")]
impl ZlibBackend {
    /// `level` is clamped to 0..=9.
    pub fn new(level: u32) -> Self {
        Self {
            level: flate2::Compression::new(level.min(9)),
        }
    }
}

#[cfg(feature = "zlib-secondary")]
impl Default for ZlibBackend {
    fn default() -> Self {
        Self::new(6)
    }
}

#[cfg(feature = "zlib-secondary")]
impl CompressBackend for ZlibBackend {
    fn id(&self) -> u8 {
        VCD_ZLIB_ID
    }

    fn compress(&self, data: &[u8]) -> io::Result<Vec<u8>> {
        use flate2::write::ZlibEncoder;
        use io::Write;

        let mut encoder = ZlibEncoder::new(Vec::new(), self.level);
        encoder.write_all(data)?;
        encoder.finish()
    }

    fn decompress(&self, data: &[u8], limit: usize) -> Result<Vec<u8>, DecodeError> {
        use flate2::read::ZlibDecoder;
        use io::Read;

        let mut output = Vec::new();
        ZlibDecoder::new(data)
            .take(limit as u64 + 1)
            .read_to_end(&mut output)
            .map_err(|e| DecodeError::InvalidInput(format!("Zlib section: {e}")))?;
        if output.len() > limit {
            return Err(DecodeError::SectionTooLarge {
                limit: limit as u64,
            });
        }
        Ok(output)
    }
}

// ---------------------------------------------------------------------------
// Selection
// ---------------------------------------------------------------------------

/// Which secondary compressor an encoding session applies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SecondaryCompression {
    #[default]
    None,
    #[cfg(feature = "lzma-secondary")]
    Lzma,
    #[cfg(feature = "zlib-secondary")]
    Zlib { level: u32 },
}

impl SecondaryCompression {
    pub fn backend(&self) -> Option<Box<dyn CompressBackend>> {
        match self {
            Self::None => None,
            #[cfg(feature = "lzma-secondary")]
            Self::Lzma => Some(Box::new(LzmaBackend)),
            #[cfg(feature = "zlib-secondary")]
            Self::Zlib { level } => Some(Box::new(ZlibBackend::new(*level))),
        }
    }

    /// Id written to the file header, if any.
    pub fn id(&self) -> Option<u8> {
        match self {
            Self::None => None,
            #[cfg(feature = "lzma-secondary")]
            Self::Lzma => Some(VCD_LZMA_ID),
            #[cfg(feature = "zlib-secondary")]
            Self::Zlib { .. } => Some(VCD_ZLIB_ID),
        }
    }

    /// Parse a CLI name: `none`, `lzma`, `zlib` or `zlib:<level>`.
    pub fn parse(name: &str) -> Result<Self, String> {
        let (kind, level) = match name.split_once(':') {
            Some((kind, level)) => (kind, Some(level)),
            None => (name, None),
        };
        match (kind.to_ascii_lowercase().as_str(), level) {
            ("none", None) => Ok(Self::None),
            #[cfg(feature = "lzma-secondary")]
            ("lzma", None) => Ok(Self::Lzma),
            #[cfg(feature = "zlib-secondary")]
            ("zlib", level) => {
                let level = match level {
                    Some(l) => l
                        .parse::<u32>()
                        .ok()
                        .filter(|&l| l <= 9)
                        .ok_or_else(|| format!("invalid zlib level: {l}"))?,
                    None => 6,
                };
                Ok(Self::Zlib { level })
            }
            _ => Err(format!("unknown or disabled secondary compressor: {name}")),
        }
    }
}

impl std::fmt::Display for SecondaryCompression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            #[cfg(feature = "lzma-secondary")]
            Self::Lzma => write!(f, "lzma"),
            #[cfg(feature = "zlib-secondary")]
            Self::Zlib { level } => write!(f, "zlib:{level}"),
        }
    }
}

/// Decode-side dispatch on the file header's secondary id.
pub fn backend_for_id(secondary_id: Option<u8>) -> Result<Box<dyn CompressBackend>, DecodeError> {
    match secondary_id {
        #[cfg(feature = "djw-secondary")]
        Some(VCD_DJW_ID) => Ok(Box::new(DjwBackend)),

        #[cfg(feature = "lzma-secondary")]
        Some(VCD_LZMA_ID) => Ok(Box::new(LzmaBackend)),

        #[cfg(not(feature = "lzma-secondary"))]
        Some(VCD_LZMA_ID) => Err(DecodeError::Unsupported(
            "LZMA sections need the 'lzma-secondary' feature".into(),
        )),

        #[cfg(feature = "zlib-secondary")]
        Some(VCD_ZLIB_ID) => Ok(Box::new(ZlibBackend::default())),

        #[cfg(not(feature = "zlib-secondary"))]
        Some(VCD_ZLIB_ID) => Err(DecodeError::Unsupported(
            "Zlib sections need the 'zlib-secondary' feature".into(),
        )),

        Some(id) => Err(DecodeError::Unsupported(format!(
            "secondary compressor id {id}"
        ))),
        None => Err(DecodeError::InvalidInput(
            "window has compressed sections but the file header names no compressor".into(),
        )),
    }
}

// ---------------------------------------------------------------------------
// Section helpers
// ---------------------------------------------------------------------------

fn compress_one(
    backend: &dyn CompressBackend,
    section: &mut Vec<u8>,
    flag: DeltaFlags,
    delta: &mut DeltaFlags,
) -> io::Result<()> {
    if !backend.should_compress(section) {
        return Ok(());
    }
    let packed = backend.compress(section)?;
    if packed.len() < section.len() {
        *section = packed;
        delta.insert(flag);
    }
    Ok(())
}

/// Compress each section of `sections` in place where it pays off.
pub fn compress_sections(
    backend: &dyn CompressBackend,
    sections: &mut WindowSections,
) -> io::Result<()> {
    let mut delta = sections.delta;
    compress_one(backend, &mut sections.data, DeltaFlags::DATACOMP, &mut delta)?;
    compress_one(backend, &mut sections.inst, DeltaFlags::INSTCOMP, &mut delta)?;
    compress_one(backend, &mut sections.addr, DeltaFlags::ADDRCOMP, &mut delta)?;
    sections.delta = delta;
    Ok(())
}

/// Plain DATA, INST and ADDR sections of a window record.
pub type PlainSections<'a> = (Cow<'a, [u8]>, Cow<'a, [u8]>, Cow<'a, [u8]>);

fn plain_section<'r>(
    backend: &dyn CompressBackend,
    delta: DeltaFlags,
    bytes: &'r [u8],
    flag: DeltaFlags,
    limit: u64,
) -> Result<Cow<'r, [u8]>, DecodeError> {
    if !delta.contains(flag) {
        return Ok(Cow::Borrowed(bytes));
    }
    let limit = usize::try_from(limit).unwrap_or(usize::MAX);
    Ok(Cow::Owned(backend.decompress(bytes, limit)?))
}

/// Undo secondary compression on the sections flagged in the record.
///
/// No section may expand past `limit` bytes, and DATA never past the
/// window's target length.
pub fn decompress_sections(
    record: &WindowRecord,
    secondary_id: Option<u8>,
    limit: u64,
) -> Result<PlainSections<'_>, DecodeError> {
    let delta = record.header.delta;
    if delta.is_empty() {
        return Ok((
            Cow::Borrowed(&record.data),
            Cow::Borrowed(&record.inst),
            Cow::Borrowed(&record.addr),
        ));
    }

    let backend = backend_for_id(secondary_id)?;
    let backend = backend.as_ref();
    let data_limit = limit.min(record.header.target_len);
    let data = plain_section(backend, delta, &record.data, DeltaFlags::DATACOMP, data_limit)?;
    let inst = plain_section(backend, delta, &record.inst, DeltaFlags::INSTCOMP, limit)?;
    let addr = plain_section(backend, delta, &record.addr, DeltaFlags::ADDRCOMP, limit)?;
    Ok((data, inst, addr))
}
