// Transform core: one target window in, one window record out (and back).
//
// The session only deals in windows and segments; everything about how a
// window is matched and laid out on the wire sits behind `TransformCore`.

use crate::compress::pipeline;
use crate::compress::secondary::{self, CompressBackend};
use crate::config::StreamConfig;
use crate::error::StreamError;
use crate::hash::config::profile_for_level;
use crate::hash::matching::MatchEngine;
use crate::vcdiff::{DecodeError, Instruction, WindowEncoder, WindowRecord, adler32, decode_window};
use crate::window::SourceSegment;

/// Encodes and decodes single windows.
pub trait TransformCore {
    /// Encode `target` as one complete window record, optionally copying
    /// from `source`.
    fn encode(
        &mut self,
        target: &[u8],
        source: Option<&SourceSegment<'_>>,
    ) -> Result<Vec<u8>, StreamError>;

    /// Reconstruct the target window of `record`.
    ///
    /// `secondary_id` comes from the file header. `source` covers exactly
    /// the segment the record's header names.
    fn decode(
        &mut self,
        record: &WindowRecord,
        secondary_id: Option<u8>,
        source: Option<&SourceSegment<'_>>,
    ) -> Result<Vec<u8>, DecodeError>;

    /// Secondary compressor id for the file header.
    fn secondary_id(&self) -> Option<u8>;

    /// Drop state carried between windows.
    fn reset(&mut self) {}
}

/// The default core: block matcher plus RFC 3284 window layout.
pub struct VcdiffCore {
    level: u32,
    checksum: bool,
    /// Largest plain section a compressed one may expand to.
    section_limit: u64,
    secondary: Option<Box<dyn CompressBackend>>,
    engine: MatchEngine,
}

impl VcdiffCore {
    pub fn new(config: &StreamConfig) -> Self {
        Self {
            level: config.level,
            checksum: config.checksum,
            section_limit: config.max_window_size as u64,
            secondary: config.secondary.backend(),
            engine: MatchEngine::new(profile_for_level(config.level)),
        }
    }

    pub fn level(&self) -> u32 {
        self.level
    }

    fn instructions(&mut self, target: &[u8], source: Option<&SourceSegment<'_>>) -> Vec<Instruction> {
        if self.level == 0 {
            return if target.is_empty() {
                Vec::new()
            } else {
                vec![Instruction::Add {
                    len: target.len() as u32,
                }]
            };
        }
        let copy_len = source.map_or(0, |s| s.len());
        let raw = self.engine.find_matches(target, source);
        pipeline::optimize(&raw, target, copy_len)
    }
}

impl std::fmt::Debug for VcdiffCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VcdiffCore")
            .field("level", &self.level)
            .field("checksum", &self.checksum)
            .field("secondary", &self.secondary.as_ref().map(|b| b.id()))
            .finish()
    }
}

impl TransformCore for VcdiffCore {
    fn encode(
        &mut self,
        target: &[u8],
        source: Option<&SourceSegment<'_>>,
    ) -> Result<Vec<u8>, StreamError> {
        let mut insts = self.instructions(target, source);
        let seg_len = source.map_or(0, |s| s.len());
        let uses_source = insts
            .iter()
            .any(|i| matches!(*i, Instruction::Copy { addr, .. } if addr < seg_len));

        // A window that never touches the source is written without one.
        let segment = match source {
            Some(s) if uses_source => Some((s.len(), s.offset())),
            _ => {
                if seg_len > 0 {
                    for inst in &mut insts {
                        if let Instruction::Copy { addr, .. } = inst {
                            *addr -= seg_len;
                        }
                    }
                }
                None
            }
        };

        let mut enc = WindowEncoder::new(segment.map_or(0, |(len, _)| len));
        let mut pos = 0usize;
        for inst in &insts {
            let len = inst.len() as usize;
            match *inst {
                Instruction::Add { .. } => enc.add(&target[pos..pos + len]),
                Instruction::Run { len } => enc.run(target[pos], len),
                Instruction::Copy { len, addr } => enc.copy(addr, len),
            }
            pos += len;
        }

        let mut sections = enc.finish();
        if let Some(backend) = &self.secondary {
            secondary::compress_sections(backend.as_ref(), &mut sections)?;
        }
        let checksum = self.checksum.then(|| adler32(target));
        Ok(sections.assemble(segment, checksum))
    }

    fn decode(
        &mut self,
        record: &WindowRecord,
        secondary_id: Option<u8>,
        source: Option<&SourceSegment<'_>>,
    ) -> Result<Vec<u8>, DecodeError> {
        decode_window(record, secondary_id, source, self.checksum, self.section_limit)
    }

    fn secondary_id(&self) -> Option<u8> {
        self.secondary.as_ref().map(|b| b.id())
    }

    fn reset(&mut self) {
        self.engine.reset();
    }
}
