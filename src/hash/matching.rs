// Block matching for one target window.
//
// For every target position the engine tries, in order:
//   1. a run of identical bytes
//   2. a source copy found through the rolling-hash source index, extended
//      backwards over pending literal bytes
//   3. a self copy from earlier in the target, found through 4-byte hash
//      chains
// and otherwise leaves the byte as a literal. Literal stretches become ADDs.

use super::config::{MIN_MATCH, MIN_RUN, MatchProfile};
use super::rolling::{self, RollingHash};
use crate::vcdiff::code_table::Instruction;
use crate::window::SourceSegment;

const EMPTY: u32 = u32::MAX;

const SOURCE_MIN_BITS: u32 = 8;
const SOURCE_MAX_BITS: u32 = 24;
const TARGET_MIN_BITS: u32 = 8;
const TARGET_MAX_BITS: u32 = 20;

/// A candidate copy covering `target[start..end]`.
#[derive(Debug, Clone, Copy)]
struct Found {
    start: usize,
    end: usize,
    /// Address in the window's address space.
    addr: u64,
}

impl Found {
    #[inline]
    fn len(&self) -> usize {
        self.end - self.start
    }
}

// ---------------------------------------------------------------------------
// Source index
// ---------------------------------------------------------------------------

/// Rolling-hash buckets over one source segment. The first position that
/// lands in a bucket keeps it.
struct SourceIndex {
    /// (offset, length) of the indexed segment.
    key: Option<(u64, u64)>,
    bits: u32,
    /// Segment-relative position + 1; 0 is an empty bucket.
    slots: Vec<u64>,
}

impl SourceIndex {
    fn new() -> Self {
        Self {
            key: None,
            bits: SOURCE_MIN_BITS,
            slots: Vec::new(),
        }
    }

    fn build(&mut self, segment: &SourceSegment<'_>, hasher: &RollingHash, step: usize) {
        let key = (segment.offset(), segment.len());
        if self.key == Some(key) {
            return;
        }
        self.key = Some(key);

        let len = segment.len() as usize;
        let step = step.max(1);
        self.bits = rolling::table_bits(len / step + 1, SOURCE_MIN_BITS, SOURCE_MAX_BITS);
        self.slots.clear();
        self.slots.resize(1 << self.bits, 0);

        let look = hasher.look();
        let mut scratch = Vec::with_capacity(look);
        let mut pos = 0usize;
        while pos + look <= len {
            let chunk = segment.chunk_at(pos as u64);
            let hash = if chunk.len() >= look {
                hasher.checksum(chunk)
            } else {
                // Straddles a block boundary.
                scratch.clear();
                if !segment.copy_into(pos as u64, look, &mut scratch) {
                    break;
                }
                hasher.checksum(&scratch)
            };
            let slot = &mut self.slots[rolling::bucket(hash, self.bits)];
            if *slot == 0 {
                *slot = pos as u64 + 1;
            }
            pos += step;
        }
        log::trace!(
            "indexed source segment at {} ({} bytes, {} buckets)",
            key.0,
            key.1,
            self.slots.len()
        );
    }

    #[inline]
    fn lookup(&self, hash: u64) -> Option<u64> {
        self.slots
            .get(rolling::bucket(hash, self.bits))
            .and_then(|&slot| slot.checked_sub(1))
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Turns target windows into ADD/COPY/RUN instructions.
///
/// COPY addresses are in the window's address space: `0..copy_len` is the
/// source segment, `copy_len + i` is byte `i` of the target window.
pub struct MatchEngine {
    profile: MatchProfile,
    hasher: RollingHash,
    source: SourceIndex,
    heads: Vec<u32>,
    prev: Vec<u32>,
    head_bits: u32,
    /// Absolute source offset just past a source copy that ran to the end
    /// of the previous window.
    resume_at: Option<u64>,
}

impl MatchEngine {
    pub fn new(profile: MatchProfile) -> Self {
        Self {
            profile,
            hasher: RollingHash::new(profile.source_look.max(MIN_MATCH)),
            source: SourceIndex::new(),
            heads: Vec::new(),
            prev: Vec::new(),
            head_bits: TARGET_MIN_BITS,
            resume_at: None,
        }
    }

    pub fn profile(&self) -> &MatchProfile {
        &self.profile
    }

    /// Forget the source index and cross-window state.
    pub fn reset(&mut self) {
        self.source = SourceIndex::new();
        self.heads = Vec::new();
        self.prev = Vec::new();
        self.resume_at = None;
    }

    /// Instructions reproducing `target`, possibly copying from `source`.
    ///
    /// The instruction lengths always sum to `target.len()`.
    pub fn find_matches(
        &mut self,
        target: &[u8],
        source: Option<&SourceSegment<'_>>,
    ) -> Vec<Instruction> {
        let n = target.len();
        let copy_len = source.map_or(0, |s| s.len());
        let look = self.hasher.look();
        if let Some(segment) = source {
            self.source
                .build(segment, &self.hasher, self.profile.source_step);
        }
        self.prepare_target(n);

        let mut out = Vec::with_capacity(n / 32 + 4);
        let mut lit_start = 0usize;
        let mut pos = 0usize;
        let mut indexed = 0usize;
        let mut rolled: Option<(usize, u64)> = None;

        // Continue a source copy cut off by the previous window boundary.
        if let (Some(segment), Some(abs)) = (source, self.resume_at.take())
            && abs >= segment.offset()
            && abs - segment.offset() < segment.len()
        {
            let rel = abs - segment.offset();
            let len = segment.match_forward(rel, target);
            if len >= MIN_MATCH {
                out.push(Instruction::Copy {
                    len: len as u32,
                    addr: rel,
                });
                if len == n {
                    self.resume_at = Some(abs + len as u64);
                }
                pos = len;
                lit_start = len;
            }
        }

        while pos + MIN_MATCH <= n {
            let run = rolling::run_length(&target[pos..], target[pos], n - pos);
            if run >= MIN_RUN {
                flush_literal(&mut out, lit_start, pos);
                out.push(Instruction::Run { len: run as u32 });
                pos += run;
                lit_start = pos;
                continue;
            }

            self.index_target(target, &mut indexed, pos);

            let mut best: Option<Found> = None;
            if let Some(segment) = source
                && pos + look <= n
            {
                let hash = match rolled {
                    Some((at, hash)) if at + 1 == pos => {
                        self.hasher.roll(hash, target[at], target[at + look])
                    }
                    _ => self.hasher.checksum(&target[pos..]),
                };
                rolled = Some((pos, hash));
                best = self.source_match(segment, hash, target, pos, lit_start);
            }

            let best_end = best.map_or(pos, |f| f.end);
            if best_end - pos < self.profile.long_enough
                && let Some(found) = self.self_match(target, pos, lit_start, copy_len)
                && found.end > best_end
            {
                best = Some(found);
            }

            match best {
                Some(found) => {
                    flush_literal(&mut out, lit_start, found.start);
                    out.push(Instruction::Copy {
                        len: found.len() as u32,
                        addr: found.addr,
                    });
                    if found.addr < copy_len
                        && found.end == n
                        && let Some(segment) = source
                    {
                        self.resume_at =
                            Some(segment.offset() + found.addr + found.len() as u64);
                    }
                    pos = found.end;
                    lit_start = pos;
                }
                None => pos += 1,
            }
        }
        flush_literal(&mut out, lit_start, n);
        out
    }

    fn prepare_target(&mut self, n: usize) {
        self.head_bits = rolling::table_bits(n, TARGET_MIN_BITS, TARGET_MAX_BITS);
        self.heads.clear();
        self.heads.resize(1 << self.head_bits, EMPTY);
        self.prev.clear();
        self.prev.resize(n, EMPTY);
    }

    /// Add target positions `*indexed..upto` to the hash chains.
    fn index_target(&mut self, target: &[u8], indexed: &mut usize, upto: usize) {
        let last = upto.min(target.len().saturating_sub(MIN_MATCH - 1));
        for i in *indexed..last {
            let b = rolling::bucket(u64::from(rolling::small_hash(&target[i..])), self.head_bits);
            self.prev[i] = self.heads[b];
            self.heads[b] = i as u32;
        }
        *indexed = (*indexed).max(upto);
    }

    fn source_match(
        &self,
        segment: &SourceSegment<'_>,
        hash: u64,
        target: &[u8],
        pos: usize,
        lit_start: usize,
    ) -> Option<Found> {
        let rel = self.source.lookup(hash)?;
        let fwd = segment.match_forward(rel, &target[pos..]);
        if fwd < MIN_MATCH {
            return None;
        }
        let back = segment.match_backward(rel, &target[lit_start..pos], pos - lit_start);
        Some(Found {
            start: pos - back,
            end: pos + fwd,
            addr: rel - back as u64,
        })
    }

    fn self_match(
        &self,
        target: &[u8],
        pos: usize,
        lit_start: usize,
        copy_len: u64,
    ) -> Option<Found> {
        let b = rolling::bucket(u64::from(rolling::small_hash(&target[pos..])), self.head_bits);
        let mut cand = self.heads[b];
        let mut best: Option<Found> = None;

        for _ in 0..self.profile.chain_depth {
            if cand == EMPTY {
                break;
            }
            let c = cand as usize;
            let fwd = rolling::forward_match(&target[c..], &target[pos..]);
            if fwd >= MIN_MATCH {
                let limit = (pos - lit_start).min(c);
                let back = rolling::backward_match(&target[c - limit..c], &target[pos - limit..pos]);
                let found = Found {
                    start: pos - back,
                    end: pos + fwd,
                    addr: copy_len + (c - back) as u64,
                };
                if best.is_none_or(|b| found.len() > b.len()) {
                    best = Some(found);
                    if fwd >= self.profile.long_enough {
                        break;
                    }
                }
            }
            cand = self.prev[c];
        }
        best
    }
}

#[inline]
fn flush_literal(out: &mut Vec<Instruction>, from: usize, to: usize) {
    if to > from {
        out.push(Instruction::Add {
            len: (to - from) as u32,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::config::{DEFAULT, FASTEST, SLOW};
    use crate::vcdiff::{decode_window, WindowEncoder, WindowHeader, WindowRecord};

    fn lcg_bytes(len: usize, seed: u32) -> Vec<u8> {
        let mut state = seed;
        (0..len)
            .map(|_| {
                state = state.wrapping_mul(1_103_515_245).wrapping_add(12_345);
                (state >> 16) as u8
            })
            .collect()
    }

    fn covered(insts: &[Instruction]) -> usize {
        insts.iter().map(|i| i.len() as usize).sum()
    }

    /// Encode `insts` as a window and decode it again.
    fn replay(insts: &[Instruction], target: &[u8], source: Option<&SourceSegment<'_>>) -> Vec<u8> {
        let copy_len = source.map_or(0, |s| s.len());
        let mut enc = WindowEncoder::new(copy_len);
        let mut pos = 0usize;
        for inst in insts {
            match *inst {
                Instruction::Add { len } => enc.add(&target[pos..pos + len as usize]),
                Instruction::Run { len } => enc.run(target[pos], len),
                Instruction::Copy { len, addr } => enc.copy(addr, len),
            }
            pos += inst.len() as usize;
        }
        let bytes = enc
            .finish()
            .assemble(source.map(|s| (s.len(), s.offset())), None);
        let mut input = bytes.as_slice();
        let header = WindowHeader::read_from(&mut input).unwrap().unwrap();
        let record = WindowRecord::read_sections(header, &mut input).unwrap();
        decode_window(&record, None, source, false, u64::MAX).unwrap()
    }

    #[test]
    fn identical_source_is_one_copy() {
        let data = lcg_bytes(4096, 7);
        let segment = SourceSegment::contiguous(0, &data);
        let insts = MatchEngine::new(DEFAULT).find_matches(&data, Some(&segment));
        assert_eq!(insts, vec![Instruction::Copy { len: 4096, addr: 0 }]);
    }

    #[test]
    fn edited_copy_reconstructs() {
        let source = lcg_bytes(8192, 1);
        let mut target = source.clone();
        target[100..110].copy_from_slice(b"0123456789");
        target.splice(3000..3000, b"inserted text".iter().copied());
        target.drain(6000..6100);

        let segment = SourceSegment::contiguous(0, &source);
        for profile in [FASTEST, DEFAULT, SLOW] {
            let insts = MatchEngine::new(profile).find_matches(&target, Some(&segment));
            assert_eq!(covered(&insts), target.len(), "{}", profile.name);
            let literal: usize = insts
                .iter()
                .filter(|i| matches!(i, Instruction::Add { .. }))
                .map(|i| i.len() as usize)
                .sum();
            assert!(literal < 200, "{}: {literal} literal bytes", profile.name);
            assert_eq!(replay(&insts, &target, Some(&segment)), target);
        }
    }

    #[test]
    fn repeated_block_becomes_self_copy() {
        let block = lcg_bytes(300, 3);
        let mut target = block.clone();
        target.extend_from_slice(&block);
        let insts = MatchEngine::new(DEFAULT).find_matches(&target, None);
        assert_eq!(
            insts,
            vec![
                Instruction::Add { len: 300 },
                Instruction::Copy { len: 300, addr: 0 }
            ]
        );
        assert_eq!(replay(&insts, &target, None), target);
    }

    #[test]
    fn runs_detected() {
        let mut target = b"head".to_vec();
        target.extend(std::iter::repeat_n(b'z', 100));
        target.extend_from_slice(b"tail");
        let insts = MatchEngine::new(DEFAULT).find_matches(&target, None);
        assert_eq!(
            insts,
            vec![
                Instruction::Add { len: 4 },
                Instruction::Run { len: 100 },
                Instruction::Add { len: 4 }
            ]
        );
    }

    #[test]
    fn tiny_and_empty_targets() {
        let mut engine = MatchEngine::new(DEFAULT);
        assert!(engine.find_matches(b"", None).is_empty());
        assert_eq!(
            engine.find_matches(b"abc", None),
            vec![Instruction::Add { len: 3 }]
        );
    }

    #[test]
    fn copies_across_block_boundaries() {
        let source = lcg_bytes(1000, 9);
        let blocks: Vec<&[u8]> = source.chunks(64).collect();
        let segment = SourceSegment::new(0, blocks, 64, 0, 1000).unwrap();
        let target = source[130..870].to_vec();
        let insts = MatchEngine::new(SLOW).find_matches(&target, Some(&segment));
        assert_eq!(covered(&insts), target.len());
        assert!(insts.len() <= 3, "{insts:?}");
        assert_eq!(replay(&insts, &target, Some(&segment)), target);
    }

    #[test]
    fn source_copy_resumes_in_next_window() {
        let source = lcg_bytes(2048, 5);
        let segment = SourceSegment::contiguous(0, &source);
        let mut engine = MatchEngine::new(FASTEST);
        let first = engine.find_matches(&source[..1000], Some(&segment));
        assert_eq!(first, vec![Instruction::Copy { len: 1000, addr: 0 }]);
        let second = engine.find_matches(&source[1000..1500], Some(&segment));
        assert_eq!(second, vec![Instruction::Copy { len: 500, addr: 1000 }]);
    }

    #[test]
    fn random_inputs_always_cover_target() {
        let source = lcg_bytes(5000, 11);
        let segment = SourceSegment::contiguous(0, &source);
        let mut engine = MatchEngine::new(DEFAULT);
        for seed in 0..8 {
            let mut target = lcg_bytes(3000, seed);
            target.extend_from_slice(&source[seed as usize * 100..seed as usize * 100 + 500]);
            let insts = engine.find_matches(&target, Some(&segment));
            assert_eq!(covered(&insts), target.len());
            assert_eq!(replay(&insts, &target, Some(&segment)), target);
        }
    }
}
