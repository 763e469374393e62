// Window encoder: turns an instruction stream into DATA/INST/ADDR sections
// and assembles a window record.

use super::address_cache::AddressCache;
use super::code_table::{Op, double_opcode, single_opcode};
use super::header::{DeltaFlags, WindowFlags, WindowHeader};
use super::varint;

/// Instruction waiting to see whether the next one packs with it.
#[derive(Debug, Clone, Copy)]
struct Pending {
    op: Op,
    size: u32,
}

/// Builds the three sections of one window.
pub struct WindowEncoder {
    data: Vec<u8>,
    inst: Vec<u8>,
    addr: Vec<u8>,
    cache: AddressCache,
    pending: Option<Pending>,
    copy_len: u64,
    target_len: u64,
}

impl WindowEncoder {
    /// `copy_len` is the length of the source segment (0 without source).
    pub fn new(copy_len: u64) -> Self {
        Self {
            data: Vec::new(),
            inst: Vec::new(),
            addr: Vec::new(),
            cache: AddressCache::new(),
            pending: None,
            copy_len,
            target_len: 0,
        }
    }

    /// Literal bytes.
    pub fn add(&mut self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        self.data.extend_from_slice(bytes);
        self.push(Op::Add, bytes.len() as u32);
    }

    /// `len` repetitions of `byte`.
    pub fn run(&mut self, byte: u8, len: u32) {
        if len == 0 {
            return;
        }
        self.data.push(byte);
        self.push(Op::Run, len);
    }

    /// Copy `len` bytes from `addr` in the window's address space.
    pub fn copy(&mut self, addr: u64, len: u32) {
        if len == 0 {
            return;
        }
        let here = self.copy_len + self.target_len;
        let mode = self.cache.encode(addr, here, &mut self.addr);
        self.push(Op::Copy(mode), len);
    }

    fn push(&mut self, op: Op, size: u32) {
        if let Some(prev) = self.pending
            && let Some(code) = double_opcode((prev.op, prev.size), (op, size))
        {
            self.inst.push(code);
            self.pending = None;
        } else {
            self.flush_pending();
            self.pending = Some(Pending { op, size });
        }
        self.target_len += u64::from(size);
    }

    fn flush_pending(&mut self) {
        if let Some(Pending { op, size }) = self.pending.take() {
            let (code, explicit_size) = single_opcode(op, size);
            self.inst.push(code);
            if explicit_size {
                varint::push(&mut self.inst, u64::from(size));
            }
        }
    }

    /// Finish the instruction stream.
    pub fn finish(mut self) -> WindowSections {
        self.flush_pending();
        WindowSections {
            data: self.data,
            inst: self.inst,
            addr: self.addr,
            target_len: self.target_len,
            delta: DeltaFlags::empty(),
        }
    }
}

/// Encoded sections of one window before assembly.
///
/// Secondary compression rewrites the sections in place and records which
/// ones it compressed in `delta`.
#[derive(Debug, Clone, Default)]
pub struct WindowSections {
    pub data: Vec<u8>,
    pub inst: Vec<u8>,
    pub addr: Vec<u8>,
    pub target_len: u64,
    pub delta: DeltaFlags,
}

impl WindowSections {
    /// Produce the window record bytes.
    ///
    /// `source` is the (length, offset) of the source segment, if any.
    pub fn assemble(self, source: Option<(u64, u64)>, checksum: Option<u32>) -> Vec<u8> {
        let mut flags = WindowFlags::empty();
        flags.set(WindowFlags::SOURCE, source.is_some());
        flags.set(WindowFlags::ADLER32, checksum.is_some());
        let (copy_len, copy_offset) = source.unwrap_or((0, 0));

        let mut header = WindowHeader {
            flags,
            copy_len,
            copy_offset,
            enc_len: 0,
            target_len: self.target_len,
            delta: self.delta,
            data_len: self.data.len() as u64,
            inst_len: self.inst.len() as u64,
            addr_len: self.addr.len() as u64,
            adler32: checksum,
        };
        header.enc_len = header.computed_enc_len();

        let mut out =
            Vec::with_capacity(32 + self.data.len() + self.inst.len() + self.addr.len());
        header.write_to(&mut out);
        out.extend_from_slice(&self.data);
        out.extend_from_slice(&self.inst);
        out.extend_from_slice(&self.addr);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vcdiff::code_table::table;

    #[test]
    fn add_then_short_copy_packs_into_one_opcode() {
        let mut enc = WindowEncoder::new(100);
        enc.add(b"xy");
        enc.copy(10, 5);
        let sections = enc.finish();
        assert_eq!(sections.inst.len(), 1);
        let entry = table()[sections.inst[0] as usize];
        assert_eq!(entry.first, (Op::Add, 2));
        assert_eq!(entry.second.1, 5);
        assert_eq!(sections.data, b"xy");
        assert_eq!(sections.target_len, 7);
    }

    #[test]
    fn long_add_carries_explicit_size() {
        let mut enc = WindowEncoder::new(0);
        enc.add(&[7u8; 40]);
        let sections = enc.finish();
        assert_eq!(sections.inst, [1, 40]);
        assert_eq!(sections.data.len(), 40);
    }

    #[test]
    fn run_stores_one_data_byte() {
        let mut enc = WindowEncoder::new(0);
        enc.run(b'z', 300);
        let sections = enc.finish();
        assert_eq!(sections.data, b"z");
        assert_eq!(sections.inst[0], 0);
        assert_eq!(sections.target_len, 300);
    }

    #[test]
    fn assembled_header_is_consistent() {
        let mut enc = WindowEncoder::new(0);
        enc.add(b"hello");
        let bytes = enc.finish().assemble(None, Some(42));
        let header = WindowHeader::read_from(&mut bytes.as_slice())
            .unwrap()
            .unwrap();
        assert_eq!(header.target_len, 5);
        assert_eq!(header.adler32, Some(42));
        assert!(!header.has_source());
    }
}
