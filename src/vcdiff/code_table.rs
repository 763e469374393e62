// Default instruction code table (RFC 3284, Section 5.6).
//
// Each of the 256 opcodes encodes one or two instructions. A size of zero
// in the table means the size follows the opcode as a varint.

use std::sync::LazyLock;

/// Shortest COPY the table can express with an implicit size.
pub const MIN_COPY: u32 = 4;

/// Number of COPY address modes: SELF, HERE, 4 NEAR, 3 SAME.
pub const COPY_MODES: u8 = 9;

/// Half of an opcode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Op {
    #[default]
    Noop,
    Add,
    Run,
    /// COPY with the given address mode.
    Copy(u8),
}

/// One table entry: up to two (op, size) pairs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Opcode {
    pub first: (Op, u8),
    pub second: (Op, u8),
}

/// Instruction produced by the matcher and consumed by the window encoder.
///
/// `addr` lives in the window's address space: `0..copy_len` is the source
/// segment, `copy_len..` is the target window decoded so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    Add { len: u32 },
    Copy { len: u32, addr: u64 },
    Run { len: u32 },
}

impl Instruction {
    #[inline]
    pub fn len(&self) -> u32 {
        match *self {
            Self::Add { len } | Self::Copy { len, .. } | Self::Run { len } => len,
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ---------------------------------------------------------------------------
// Table construction
// ---------------------------------------------------------------------------

static TABLE: LazyLock<[Opcode; 256]> = LazyLock::new(build);

/// The shared default table.
pub fn table() -> &'static [Opcode; 256] {
    &TABLE
}

fn single(op: Op, size: u8) -> Opcode {
    Opcode {
        first: (op, size),
        second: (Op::Noop, 0),
    }
}

fn build() -> [Opcode; 256] {
    let mut entries = Vec::with_capacity(256);

    entries.push(single(Op::Run, 0));
    for size in 0..=17 {
        entries.push(single(Op::Add, size));
    }
    for mode in 0..COPY_MODES {
        entries.push(single(Op::Copy(mode), 0));
        for size in 4..=18 {
            entries.push(single(Op::Copy(mode), size));
        }
    }
    // ADD then COPY: NEAR-class modes take copy sizes 4..=6, SAME modes 4.
    for mode in 0..COPY_MODES {
        let copy_max = if mode < 6 { 6 } else { 4 };
        for add in 1..=4 {
            for copy in 4..=copy_max {
                entries.push(Opcode {
                    first: (Op::Add, add),
                    second: (Op::Copy(mode), copy),
                });
            }
        }
    }
    // COPY(4) then ADD(1).
    for mode in 0..COPY_MODES {
        entries.push(Opcode {
            first: (Op::Copy(mode), 4),
            second: (Op::Add, 1),
        });
    }

    let mut table = [Opcode::default(); 256];
    debug_assert_eq!(entries.len(), table.len());
    for (slot, entry) in table.iter_mut().zip(entries) {
        *slot = entry;
    }
    table
}

// ---------------------------------------------------------------------------
// Opcode selection (encoder side)
// ---------------------------------------------------------------------------

/// Opcode for `op` of `size` on its own. Returns the opcode and whether the
/// size must follow as a varint.
pub fn single_opcode(op: Op, size: u32) -> (u8, bool) {
    match op {
        Op::Run | Op::Noop => (0, true),
        Op::Add if (1..=17).contains(&size) => (1 + size as u8, false),
        Op::Add => (1, true),
        Op::Copy(mode) => {
            let base = 19 + 16 * mode;
            if (MIN_COPY..=18).contains(&size) {
                (base + (size - 3) as u8, false)
            } else {
                (base, true)
            }
        }
    }
}

/// Opcode that packs `prev` and `next` together, when the table has one.
pub fn double_opcode(prev: (Op, u32), next: (Op, u32)) -> Option<u8> {
    match (prev, next) {
        ((Op::Add, add), (Op::Copy(mode), copy)) if (1..=4).contains(&add) => {
            let add = add as u8;
            if mode < 6 && (4..=6).contains(&copy) {
                Some(163 + 12 * mode + 3 * (add - 1) + (copy as u8 - 4))
            } else if mode >= 6 && copy == 4 {
                Some(235 + 4 * (mode - 6) + (add - 1))
            } else {
                None
            }
        }
        ((Op::Copy(mode), 4), (Op::Add, 1)) => Some(247 + mode),
        _ => None,
    }
}
