// Instruction clean-up between matching and window encoding:
//   - drop zero-length instructions
//   - merge adjacent ADDs, contiguous COPYs and RUNs of the same byte
//   - split RUNs out of long ADDs

use crate::hash::config::MIN_RUN;
use crate::hash::rolling;
use crate::vcdiff::code_table::Instruction;

/// Optimize an instruction stream covering `target`.
///
/// `copy_len` is the source segment length; COPYs are never merged across
/// it because one COPY may not span source and target. The output covers
/// `target` exactly as the input did.
pub fn optimize(instructions: &[Instruction], target: &[u8], copy_len: u64) -> Vec<Instruction> {
    let mut merged: Vec<Instruction> = Vec::with_capacity(instructions.len());
    let mut pos = 0usize;

    for &inst in instructions {
        if inst.is_empty() {
            continue;
        }
        let joined = merged
            .last()
            .and_then(|&last| coalesce(last, inst, target, pos, copy_len));
        match (joined, merged.last_mut()) {
            (Some(joined), Some(last)) => *last = joined,
            _ => merged.push(inst),
        }
        pos += inst.len() as usize;
    }

    let mut result = Vec::with_capacity(merged.len() + 8);
    let mut pos = 0usize;
    for inst in merged {
        let len = inst.len() as usize;
        match inst {
            Instruction::Add { .. } => split_runs(&target[pos..pos + len], &mut result),
            _ => result.push(inst),
        }
        pos += len;
    }

    debug_assert_eq!(
        result.iter().map(|i| i.len() as usize).sum::<usize>(),
        target.len(),
        "instruction optimization changed coverage"
    );
    result
}

/// Merge `b` (starting at target offset `at`) into `a`, if possible.
fn coalesce(
    a: Instruction,
    b: Instruction,
    target: &[u8],
    at: usize,
    copy_len: u64,
) -> Option<Instruction> {
    match (a, b) {
        (Instruction::Add { len: l1 }, Instruction::Add { len: l2 }) => {
            Some(Instruction::Add { len: l1 + l2 })
        }
        (Instruction::Copy { len: l1, addr: a1 }, Instruction::Copy { len: l2, addr: a2 })
            if a2 == a1 + u64::from(l1) && (a1 >= copy_len || a2 + u64::from(l2) <= copy_len) =>
        {
            Some(Instruction::Copy {
                len: l1 + l2,
                addr: a1,
            })
        }
        (Instruction::Run { len: l1 }, Instruction::Run { len: l2 })
            if at > 0 && target[at - 1] == target[at] =>
        {
            Some(Instruction::Run { len: l1 + l2 })
        }
        _ => None,
    }
}

/// Emit `data` as ADDs, with runs of at least `MIN_RUN` bytes as RUNs.
fn split_runs(data: &[u8], out: &mut Vec<Instruction>) {
    let mut lit_start = 0usize;
    let mut i = 0usize;
    while i < data.len() {
        let run = rolling::run_length(&data[i..], data[i], data.len() - i);
        if run >= MIN_RUN {
            if i > lit_start {
                out.push(Instruction::Add {
                    len: (i - lit_start) as u32,
                });
            }
            out.push(Instruction::Run { len: run as u32 });
            lit_start = i + run;
        }
        i += run;
    }
    if data.len() > lit_start {
        out.push(Instruction::Add {
            len: (data.len() - lit_start) as u32,
        });
    }
}
