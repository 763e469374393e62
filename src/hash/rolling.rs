// Hashes and byte scanners used by the match engine.
//
//   - Small hash: 4-byte window, multiply by an LCG constant. Indexes the
//     target window for self copies.
//   - Rolling hash: Rabin-Karp polynomial over a `look`-byte window, rolled
//     one byte at a time. Indexes the source segment.
//
// Comparisons run a word at a time through safe `u64` loads.

/// LCG multiplier for the small hash.
pub const HASH_MULT_32: u32 = 1_597_334_677;

/// Polynomial base for the rolling hash.
const ROLL_BASE: u64 = 0x0000_0100_0000_01B3;

/// Fibonacci hashing constant used to spread hashes over buckets.
const BUCKET_MULT: u64 = 0x9E37_79B9_7F4A_7C15;

// ---------------------------------------------------------------------------
// Small hash
// ---------------------------------------------------------------------------

/// Hash of the first 4 bytes of `base`.
#[inline(always)]
pub fn small_hash(base: &[u8]) -> u32 {
    let word = u32::from_le_bytes([base[0], base[1], base[2], base[3]]);
    word.wrapping_mul(HASH_MULT_32)
}

// ---------------------------------------------------------------------------
// Rolling hash
// ---------------------------------------------------------------------------

/// Rabin-Karp hash over a fixed window width.
#[derive(Debug, Clone, Copy)]
pub struct RollingHash {
    look: usize,
    /// `ROLL_BASE^(look - 1)`, the weight of the byte leaving the window.
    out_weight: u64,
}

impl RollingHash {
    pub fn new(look: usize) -> Self {
        let look = look.max(1);
        let mut out_weight = 1u64;
        for _ in 1..look {
            out_weight = out_weight.wrapping_mul(ROLL_BASE);
        }
        Self { look, out_weight }
    }

    #[inline]
    pub fn look(&self) -> usize {
        self.look
    }

    /// Hash of `base[..look]`.
    #[inline]
    pub fn checksum(&self, base: &[u8]) -> u64 {
        base[..self.look]
            .iter()
            .fold(0u64, |h, &b| h.wrapping_mul(ROLL_BASE).wrapping_add(u64::from(b) + 1))
    }

    /// Slide the window one byte: `outgoing` leaves, `incoming` enters.
    #[inline(always)]
    pub fn roll(&self, old: u64, outgoing: u8, incoming: u8) -> u64 {
        old.wrapping_sub((u64::from(outgoing) + 1).wrapping_mul(self.out_weight))
            .wrapping_mul(ROLL_BASE)
            .wrapping_add(u64::from(incoming) + 1)
    }
}

/// Map a hash onto `1 << bits` buckets.
#[inline(always)]
pub fn bucket(hash: u64, bits: u32) -> usize {
    debug_assert!((1..=32).contains(&bits));
    (hash.wrapping_mul(BUCKET_MULT) >> (64 - bits)) as usize
}

/// Bucket bit width for a table that should hold about `slots` entries.
pub fn table_bits(slots: usize, min_bits: u32, max_bits: u32) -> u32 {
    let bits = usize::BITS - slots.max(1).saturating_sub(1).leading_zeros();
    bits.clamp(min_bits, max_bits)
}

// ---------------------------------------------------------------------------
// Scanners
// ---------------------------------------------------------------------------

/// Number of leading bytes `a` and `b` share.
#[inline]
pub fn forward_match(a: &[u8], b: &[u8]) -> usize {
    let n = a.len().min(b.len());
    let (a, b) = (&a[..n], &b[..n]);
    let mut i = 0;
    for (wa, wb) in a.chunks_exact(8).zip(b.chunks_exact(8)) {
        let x = u64::from_le_bytes(wa.try_into().unwrap_or([0; 8]));
        let y = u64::from_le_bytes(wb.try_into().unwrap_or([0; 8]));
        let diff = x ^ y;
        if diff != 0 {
            return i + (diff.trailing_zeros() / 8) as usize;
        }
        i += 8;
    }
    i + a[i..].iter().zip(&b[i..]).take_while(|(x, y)| x == y).count()
}

/// Number of trailing bytes `a` and `b` share.
#[inline]
pub fn backward_match(a: &[u8], b: &[u8]) -> usize {
    a.iter()
        .rev()
        .zip(b.iter().rev())
        .take_while(|(x, y)| x == y)
        .count()
}

/// Count leading bytes of `data` equal to `byte`, up to `max`.
#[inline]
pub fn run_length(data: &[u8], byte: u8, max: usize) -> usize {
    let data = &data[..max.min(data.len())];
    let pattern = u64::from_ne_bytes([byte; 8]);
    let mut i = 0;
    for word in data.chunks_exact(8) {
        let w = u64::from_ne_bytes(word.try_into().unwrap_or([0; 8]));
        if w != pattern {
            break;
        }
        i += 8;
    }
    i + data[i..].iter().take_while(|&&b| b == byte).count()
}
