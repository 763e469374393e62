// Match profiles: how hard the engine looks for copies at each level.

/// Minimum COPY length (smallest size in the default code table).
pub const MIN_MATCH: usize = 4;

/// Minimum run worth a RUN instruction.
pub const MIN_RUN: usize = 8;

/// Highest compression level.
pub const MAX_LEVEL: u32 = 9;

/// Tuning for one compression level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchProfile {
    pub name: &'static str,
    /// Width of the source rolling hash.
    pub source_look: usize,
    /// Distance between indexed source positions.
    pub source_step: usize,
    /// Candidates examined per target self-match lookup.
    pub chain_depth: usize,
    /// A match this long ends the search early.
    pub long_enough: usize,
}

/// Profile for `level` (0..=9). Level 0 never looks for matches; callers
/// check for it before consulting the engine.
pub fn profile_for_level(level: u32) -> MatchProfile {
    match level {
        0 | 1 => FASTEST,
        2 => FASTER,
        3..=5 => FAST,
        6 => DEFAULT,
        _ => SLOW,
    }
}

pub const FASTEST: MatchProfile = MatchProfile {
    name: "fastest",
    source_look: 9,
    source_step: 26,
    chain_depth: 1,
    long_enough: 6,
};

pub const FASTER: MatchProfile = MatchProfile {
    name: "faster",
    source_look: 9,
    source_step: 15,
    chain_depth: 1,
    long_enough: 18,
};

pub const FAST: MatchProfile = MatchProfile {
    name: "fast",
    source_look: 9,
    source_step: 8,
    chain_depth: 4,
    long_enough: 35,
};

pub const DEFAULT: MatchProfile = MatchProfile {
    name: "default",
    source_look: 9,
    source_step: 3,
    chain_depth: 8,
    long_enough: 70,
};

pub const SLOW: MatchProfile = MatchProfile {
    name: "slow",
    source_look: 9,
    source_step: 2,
    chain_depth: 44,
    long_enough: 70,
};
