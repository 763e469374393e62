// COPY address cache (RFC 3284, Section 5.3).
//
// Modes: 0 SELF (absolute), 1 HERE (distance back from the current
// position), 2..=5 NEAR (offset from a recent address), 6..=8 SAME (exact
// hit in a hashed table, one raw byte).

use super::varint;

const NEAR_SLOTS: usize = 4;
const SAME_GROUPS: usize = 3;
const SAME_SLOTS: usize = SAME_GROUPS * 256;
const FIRST_SAME_MODE: u8 = 2 + NEAR_SLOTS as u8;

const MODE_SELF: u8 = 0;
const MODE_HERE: u8 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    /// The ADDR section ended early.
    Underflow,
    /// The decoded address is not before the current position.
    OutOfRange { addr: u64, here: u64 },
    /// Mode byte outside the default table's nine modes.
    BadMode(u8),
}

impl std::fmt::Display for AddressError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Underflow => write!(f, "address section underflow"),
            Self::OutOfRange { addr, here } => {
                write!(f, "copy address {addr} is not before position {here}")
            }
            Self::BadMode(mode) => write!(f, "invalid address mode {mode}"),
        }
    }
}

/// Per-window NEAR/SAME state, shared in shape by encoder and decoder.
#[derive(Clone)]
pub struct AddressCache {
    near: [u64; NEAR_SLOTS],
    next_near: usize,
    same: Box<[u64; SAME_SLOTS]>,
}

impl Default for AddressCache {
    fn default() -> Self {
        Self::new()
    }
}

impl AddressCache {
    pub fn new() -> Self {
        Self {
            near: [0; NEAR_SLOTS],
            next_near: 0,
            same: Box::new([0; SAME_SLOTS]),
        }
    }

    /// Clear state at a window boundary.
    pub fn reset(&mut self) {
        self.near = [0; NEAR_SLOTS];
        self.next_near = 0;
        self.same.fill(0);
    }

    fn remember(&mut self, addr: u64) {
        self.near[self.next_near] = addr;
        self.next_near = (self.next_near + 1) % NEAR_SLOTS;
        self.same[(addr % SAME_SLOTS as u64) as usize] = addr;
    }

    /// Encode `addr` (which must be `< here`) into `out`, returning the mode.
    pub fn encode(&mut self, addr: u64, here: u64, out: &mut Vec<u8>) -> u8 {
        debug_assert!(addr < here);

        let mut best = (addr, MODE_SELF);
        let mut consider = |value: u64, mode: u8| {
            if value < best.0 {
                best = (value, mode);
            }
        };
        consider(here - addr, MODE_HERE);
        for (slot, &near) in self.near.iter().enumerate() {
            if addr >= near {
                consider(addr - near, 2 + slot as u8);
            }
        }

        let same_slot = (addr % SAME_SLOTS as u64) as usize;
        let mode = if varint::encoded_len(best.0) > 1 && self.same[same_slot] == addr {
            out.push((same_slot % 256) as u8);
            FIRST_SAME_MODE + (same_slot / 256) as u8
        } else {
            varint::push(out, best.0);
            best.1
        };

        self.remember(addr);
        mode
    }

    /// Decode one address for `mode` from `section[*pos..]`.
    pub fn decode(
        &mut self,
        mode: u8,
        section: &[u8],
        pos: &mut usize,
        here: u64,
    ) -> Result<u64, AddressError> {
        let rest = section.get(*pos..).ok_or(AddressError::Underflow)?;
        let addr = if mode < FIRST_SAME_MODE {
            let (raw, used) = varint::decode(rest).map_err(|_| AddressError::Underflow)?;
            *pos += used;
            match mode {
                MODE_SELF => raw,
                MODE_HERE => here
                    .checked_sub(raw)
                    .ok_or(AddressError::OutOfRange { addr: raw, here })?,
                _ => self.near[(mode - 2) as usize]
                    .checked_add(raw)
                    .ok_or(AddressError::OutOfRange { addr: raw, here })?,
            }
        } else {
            let group = (mode - FIRST_SAME_MODE) as usize;
            if group >= SAME_GROUPS {
                return Err(AddressError::BadMode(mode));
            }
            let byte = *rest.first().ok_or(AddressError::Underflow)?;
            *pos += 1;
            self.same[group * 256 + byte as usize]
        };

        if addr >= here {
            return Err(AddressError::OutOfRange { addr, here });
        }
        self.remember(addr);
        Ok(addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(addrs: &[(u64, u64)]) {
        let mut enc = AddressCache::new();
        let mut section = Vec::new();
        let modes: Vec<u8> = addrs
            .iter()
            .map(|&(addr, here)| enc.encode(addr, here, &mut section))
            .collect();

        let mut dec = AddressCache::new();
        let mut pos = 0;
        for (&(addr, here), &mode) in addrs.iter().zip(&modes) {
            assert_eq!(dec.decode(mode, &section, &mut pos, here), Ok(addr));
        }
        assert_eq!(pos, section.len());
    }

    #[test]
    fn mixed_addresses_roundtrip() {
        roundtrip(&[
            (0, 10),
            (5, 10),
            (100_000, 200_000),
            (100_010, 200_100),
            (100_000, 300_000),
            (199_999, 200_000),
            (7, 1 << 30),
        ]);
    }

    #[test]
    fn repeated_far_address_uses_same_mode() {
        let mut cache = AddressCache::new();
        let mut out = Vec::new();
        let addr = 1_000_000;
        cache.encode(addr, 5_000_000, &mut out);
        // Push the address out of the NEAR ring.
        for a in [10, 20, 30, 40] {
            cache.encode(a, 5_000_000, &mut out);
        }
        out.clear();
        let mode = cache.encode(addr, 9_000_000, &mut out);
        assert!(mode >= FIRST_SAME_MODE);
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn here_mode_for_recent_target_bytes() {
        let mut cache = AddressCache::new();
        let mut out = Vec::new();
        let mode = cache.encode(999_990, 1_000_000, &mut out);
        assert_eq!(mode, MODE_HERE);
        assert_eq!(out, [10]);
    }

    #[test]
    fn decode_rejects_forward_reference() {
        let mut cache = AddressCache::new();
        let mut pos = 0;
        let err = cache.decode(MODE_SELF, &[50], &mut pos, 20).unwrap_err();
        assert_eq!(err, AddressError::OutOfRange { addr: 50, here: 20 });
    }

    #[test]
    fn decode_rejects_empty_section() {
        let mut cache = AddressCache::new();
        let mut pos = 0;
        assert_eq!(
            cache.decode(7, &[], &mut pos, 20),
            Err(AddressError::Underflow)
        );
        assert_eq!(
            cache.decode(9, &[1], &mut pos, 20),
            Err(AddressError::BadMode(9))
        );
    }
}
