// VCDIFF format (RFC 3284).
//
// - `varint`        base-128 integers
// - `code_table`    default instruction code table
// - `address_cache` NEAR/SAME address modes
// - `header`        file header, window headers and window records
// - `encoder`       instruction stream to window record
// - `decoder`       window record to target bytes

pub mod address_cache;
pub mod code_table;
pub mod decoder;
pub mod encoder;
pub mod header;
pub mod varint;

pub use code_table::Instruction;
pub use decoder::{DecodeError, decode_window};
pub use encoder::{WindowEncoder, WindowSections};
pub use header::{
    DeltaFlags, FileHeader, HARD_MAX_WINDOW, HeaderFlags, VCDIFF_MAGIC, WindowFlags,
    WindowHeader, WindowRecord,
};

/// Adler-32 of a target window, as stored in `VCD_ADLER32` windows.
pub fn adler32(data: &[u8]) -> u32 {
    #[cfg(feature = "adler32")]
    {
        let mut hasher = simd_adler32::Adler32::new();
        hasher.write(data);
        hasher.finish()
    }
    #[cfg(not(feature = "adler32"))]
    {
        const MOD_ADLER: u32 = 65_521;
        // Largest block that cannot overflow the 32-bit sums.
        const NMAX: usize = 5552;
        let (mut a, mut b) = (1u32, 0u32);
        for block in data.chunks(NMAX) {
            for &byte in block {
                a += u32::from(byte);
                b += a;
            }
            a %= MOD_ADLER;
            b %= MOD_ADLER;
        }
        (b << 16) | a
    }
}
