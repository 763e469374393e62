// Post-matching stages of the transform core.
//
// - `pipeline`  instruction clean-up (coalescing, run splitting)
// - `secondary` LZMA / Zlib compression of window sections
// - `djw`       decoding of xdelta3's DJW sections

#[cfg(feature = "djw-secondary")]
pub mod djw;
pub mod pipeline;
pub mod secondary;

pub use secondary::{CompressBackend, SecondaryCompression};
