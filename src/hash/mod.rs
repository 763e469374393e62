// Match finding for the transform core.
//
// - `config`   match profiles per compression level
// - `rolling`  hashes and byte scanners
// - `matching` the engine that turns a target window into instructions

pub mod config;
pub mod matching;
pub mod rolling;
