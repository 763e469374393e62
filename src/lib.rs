//! deltafile: streaming VCDIFF (RFC 3284) delta compression behind a
//! file-like session.
//!
//! The crate provides:
//! - A codec session (`stream::DeltaStream`) that encodes what is written to
//!   it and decodes what is read from it, optionally against a source stream
//! - A bounded window pool (`pool`) and source binding (`source`)
//! - A pluggable transform core (`transform`) built on the VCDIFF engine
//!   (`vcdiff`, `hash`, `compress`)
//! - A file adapter (`file`), file helpers (`io`) and an optional CLI
//!   (`cli` feature)
//!
//! # Quick Start
//!
//! ```
//! use std::io::Cursor;
//! use deltafile::{DeltaStream, StreamConfig};
//!
//! let old = b"hello old world".to_vec();
//! let new = b"hello new world";
//!
//! let mut enc = DeltaStream::with_source(Vec::new(), Cursor::new(old.clone()), StreamConfig::default())?;
//! enc.write(new)?;
//! let delta = enc.close()?.unwrap_or_default();
//!
//! let mut dec = DeltaStream::with_source(Cursor::new(delta), Cursor::new(old), StreamConfig::default())?;
//! assert_eq!(dec.read_bytes(None)?, new);
//! # Ok::<(), deltafile::StreamError>(())
//! ```

pub mod compress;
pub mod config;
pub mod error;
pub mod file;
pub mod hash;
pub mod io;
pub mod pool;
pub mod source;
pub mod stream;
pub mod transform;
pub mod vcdiff;
pub mod window;

#[cfg(feature = "cli")]
pub mod cli;

pub use compress::SecondaryCompression;
pub use config::StreamConfig;
pub use error::{ResourceError, StreamError, UsageError};
pub use file::DeltaFile;
pub use pool::{PoolStats, WindowPool};
pub use source::SourceBinding;
pub use stream::{DeltaStream, Phase};
pub use transform::{TransformCore, VcdiffCore};
pub use vcdiff::DecodeError;
