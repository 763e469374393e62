// Error types for delta streams.
//
// `StreamError` is what every session operation returns. Its variants sort
// failures by who has to act on them: the caller (`Usage`, `Config`), the
// producer of the encoded bytes (`Format`), the environment (`Io`,
// `Resource`).

use std::io;

use thiserror::Error;

use crate::vcdiff::DecodeError;

/// An operation that is illegal in the session's current phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum UsageError {
    #[error("cannot read from a stream that is being written")]
    ReadWhileWriting,
    #[error("cannot write to a stream that is being read")]
    WriteWhileReading,
    #[error("cannot alter the source during encoding or decoding")]
    SourceLocked,
    #[error("stream is closed")]
    Closed,
    #[error("stream failed earlier; reopen it before further use")]
    Poisoned,
}

/// A bounded resource ran out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ResourceError {
    #[error("window of {size} bytes exceeds the {limit}-byte limit")]
    WindowTooLarge { size: u64, limit: u64 },
    #[error("all {capacity} pool windows are pinned")]
    PoolExhausted { capacity: usize },
    #[error("source segment needs {blocks} pool windows, only {available} are available")]
    SourceSpanTooLarge { blocks: u64, available: usize },
    #[error("window section expands past the {limit}-byte limit")]
    SectionTooLarge { limit: u64 },
    #[error("failed to allocate {0} bytes")]
    Allocation(usize),
}

#[derive(Debug, Error)]
pub enum StreamError {
    #[error(transparent)]
    Usage(#[from] UsageError),
    #[error("malformed delta: {0}")]
    Format(DecodeError),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Resource(#[from] ResourceError),
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl StreamError {
    pub fn is_usage(&self) -> bool {
        matches!(self, Self::Usage(_))
    }

    pub fn is_format(&self) -> bool {
        matches!(self, Self::Format(_))
    }

    pub fn is_resource(&self) -> bool {
        matches!(self, Self::Resource(_))
    }
}

impl From<DecodeError> for StreamError {
    fn from(e: DecodeError) -> Self {
        match e {
            DecodeError::Io(e) => Self::Io(e),
            DecodeError::SectionTooLarge { limit } => {
                Self::Resource(ResourceError::SectionTooLarge { limit })
            }
            DecodeError::Allocation(size) => Self::Resource(ResourceError::Allocation(size)),
            other => Self::Format(other),
        }
    }
}

impl From<StreamError> for io::Error {
    fn from(e: StreamError) -> Self {
        match e {
            StreamError::Io(e) => e,
            StreamError::Usage(_) | StreamError::Config(_) => {
                io::Error::new(io::ErrorKind::InvalidInput, e)
            }
            StreamError::Format(_) => io::Error::new(io::ErrorKind::InvalidData, e),
            StreamError::Resource(_) => io::Error::new(io::ErrorKind::OutOfMemory, e),
        }
    }
}
