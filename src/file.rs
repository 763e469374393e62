// File-style adapter over `DeltaStream`.
//
// `DeltaFile` wraps an encoded handle: whatever is written is stored as a
// delta against the optional source, whatever is read comes back decoded.

use std::io::{self, Read, Seek, Write};

use crate::config::StreamConfig;
use crate::error::StreamError;
use crate::source::SourceBinding;
use crate::stream::DeltaStream;

/// Default chunk size for [`DeltaFile::chunks`] (8 MiB).
pub const DEFAULT_CHUNK_SIZE: usize = 8 << 20;

/// A delta-compressed file.
///
/// ```no_run
/// use std::fs::File;
/// use std::io::Write;
/// use deltafile::{DeltaFile, StreamConfig};
///
/// let mut df = DeltaFile::new(File::create("v2.vcdiff")?, StreamConfig::default())?;
/// df.set_source(File::open("v1.txt")?)?;
/// df.write_all(b"second version")?;
/// df.close()?;
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug)]
pub struct DeltaFile<F> {
    stream: DeltaStream<F>,
}

impl<F> DeltaFile<F> {
    pub fn new(handle: F, config: StreamConfig) -> Result<Self, StreamError> {
        Ok(Self {
            stream: DeltaStream::new(handle, config)?,
        })
    }

    /// Whether a source is bound.
    pub fn has_source(&self) -> bool {
        self.stream.has_source()
    }

    /// Bind the file the delta is taken against. Fails once data has been
    /// written or read.
    pub fn set_source<S: Read + Seek + 'static>(&mut self, source: S) -> Result<(), StreamError> {
        self.stream.bind_source(source)
    }

    pub fn clear_source(&mut self) -> Result<(), StreamError> {
        self.stream.unbind_source()
    }

    /// Switch to a new handle, keeping the source.
    pub fn open(&mut self, handle: F) -> Result<Option<F>, StreamError> {
        self.stream.replace_handle(handle)
    }

    /// Flush pending output, drop the source and return the handle.
    pub fn close(&mut self) -> Result<Option<F>, StreamError> {
        self.stream.close()
    }

    /// Encoded size while writing, decoded size while reading.
    pub fn size(&self) -> Option<u64> {
        self.stream.size()
    }

    /// Whether reading everything takes more than one chunk of
    /// `chunk_size` bytes (default [`DEFAULT_CHUNK_SIZE`]).
    pub fn multiple_chunks(&self, chunk_size: Option<u64>) -> bool {
        let chunk_size = chunk_size.unwrap_or(DEFAULT_CHUNK_SIZE as u64);
        self.size().is_some_and(|size| size > chunk_size)
    }

    pub fn stream(&self) -> &DeltaStream<F> {
        &self.stream
    }

    pub fn stream_mut(&mut self) -> &mut DeltaStream<F> {
        &mut self.stream
    }

    pub fn into_stream(self) -> DeltaStream<F> {
        self.stream
    }
}

impl<F: Read> DeltaFile<F> {
    /// Read up to `limit` decoded bytes, or to the end with `None`.
    pub fn read_bytes(&mut self, limit: Option<usize>) -> Result<Vec<u8>, StreamError> {
        self.stream.read_bytes(limit)
    }

    /// Iterate over the decoded content in chunks of `chunk_size` bytes.
    pub fn chunks(&mut self, chunk_size: Option<usize>) -> Chunks<'_, F> {
        Chunks {
            file: self,
            size: chunk_size.unwrap_or(DEFAULT_CHUNK_SIZE).max(1),
            done: false,
        }
    }
}

impl<F: Read> DeltaFile<F>
where
    F: 'static,
{
    /// Decode this file as the source of another session.
    pub fn into_source(self) -> SourceBinding {
        SourceBinding::new(self.stream)
    }
}

/// Iterator returned by [`DeltaFile::chunks`].
pub struct Chunks<'a, F> {
    file: &'a mut DeltaFile<F>,
    size: usize,
    done: bool,
}

impl<F: Read> Iterator for Chunks<'_, F> {
    type Item = Result<Vec<u8>, StreamError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.file.read_bytes(Some(self.size)) {
            Ok(chunk) if chunk.is_empty() => {
                self.done = true;
                None
            }
            Ok(chunk) => Some(Ok(chunk)),
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

impl<F: Write> Write for DeltaFile<F> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Write::write(&mut self.stream, buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Write::flush(&mut self.stream)
    }
}

impl<F: Read> Read for DeltaFile<F> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Read::read(&mut self.stream, buf)
    }
}
