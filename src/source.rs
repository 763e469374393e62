// Source binding: the optional reference stream a session copies from.

use std::io::{self, Read, Seek, SeekFrom};

use crate::error::{ResourceError, StreamError};

/// A seekable byte stream usable as a source.
pub trait SourceStream: Read + Seek {}

impl<T: Read + Seek> SourceStream for T {}

/// Reference stream plus read position.
///
/// Reads that come up short mark where the source ends; later reads past
/// that point return nothing.
pub struct SourceBinding {
    reader: Box<dyn SourceStream>,
    /// Stream position after the last read, if known.
    cursor: Option<u64>,
    end: Option<u64>,
}

impl SourceBinding {
    pub fn new<S: Read + Seek + 'static>(reader: S) -> Self {
        Self {
            reader: Box::new(reader),
            cursor: None,
            end: None,
        }
    }

    /// Source length, once a short read has revealed it.
    pub fn known_end(&self) -> Option<u64> {
        self.end
    }

    /// Read up to `len` bytes at `offset`. Fewer bytes come back only at the
    /// end of the source.
    pub fn read_window(&mut self, offset: u64, len: usize) -> Result<Vec<u8>, StreamError> {
        if let Some(end) = self.end
            && offset >= end
        {
            return Ok(Vec::new());
        }
        if self.cursor != Some(offset) {
            self.reader.seek(SeekFrom::Start(offset))?;
            self.cursor = Some(offset);
        }

        let mut buf = Vec::new();
        buf.try_reserve_exact(len)
            .map_err(|_| ResourceError::Allocation(len))?;
        let read: io::Result<usize> = self
            .reader
            .as_mut()
            .take(len as u64)
            .read_to_end(&mut buf);
        if let Err(e) = read {
            self.cursor = None;
            return Err(e.into());
        }
        let got = buf.len() as u64;
        self.cursor = Some(offset + got);
        if buf.len() < len {
            let end = offset + got;
            if self.end != Some(end) {
                log::debug!("source ends at {end}");
            }
            self.end = Some(end);
        }
        Ok(buf)
    }

    /// Forget the read position; the next read seeks.
    pub fn rewind(&mut self) {
        self.cursor = None;
    }

    pub fn into_inner(self) -> Box<dyn SourceStream> {
        self.reader
    }
}

impl std::fmt::Debug for SourceBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceBinding")
            .field("cursor", &self.cursor)
            .field("end", &self.end)
            .finish_non_exhaustive()
    }
}

impl From<Box<dyn SourceStream>> for SourceBinding {
    fn from(reader: Box<dyn SourceStream>) -> Self {
        Self {
            reader,
            cursor: None,
            end: None,
        }
    }
}

/// Seeks are counted so tests can check that sequential reads do not seek.
#[cfg(test)]
pub(crate) struct CountingSeeks<R> {
    pub inner: R,
    pub seeks: std::rc::Rc<std::cell::Cell<usize>>,
}

#[cfg(test)]
impl<R: Read> Read for CountingSeeks<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

#[cfg(test)]
impl<R: Seek> Seek for CountingSeeks<R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.seeks.set(self.seeks.get() + 1);
        self.inner.seek(pos)
    }
}
