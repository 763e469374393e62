// The codec session: a file-like object that delta-encodes what is written
// to it and decodes what is read from it.
//
// Phases: Idle -> (Writing | Reading) -> Closed. `open` and `reopen` return
// to Idle with fresh codec state. The source binding may only change while
// Idle.

use std::io::{self, Read, Seek, SeekFrom, Write};

use crate::config::StreamConfig;
use crate::error::{ResourceError, StreamError, UsageError};
use crate::pool::{PoolStats, WindowPool};
use crate::source::SourceBinding;
use crate::transform::{TransformCore, VcdiffCore};
use crate::vcdiff::{DecodeError, FileHeader, WindowHeader, WindowRecord};
use crate::window::{SourceSegment, Window, WindowKey};

/// Session phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Writing,
    Reading,
    Closed,
}

/// A decoded window being handed out to the reader.
#[derive(Debug, Clone, Copy)]
struct Parked {
    key: WindowKey,
    served: usize,
}

type FinishFn<F, C> = fn(&mut DeltaStream<F, C>) -> Result<(), StreamError>;

/// Delta-encoding stream over a handle `F`.
///
/// Writing plaintext emits VCDIFF to `F`; reading decodes VCDIFF from `F`.
/// Either direction may copy from an optional [`SourceBinding`].
pub struct DeltaStream<F, C: TransformCore = VcdiffCore> {
    handle: Option<F>,
    config: StreamConfig,
    core: C,
    pool: WindowPool,
    source: Option<SourceBinding>,
    phase: Phase,
    poisoned: bool,
    /// Completes a write phase; set by the first write since only then is
    /// `F: Write` known.
    finish_fn: Option<FinishFn<F, C>>,

    // Encoding
    header_written: bool,
    pending: Option<WindowKey>,
    last_first: u64,

    // Decoding
    file_header: Option<FileHeader>,
    /// Source block size while decoding; grows to fit the widest segment.
    source_block: usize,
    input_done: bool,
    parked: Option<Parked>,

    /// Plaintext offset of the next window.
    target_offset: u64,
    /// Plaintext bytes handed to the reader.
    position: u64,
    bytes_consumed: u64,
    bytes_produced: u64,
    windows: u64,
}

impl<F> DeltaStream<F, VcdiffCore> {
    /// A session over `handle` with the default transform core.
    pub fn new(handle: F, config: StreamConfig) -> Result<Self, StreamError> {
        config.validate()?;
        let core = VcdiffCore::new(&config);
        let pool = WindowPool::new(config.pool_capacity);
        Self::with_core_and_pool(handle, config, core, pool)
    }

    /// A session copying from `source`.
    pub fn with_source<S>(handle: F, source: S, config: StreamConfig) -> Result<Self, StreamError>
    where
        S: Read + Seek + 'static,
    {
        let mut stream = Self::new(handle, config)?;
        stream.source = Some(SourceBinding::new(source));
        Ok(stream)
    }
}

impl<F, C: TransformCore> DeltaStream<F, C> {
    /// A session with an explicit core and pool.
    pub fn with_core_and_pool(
        handle: F,
        config: StreamConfig,
        core: C,
        pool: WindowPool,
    ) -> Result<Self, StreamError> {
        config.validate()?;
        if pool.capacity() < config.source_windows + 1 {
            return Err(StreamError::Config(format!(
                "pool holds {} windows, needs at least {}",
                pool.capacity(),
                config.source_windows + 1
            )));
        }
        Ok(Self {
            handle: Some(handle),
            config,
            core,
            pool,
            source: None,
            phase: Phase::Idle,
            poisoned: false,
            finish_fn: None,
            header_written: false,
            pending: None,
            last_first: 0,
            file_header: None,
            source_block: 0,
            input_done: false,
            parked: None,
            target_offset: 0,
            position: 0,
            bytes_consumed: 0,
            bytes_produced: 0,
            windows: 0,
        })
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    pub fn core(&self) -> &C {
        &self.core
    }

    /// Plaintext accepted while writing; encoded bytes read while reading.
    pub fn bytes_consumed(&self) -> u64 {
        self.bytes_consumed
    }

    /// Encoded bytes emitted while writing; plaintext decoded while reading.
    pub fn bytes_produced(&self) -> u64 {
        self.bytes_produced
    }

    /// Windows encoded or decoded in this phase.
    pub fn windows(&self) -> u64 {
        self.windows
    }

    /// Plaintext position of the reader.
    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    pub fn has_source(&self) -> bool {
        self.source.is_some()
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Secondary compressor id of the stream being decoded, once known.
    pub fn secondary_id(&self) -> Option<u8> {
        self.file_header.as_ref().and_then(|h| h.secondary_id)
    }

    /// Encoded size while writing, decoded size while reading. `None`
    /// until the current phase has produced something.
    pub fn size(&self) -> Option<u64> {
        match self.phase {
            Phase::Idle => None,
            _ if self.bytes_produced == 0 && self.windows == 0 => None,
            _ => Some(self.bytes_produced),
        }
    }

    pub fn get_ref(&self) -> Option<&F> {
        self.handle.as_ref()
    }

    pub fn get_mut(&mut self) -> Option<&mut F> {
        self.handle.as_mut()
    }

    // -----------------------------------------------------------------------
    // Source binding
    // -----------------------------------------------------------------------

    fn check_source_change(&self) -> Result<(), StreamError> {
        match self.phase {
            Phase::Idle => Ok(()),
            Phase::Closed => Err(UsageError::Closed.into()),
            Phase::Writing | Phase::Reading => Err(UsageError::SourceLocked.into()),
        }
    }

    /// Replace the source binding. Only legal while idle.
    pub fn set_source(&mut self, source: Option<SourceBinding>) -> Result<(), StreamError> {
        self.check_source_change()?;
        log::debug!(
            "source {}",
            if source.is_some() { "bound" } else { "unbound" }
        );
        self.source = source.map(|mut s| {
            s.rewind();
            s
        });
        self.pool.clear_origin(crate::window::Origin::Source);
        self.last_first = 0;
        self.source_block = 0;
        Ok(())
    }

    pub fn bind_source<S: Read + Seek + 'static>(&mut self, source: S) -> Result<(), StreamError> {
        self.set_source(Some(SourceBinding::new(source)))
    }

    pub fn unbind_source(&mut self) -> Result<(), StreamError> {
        self.set_source(None)
    }

    /// Detach and return the source binding. Only legal while idle.
    pub fn take_source(&mut self) -> Result<Option<SourceBinding>, StreamError> {
        self.check_source_change()?;
        self.pool.clear_origin(crate::window::Origin::Source);
        self.source_block = 0;
        Ok(self.source.take())
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    fn check_usable(&self) -> Result<(), StreamError> {
        if self.phase == Phase::Closed {
            return Err(UsageError::Closed.into());
        }
        if self.poisoned {
            return Err(UsageError::Poisoned.into());
        }
        Ok(())
    }

    fn enter(&mut self, phase: Phase) {
        if self.phase != phase {
            log::debug!("delta stream {:?} -> {:?}", self.phase, phase);
            self.phase = phase;
        }
    }

    /// Poison the session on codec failures.
    fn fail<T>(&mut self, err: StreamError) -> Result<T, StreamError> {
        if !err.is_usage() {
            self.poisoned = true;
        }
        Err(err)
    }

    /// Complete a write phase, if one is under way.
    fn finish_phase(&mut self) -> Result<(), StreamError> {
        if self.phase == Phase::Writing
            && !self.poisoned
            && let Some(finish) = self.finish_fn
        {
            return finish(self);
        }
        Ok(())
    }

    fn reset_codec(&mut self) {
        self.pool.release_all();
        self.pool.clear();
        self.core.reset();
        self.finish_fn = None;
        self.poisoned = false;
        self.header_written = false;
        self.pending = None;
        self.last_first = 0;
        self.file_header = None;
        self.source_block = 0;
        self.input_done = false;
        self.parked = None;
        self.target_offset = 0;
        self.position = 0;
        self.bytes_consumed = 0;
        self.bytes_produced = 0;
        self.windows = 0;
    }

    /// Finish the current phase, detach the source and hand back the
    /// handle. Closing a closed session returns `None`.
    pub fn close(&mut self) -> Result<Option<F>, StreamError> {
        if self.phase == Phase::Closed {
            return Ok(None);
        }
        let finished = self.finish_phase();
        self.pool.release_all();
        self.pool.clear();
        self.pending = None;
        self.parked = None;
        self.finish_fn = None;
        self.source = None;
        self.enter(Phase::Closed);
        finished?;
        Ok(self.handle.take())
    }

    /// Finish the current phase and start over on `handle` with `source`.
    /// Returns the previous handle.
    pub fn open(
        &mut self,
        handle: F,
        source: Option<SourceBinding>,
    ) -> Result<Option<F>, StreamError> {
        let previous = self.replace_handle(handle)?;
        self.source = source;
        Ok(previous)
    }

    /// Like [`open`](Self::open), keeping the current source binding.
    pub fn replace_handle(&mut self, handle: F) -> Result<Option<F>, StreamError> {
        self.finish_phase()?;
        let previous = self.handle.replace(handle);
        self.reset_codec();
        if let Some(source) = self.source.as_mut() {
            source.rewind();
        }
        self.enter(Phase::Idle);
        Ok(previous)
    }

    /// Finish the current phase, consume the session and return the handle.
    pub fn into_inner(mut self) -> Result<Option<F>, StreamError> {
        let finished = self.finish_phase();
        self.phase = Phase::Closed;
        finished?;
        Ok(self.handle.take())
    }

    // -----------------------------------------------------------------------
    // Source segments
    // -----------------------------------------------------------------------

    /// Pin the source blocks a target window at `offset` may copy from.
    fn encode_source_blocks(&mut self, offset: u64) -> Result<(u64, Vec<WindowKey>), StreamError> {
        let Some(binding) = self.source.as_mut() else {
            return Ok((0, Vec::new()));
        };
        let ws = self.config.window_size as u64;
        let span = self.config.source_windows as u64;
        let mut first = (offset / ws).saturating_sub(span / 2);
        if let Some(end) = binding.known_end() {
            let blocks = end.div_ceil(ws);
            first = first.min(blocks.saturating_sub(span).max(self.last_first));
        }
        self.last_first = first;

        match load_blocks(&mut self.pool, binding, self.config.window_size, first, span) {
            Ok(keys) => Ok((first * ws, keys)),
            Err(StreamError::Io(e)) if e.kind() == io::ErrorKind::Unsupported => {
                log::warn!("source cannot be positioned at block {first} ({e}); encoding without it");
                Ok((0, Vec::new()))
            }
            Err(e) => Err(e),
        }
    }

    /// Block size for a decode-side segment of `len` bytes at `offset`.
    ///
    /// Blocks start at the session window size and grow until the segment
    /// fits in the unpinned part of the pool. Segments wider than
    /// `max_window_size` per free slot are refused.
    fn decode_block_size(&self, offset: u64, len: u64) -> Result<usize, StreamError> {
        let available = self.pool.capacity() - 1;
        let slots = available as u64;
        let ceiling = self.config.max_window_size as u64 * slots;
        let too_large = || ResourceError::SourceSpanTooLarge {
            blocks: len.div_ceil(self.config.max_window_size as u64),
            available,
        };
        if len > ceiling {
            return Err(too_large().into());
        }
        let floor = self.config.window_size.max(self.source_block) as u64;
        let blocks_for = |block: u64| (offset + len).div_ceil(block) - offset / block;

        let mut block = floor.max(len.div_ceil(slots));
        if blocks_for(block) > slots && slots > 1 {
            block = floor.max(len.div_ceil(slots - 1));
        }
        if blocks_for(block) > slots {
            return Err(too_large().into());
        }
        usize::try_from(block).map_err(|_| ResourceError::Allocation(usize::MAX).into())
    }

    /// Pin the source blocks covering the segment a window header names.
    /// Returns the block size used together with the keys.
    fn decode_source_blocks(
        &mut self,
        header: &WindowHeader,
    ) -> Result<(usize, Vec<WindowKey>), StreamError> {
        if header.copy_len == 0 {
            return Ok((self.config.window_size, Vec::new()));
        }
        let block = self.decode_block_size(header.copy_offset, header.copy_len)?;
        if block != self.source_block {
            if self.source_block != 0 {
                log::debug!("source blocks grow from {} to {block} bytes", self.source_block);
            }
            self.pool.clear_origin(crate::window::Origin::Source);
            self.source_block = block;
        }
        let bs = block as u64;
        let first = header.copy_offset / bs;
        let end = header.copy_offset + header.copy_len;
        let count = end.div_ceil(bs) - first;

        let binding = self.source.as_mut().ok_or_else(|| {
            StreamError::Format(DecodeError::InvalidInput(
                "window copies from a source but none is bound".into(),
            ))
        })?;
        let keys = load_blocks(&mut self.pool, binding, block, first, count)?;
        let have: u64 = keys
            .iter()
            .filter_map(|k| self.pool.get(*k))
            .map(|w| w.len() as u64)
            .sum();
        if first * bs + have < end {
            self.unpin_all(&keys);
            return Err(StreamError::Format(DecodeError::InvalidInput(format!(
                "source ends at {}, window copies up to {end}",
                first * bs + have
            ))));
        }
        Ok((block, keys))
    }

    fn unpin_all(&mut self, keys: &[WindowKey]) {
        for key in keys {
            self.pool.unpin(*key);
        }
    }

    // -----------------------------------------------------------------------
    // Encoding
    // -----------------------------------------------------------------------

    /// Encode one target window against the source around `offset`.
    fn encode_window(&mut self, target: &[u8], offset: u64) -> Result<Vec<u8>, StreamError> {
        let (seg_offset, keys) = self.encode_source_blocks(offset)?;
        let result = {
            let segment = build_segment(&self.pool, &keys, self.config.window_size, seg_offset, 0, None);
            if let Some(s) = &segment {
                log::trace!("window at {offset} sees source {}..{}", s.offset(), s.offset() + s.len());
            }
            self.core.encode(target, segment.as_ref())
        };
        self.unpin_all(&keys);
        result
    }

    fn pending_window(&mut self) -> Result<WindowKey, StreamError> {
        if let Some(key) = self.pending
            && self.pool.contains(key)
        {
            return Ok(key);
        }
        let ws = self.config.window_size;
        let mut bytes = Vec::new();
        bytes
            .try_reserve_exact(ws)
            .map_err(|_| ResourceError::Allocation(ws))?;
        let key = WindowKey::target(self.windows);
        self.pool
            .insert(Window::new(key, self.target_offset, bytes))?;
        self.pool.pin(key);
        self.pending = Some(key);
        Ok(key)
    }

    // -----------------------------------------------------------------------
    // Decoding
    // -----------------------------------------------------------------------

    fn release_parked(&mut self) {
        if let Some(parked) = self.parked.take() {
            self.pool.unpin(parked.key);
            self.pool.remove(parked.key);
        }
    }

    /// Copy from the parked window into `buf`.
    fn serve_parked(&mut self, buf: &mut [u8]) -> usize {
        let Some(parked) = self.parked.as_mut() else {
            return 0;
        };
        let Some(window) = self.pool.get(parked.key) else {
            return 0;
        };
        let avail = &window.bytes[parked.served.min(window.len())..];
        let n = avail.len().min(buf.len());
        buf[..n].copy_from_slice(&avail[..n]);
        parked.served += n;
        self.position += n as u64;
        n
    }
}

/// Load and pin source blocks `first..first + count`, stopping at the end
/// of the source. The blocks of a failed call are left unpinned.
fn load_blocks(
    pool: &mut WindowPool,
    binding: &mut SourceBinding,
    block_size: usize,
    first: u64,
    count: u64,
) -> Result<Vec<WindowKey>, StreamError> {
    let mut keys = Vec::new();
    for index in first..first.saturating_add(count) {
        let offset = index * block_size as u64;
        if binding.known_end().is_some_and(|end| offset >= end) {
            break;
        }
        let key = WindowKey::source(index);
        let loaded = pool.get_or_load(key, || {
            let bytes = binding.read_window(offset, block_size)?;
            Ok(Window::new(key, offset, bytes))
        });
        let len = match loaded {
            Ok(window) => window.len(),
            Err(e) => {
                for key in &keys {
                    pool.unpin(*key);
                }
                return Err(e);
            }
        };
        if len == 0 {
            pool.remove(key);
            break;
        }
        pool.pin(key);
        keys.push(key);
        if len < block_size {
            break;
        }
    }
    Ok(keys)
}

/// View pinned blocks as one segment. With `len = None` the segment runs
/// to the end of the last block.
fn build_segment<'p>(
    pool: &'p WindowPool,
    keys: &[WindowKey],
    block_size: usize,
    offset: u64,
    skip: usize,
    len: Option<u64>,
) -> Option<SourceSegment<'p>> {
    if keys.is_empty() {
        return None;
    }
    let blocks: Vec<&'p [u8]> = keys
        .iter()
        .filter_map(|k| pool.get(*k))
        .map(|w| w.bytes.as_slice())
        .collect();
    if blocks.len() != keys.len() {
        return None;
    }
    let total: u64 = blocks.iter().map(|b| b.len() as u64).sum();
    let len = len.unwrap_or(total - skip as u64);
    SourceSegment::new(offset, blocks, block_size, skip, len)
}

/// Counts bytes pulled from the encoded input.
struct CountingReader<'a, R> {
    inner: &'a mut R,
    count: &'a mut u64,
}

impl<R: Read> Read for CountingReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        *self.count += n as u64;
        Ok(n)
    }
}

// ---------------------------------------------------------------------------
// Write side
// ---------------------------------------------------------------------------

impl<F: Write, C: TransformCore> DeltaStream<F, C> {
    /// Accept plaintext. Full windows are encoded and written immediately.
    pub fn write(&mut self, data: &[u8]) -> Result<usize, StreamError> {
        self.check_usable()?;
        match self.phase {
            Phase::Reading => return Err(UsageError::WriteWhileReading.into()),
            Phase::Idle => {
                self.finish_fn = Some(Self::finish_writing);
                self.enter(Phase::Writing);
            }
            Phase::Writing | Phase::Closed => {}
        }
        match self.append(data) {
            Ok(()) => Ok(data.len()),
            Err(e) => self.fail(e),
        }
    }

    fn append(&mut self, mut data: &[u8]) -> Result<(), StreamError> {
        let ws = self.config.window_size;
        while !data.is_empty() {
            let key = self.pending_window()?;
            let capacity = self.pool.capacity();
            let filled = self.pool.get(key).map_or(0, Window::len);
            let n = (ws - filled).min(data.len());
            let len = self
                .pool
                .extend(key, &data[..n])
                .ok_or(ResourceError::PoolExhausted { capacity })?;
            let full = len == ws;
            data = &data[n..];
            self.bytes_consumed += n as u64;
            if full {
                self.encode_pending()?;
            }
        }
        Ok(())
    }

    fn write_file_header(&mut self) -> Result<(), StreamError> {
        if self.header_written {
            return Ok(());
        }
        let header = FileHeader::new(self.core.secondary_id()).to_bytes();
        let handle = self.handle.as_mut().ok_or(UsageError::Closed)?;
        handle.write_all(&header)?;
        self.header_written = true;
        self.bytes_produced += header.len() as u64;
        Ok(())
    }

    /// Encode the pending window. An empty window is only written when it
    /// would be the stream's only one.
    fn encode_pending(&mut self) -> Result<(), StreamError> {
        let Some(key) = self.pending.take() else {
            return Ok(());
        };
        self.pool.unpin(key);
        let Some(window) = self.pool.remove(key) else {
            return Ok(());
        };
        if window.is_empty() && self.windows > 0 {
            return Ok(());
        }
        self.write_file_header()?;
        let record = self.encode_window(&window.bytes, window.offset)?;
        let handle = self.handle.as_mut().ok_or(UsageError::Closed)?;
        handle.write_all(&record)?;

        log::debug!(
            "encoded window {} ({} bytes at {}) into {} bytes",
            self.windows,
            window.len(),
            window.offset,
            record.len()
        );
        self.bytes_produced += record.len() as u64;
        self.windows += 1;
        self.target_offset = window.offset + window.len() as u64;
        Ok(())
    }

    fn finish_writing(&mut self) -> Result<(), StreamError> {
        self.write_file_header()?;
        if self.windows == 0 && self.pending.is_none() {
            self.pending_window()?;
        }
        self.encode_pending()?;
        let handle = self.handle.as_mut().ok_or(UsageError::Closed)?;
        handle.flush()?;
        Ok(())
    }

    /// Emit everything accepted so far. Flushing twice in a row writes
    /// nothing the second time.
    pub fn flush(&mut self) -> Result<(), StreamError> {
        match self.phase {
            Phase::Closed => Err(UsageError::Closed.into()),
            Phase::Reading => Ok(()),
            Phase::Idle => {
                if let Some(handle) = self.handle.as_mut() {
                    handle.flush()?;
                }
                Ok(())
            }
            Phase::Writing => {
                self.check_usable()?;
                match self.finish_writing() {
                    Ok(()) => Ok(()),
                    Err(e) => self.fail(e),
                }
            }
        }
    }
}

impl<F: Seek, C: TransformCore> DeltaStream<F, C> {
    /// Finish the current phase, rewind the handle and start over with the
    /// same source.
    pub fn reopen(&mut self) -> Result<(), StreamError> {
        if self.phase == Phase::Closed {
            return Err(UsageError::Closed.into());
        }
        self.finish_phase()?;
        let handle = self.handle.as_mut().ok_or(UsageError::Closed)?;
        handle.seek(SeekFrom::Start(0))?;
        self.reset_codec();
        if let Some(source) = self.source.as_mut() {
            source.rewind();
        }
        self.enter(Phase::Idle);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Read side
// ---------------------------------------------------------------------------

impl<F: Read, C: TransformCore> DeltaStream<F, C> {
    fn begin_reading(&mut self) -> Result<(), StreamError> {
        self.check_usable()?;
        match self.phase {
            Phase::Writing => Err(UsageError::ReadWhileWriting.into()),
            Phase::Idle => {
                self.enter(Phase::Reading);
                Ok(())
            }
            Phase::Reading | Phase::Closed => Ok(()),
        }
    }

    /// Decode into `buf`. Returns 0 at the end of the encoded input.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, StreamError> {
        self.begin_reading()?;
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            let n = self.serve_parked(buf);
            if n > 0 {
                return Ok(n);
            }
            if self.input_done {
                return Ok(0);
            }
            self.release_parked();
            match self.decode_next() {
                Ok(true) => {}
                Ok(false) => {
                    self.input_done = true;
                    log::debug!(
                        "decoded {} windows, {} bytes",
                        self.windows,
                        self.bytes_produced
                    );
                }
                Err(e) => return self.fail(e),
            }
        }
    }

    /// Read up to `limit` plaintext bytes, or everything with `None`.
    pub fn read_bytes(&mut self, limit: Option<usize>) -> Result<Vec<u8>, StreamError> {
        self.begin_reading()?;
        let mut out = Vec::new();
        let mut chunk = vec![0u8; 64 * 1024];
        loop {
            let want = match limit {
                Some(limit) if out.len() >= limit => break,
                Some(limit) => (limit - out.len()).min(chunk.len()),
                None => chunk.len(),
            };
            let n = self.read(&mut chunk[..want])?;
            if n == 0 {
                break;
            }
            out.try_reserve(n)
                .map_err(|_| ResourceError::Allocation(out.len() + n))?;
            out.extend_from_slice(&chunk[..n]);
        }
        Ok(out)
    }

    /// Decode the next window record and park its plaintext. Returns
    /// `false` at the end of the input.
    fn decode_next(&mut self) -> Result<bool, StreamError> {
        let handle = self.handle.as_mut().ok_or(UsageError::Closed)?;
        let mut input = CountingReader {
            inner: handle,
            count: &mut self.bytes_consumed,
        };

        if self.file_header.is_none() {
            match FileHeader::read_from(&mut input)? {
                Some(header) => {
                    log::debug!("file header: secondary {:?}", header.secondary_id);
                    self.file_header = Some(header);
                }
                None => return Ok(false),
            }
        }
        let Some(header) = WindowHeader::read_from(&mut input)? else {
            return Ok(false);
        };
        let limit = self.config.max_window_size as u64;
        let widest_section = header.data_len.max(header.inst_len).max(header.addr_len);
        for size in [header.target_len, widest_section] {
            if size > limit {
                return Err(ResourceError::WindowTooLarge { size, limit }.into());
            }
        }
        let record = WindowRecord::read_sections(header, &mut input)?;

        let (block, keys) = if record.header.has_source() {
            self.decode_source_blocks(&record.header)?
        } else {
            (self.config.window_size, Vec::new())
        };
        let secondary_id = self.secondary_id();
        let decoded = {
            let (offset, len) = (record.header.copy_offset, record.header.copy_len);
            let segment = if !record.header.has_source() {
                Ok(None)
            } else if len == 0 {
                Ok(Some(SourceSegment::contiguous(offset, &[])))
            } else {
                let skip = (offset % block as u64) as usize;
                build_segment(&self.pool, &keys, block, offset, skip, Some(len))
                    .map(Some)
                    .ok_or_else(|| DecodeError::InvalidInput("source segment unavailable".into()))
            };
            segment.and_then(|s| self.core.decode(&record, secondary_id, s.as_ref()))
        };
        self.unpin_all(&keys);
        let plain = decoded?;

        log::debug!(
            "decoded window {} ({} bytes from {} encoded)",
            self.windows,
            plain.len(),
            record.header.enc_len
        );
        let key = WindowKey::target(self.windows);
        let len = plain.len() as u64;
        self.pool
            .insert(Window::new(key, self.target_offset, plain))?;
        self.pool.pin(key);
        self.parked = Some(Parked { key, served: 0 });
        self.windows += 1;
        self.target_offset += len;
        self.bytes_produced += len;
        Ok(true)
    }

    /// Move the read position to `target`. Forward moves decode and discard;
    /// backward moves stay inside the current window.
    fn seek_to(&mut self, target: u64) -> Result<u64, StreamError> {
        self.begin_reading()?;
        if target >= self.position {
            let mut scratch = [0u8; 8192];
            while self.position < target {
                let want = ((target - self.position) as usize).min(scratch.len());
                if self.read(&mut scratch[..want])? == 0 {
                    break;
                }
            }
            return Ok(self.position);
        }
        if let Some(parked) = self.parked.as_mut()
            && let Some(window) = self.pool.get(parked.key)
            && target >= window.offset
        {
            parked.served = (target - window.offset) as usize;
            self.position = target;
            return Ok(target);
        }
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            format!(
                "cannot seek back to {target} from {}; delta streams only move forward",
                self.position
            ),
        )
        .into())
    }
}

impl<F: Write, C: TransformCore> Write for DeltaStream<F, C> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        DeltaStream::write(self, buf).map_err(io::Error::from)
    }

    fn flush(&mut self) -> io::Result<()> {
        DeltaStream::flush(self).map_err(io::Error::from)
    }
}

impl<F: Read, C: TransformCore> Read for DeltaStream<F, C> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        DeltaStream::read(self, buf).map_err(io::Error::from)
    }
}

/// Forward-only seeking over the decoded plaintext, so a decoding stream
/// can be the source of another stream.
impl<F: Read, C: TransformCore> Seek for DeltaStream<F, C> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(n) => n,
            SeekFrom::Current(delta) => self.position.checked_add_signed(delta).ok_or_else(|| {
                io::Error::new(io::ErrorKind::InvalidInput, "seek before the start")
            })?,
            SeekFrom::End(_) => {
                return Err(io::Error::new(
                    io::ErrorKind::Unsupported,
                    "delta streams do not know their decoded length",
                ));
            }
        };
        self.seek_to(target).map_err(io::Error::from)
    }
}

impl<F, C: TransformCore> Drop for DeltaStream<F, C> {
    fn drop(&mut self) {
        if let Err(e) = self.finish_phase() {
            log::warn!("delta stream dropped with unwritten data: {e}");
        }
    }
}

impl<F, C: TransformCore> std::fmt::Debug for DeltaStream<F, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeltaStream")
            .field("phase", &self.phase)
            .field("poisoned", &self.poisoned)
            .field("has_source", &self.source.is_some())
            .field("windows", &self.windows)
            .field("bytes_consumed", &self.bytes_consumed)
            .field("bytes_produced", &self.bytes_produced)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn small() -> StreamConfig {
        StreamConfig::default()
            .with_window_size(1024)
            .with_source_windows(2)
            .with_pool_capacity(4)
    }

    fn lcg_bytes(len: usize, seed: u32) -> Vec<u8> {
        let mut state = seed;
        (0..len)
            .map(|_| {
                state = state.wrapping_mul(1_103_515_245).wrapping_add(12_345);
                (state >> 16) as u8
            })
            .collect()
    }

    fn encode(data: &[u8], source: Option<&[u8]>) -> Vec<u8> {
        let mut stream = DeltaStream::new(Vec::new(), small()).unwrap();
        if let Some(src) = source {
            stream.bind_source(Cursor::new(src.to_vec())).unwrap();
        }
        stream.write(data).unwrap();
        stream.close().unwrap().unwrap()
    }

    fn decode(delta: &[u8], source: Option<&[u8]>) -> Result<Vec<u8>, StreamError> {
        let mut stream = DeltaStream::new(Cursor::new(delta.to_vec()), small())?;
        if let Some(src) = source {
            stream.bind_source(Cursor::new(src.to_vec()))?;
        }
        stream.read_bytes(None)
    }

    #[test]
    fn multi_window_roundtrip_with_source() {
        let source = lcg_bytes(10_000, 1);
        let mut target = source.clone();
        target[5000..5010].fill(b'!');
        let delta = encode(&target, Some(&source));
        assert!(delta.len() < 600, "delta is {} bytes", delta.len());
        assert_eq!(decode(&delta, Some(&source)).unwrap(), target);
    }

    #[test]
    fn writes_emit_full_windows_immediately() {
        let mut stream = DeltaStream::new(Vec::new(), small()).unwrap();
        stream.write(&lcg_bytes(1000, 2)).unwrap();
        assert_eq!(stream.get_ref().unwrap().len(), 0);
        assert_eq!(stream.size(), None);
        stream.write(&lcg_bytes(100, 3)).unwrap();
        assert!(!stream.get_ref().unwrap().is_empty());
        assert_eq!(stream.windows(), 1);
        assert_eq!(stream.bytes_consumed(), 1100);
    }

    #[test]
    fn empty_stream_has_one_window() {
        let delta = encode(b"", None);
        assert_eq!(&delta[..4], &crate::vcdiff::VCDIFF_MAGIC);
        assert!(decode(&delta, None).unwrap().is_empty());
        assert!(decode(b"", None).unwrap().is_empty());
    }

    #[test]
    fn source_blocks_stay_pinned_only_during_a_window() {
        let source = lcg_bytes(8000, 4);
        let mut stream = DeltaStream::new(Vec::new(), small()).unwrap();
        stream.bind_source(Cursor::new(source.clone())).unwrap();
        stream.write(&source).unwrap();
        stream.flush().unwrap();
        let stats = stream.pool_stats();
        assert!(stats.peak_resident <= 4);
        assert!(stats.evictions > 0);
    }

    #[test]
    fn backward_seek_within_window() {
        let data = lcg_bytes(3000, 5);
        let delta = encode(&data, None);
        let mut stream = DeltaStream::new(Cursor::new(delta), small()).unwrap();
        let mut buf = [0u8; 100];
        stream.seek(SeekFrom::Start(2100)).unwrap();
        stream.read(&mut buf).unwrap();
        assert_eq!(&buf[..], &data[2100..2200]);
        stream.seek(SeekFrom::Start(2050)).unwrap();
        stream.read(&mut buf).unwrap();
        assert_eq!(&buf[..], &data[2050..2150]);
        let err = stream.seek(SeekFrom::Start(10)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Unsupported);
    }

    #[test]
    fn missing_source_is_format_error() {
        let source = lcg_bytes(4000, 6);
        let delta = encode(&source, Some(&source));
        let err = decode(&delta, None).unwrap_err();
        assert!(err.is_format(), "{err}");
        let err = decode(&delta, Some(&source[..100])).unwrap_err();
        assert!(err.is_format(), "{err}");
    }
}
