// Windows: the fixed-size units the session moves through the pool, and the
// borrowed source view handed to the transform core.

/// Which stream a window belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Origin {
    Target,
    Source,
}

/// Pool key: origin plus window index within that stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WindowKey {
    pub origin: Origin,
    pub index: u64,
}

impl WindowKey {
    pub fn target(index: u64) -> Self {
        Self {
            origin: Origin::Target,
            index,
        }
    }

    pub fn source(index: u64) -> Self {
        Self {
            origin: Origin::Source,
            index,
        }
    }
}

/// A chunk of target or source bytes with its absolute stream offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Window {
    pub key: WindowKey,
    pub offset: u64,
    pub bytes: Vec<u8>,
}

impl Window {
    pub fn new(key: WindowKey, offset: u64, bytes: Vec<u8>) -> Self {
        Self { key, offset, bytes }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Source segment
// ---------------------------------------------------------------------------

/// Read-only view of a contiguous source range spread over pool blocks.
///
/// Every block but the last holds exactly `block_size` bytes. The view
/// starts `skip` bytes into the first block and is `len` bytes long.
#[derive(Debug, Clone)]
pub struct SourceSegment<'a> {
    offset: u64,
    blocks: Vec<&'a [u8]>,
    block_size: usize,
    skip: usize,
    len: u64,
}

impl<'a> SourceSegment<'a> {
    /// View `len` bytes starting at absolute `offset`, where `blocks[0]`
    /// begins at `offset - skip`.
    ///
    /// Returns `None` when the blocks do not cover the requested range.
    pub fn new(
        offset: u64,
        blocks: Vec<&'a [u8]>,
        block_size: usize,
        skip: usize,
        len: u64,
    ) -> Option<Self> {
        if block_size == 0 || skip > block_size {
            return None;
        }
        let mut available = 0u64;
        for (i, block) in blocks.iter().enumerate() {
            let last = i + 1 == blocks.len();
            if block.len() > block_size || (!last && block.len() != block_size) {
                return None;
            }
            available += block.len() as u64;
        }
        if available < skip as u64 + len {
            return None;
        }
        Some(Self {
            offset,
            blocks,
            block_size,
            skip,
            len,
        })
    }

    /// A segment over one in-memory slice.
    pub fn contiguous(offset: u64, data: &'a [u8]) -> Self {
        Self {
            offset,
            blocks: vec![data],
            block_size: data.len().max(1),
            skip: 0,
            len: data.len() as u64,
        }
    }

    /// Absolute offset of the first byte in the source stream.
    #[inline]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    #[inline]
    pub fn len(&self) -> u64 {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Longest contiguous slice starting at `rel`, clipped to the segment.
    pub fn chunk_at(&self, rel: u64) -> &'a [u8] {
        if rel >= self.len {
            return &[];
        }
        let abs = rel + self.skip as u64;
        let block = (abs / self.block_size as u64) as usize;
        let within = (abs % self.block_size as u64) as usize;
        let data = self.blocks[block];
        let room = (self.len - rel).min((data.len() - within) as u64) as usize;
        &data[within..within + room]
    }

    #[inline]
    pub fn byte_at(&self, rel: u64) -> Option<u8> {
        self.chunk_at(rel).first().copied()
    }

    /// Iterate over the segment's bytes in order.
    pub fn bytes(&self) -> impl Iterator<Item = u8> + '_ {
        let mut rel = 0u64;
        std::iter::from_fn(move || {
            let chunk = self.chunk_at(rel);
            if chunk.is_empty() {
                return None;
            }
            rel += chunk.len() as u64;
            Some(chunk)
        })
        .flat_map(|chunk| chunk.iter().copied())
    }

    /// Length of the common prefix of `self[rel..]` and `other`.
    pub fn match_forward(&self, rel: u64, other: &[u8]) -> usize {
        let mut matched = 0usize;
        while matched < other.len() {
            let chunk = self.chunk_at(rel + matched as u64);
            if chunk.is_empty() {
                break;
            }
            let want = &other[matched..];
            let n = chunk.len().min(want.len());
            let same = common_prefix(&chunk[..n], &want[..n]);
            matched += same;
            if same < n {
                break;
            }
        }
        matched
    }

    /// Count equal bytes walking backwards from `self[rel - 1]` and
    /// `before[before.len() - 1]`, up to `limit`.
    pub fn match_backward(&self, rel: u64, before: &[u8], limit: usize) -> usize {
        let limit = limit.min(before.len()).min(rel as usize);
        let mut n = 0;
        while n < limit {
            let Some(byte) = self.byte_at(rel - 1 - n as u64) else {
                break;
            };
            if byte != before[before.len() - 1 - n] {
                break;
            }
            n += 1;
        }
        n
    }

    /// Append `self[rel..rel + len]` to `out`. Returns `false` when the
    /// range leaves the segment.
    pub fn copy_into(&self, rel: u64, len: usize, out: &mut Vec<u8>) -> bool {
        if rel.checked_add(len as u64).is_none_or(|end| end > self.len) {
            return false;
        }
        let mut done = 0usize;
        while done < len {
            let chunk = self.chunk_at(rel + done as u64);
            let n = chunk.len().min(len - done);
            out.extend_from_slice(&chunk[..n]);
            done += n;
        }
        true
    }
}

#[inline]
pub(crate) fn common_prefix(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blocks() -> Vec<Vec<u8>> {
        vec![b"abcd".to_vec(), b"efgh".to_vec(), b"ij".to_vec()]
    }

    #[test]
    fn chunks_cross_block_boundaries() {
        let data = blocks();
        let seg = SourceSegment::new(100, data.iter().map(Vec::as_slice).collect(), 4, 1, 8)
            .expect("covered");
        assert_eq!(seg.offset(), 100);
        assert_eq!(seg.chunk_at(0), b"bcd");
        assert_eq!(seg.chunk_at(3), b"efgh");
        assert_eq!(seg.chunk_at(7), b"i");
        assert_eq!(seg.chunk_at(8), b"");
        assert_eq!(seg.bytes().collect::<Vec<_>>(), b"bcdefghi");
    }

    #[test]
    fn uncovered_range_rejected() {
        let data = blocks();
        let views: Vec<&[u8]> = data.iter().map(Vec::as_slice).collect();
        assert!(SourceSegment::new(0, views.clone(), 4, 0, 11).is_none());
        assert!(SourceSegment::new(0, views, 3, 0, 2).is_none());
    }

    #[test]
    fn forward_and_backward_matching() {
        let data = blocks();
        let seg = SourceSegment::new(0, data.iter().map(Vec::as_slice).collect(), 4, 0, 10)
            .expect("covered");
        assert_eq!(seg.match_forward(2, b"cdefgX"), 5);
        assert_eq!(seg.match_forward(8, b"ijk"), 2);
        assert_eq!(seg.match_backward(6, b"xxcdef", 10), 4);
        assert_eq!(seg.match_backward(6, b"xxcdef", 2), 2);
    }

    #[test]
    fn copy_into_checks_bounds() {
        let data = blocks();
        let seg = SourceSegment::new(0, data.iter().map(Vec::as_slice).collect(), 4, 0, 10)
            .expect("covered");
        let mut out = Vec::new();
        assert!(seg.copy_into(3, 6, &mut out));
        assert_eq!(out, b"defghi");
        assert!(!seg.copy_into(8, 3, &mut out));
    }

    #[test]
    fn contiguous_segment() {
        let seg = SourceSegment::contiguous(7, b"hello");
        assert_eq!(seg.len(), 5);
        assert_eq!(seg.chunk_at(1), b"ello");
        assert_eq!(SourceSegment::contiguous(0, b"").chunk_at(0), b"");
    }
}
