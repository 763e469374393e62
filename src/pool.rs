// Window buffer pool: a fixed number of target and source windows shared by
// one session, evicted least-recently-used first. Pinned windows are never
// evicted.

use std::collections::HashMap;

use crate::error::{ResourceError, StreamError};
use crate::window::{Origin, Window, WindowKey};

#[derive(Debug)]
struct Entry {
    window: Window,
    pins: u32,
    tick: u64,
}

/// Counters reported by [`WindowPool::stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub capacity: usize,
    pub resident: usize,
    pub peak_resident: usize,
    pub resident_bytes: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

#[derive(Debug)]
pub struct WindowPool {
    capacity: usize,
    entries: HashMap<WindowKey, Entry>,
    clock: u64,
    stats: PoolStats,
}

impl WindowPool {
    /// A pool holding at most `capacity` windows (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: HashMap::with_capacity(capacity),
            clock: 0,
            stats: PoolStats {
                capacity,
                ..PoolStats::default()
            },
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: WindowKey) -> bool {
        self.entries.contains_key(&key)
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    /// Look a window up without changing its recency.
    pub fn get(&self, key: WindowKey) -> Option<&Window> {
        self.entries.get(&key).map(|e| &e.window)
    }

    /// Append `data` to a resident window and return its new length.
    pub fn extend(&mut self, key: WindowKey, data: &[u8]) -> Option<usize> {
        let tick = self.tick();
        let entry = self.entries.get_mut(&key)?;
        entry.tick = tick;
        entry.window.bytes.extend_from_slice(data);
        self.stats.resident_bytes += data.len();
        Some(entry.window.len())
    }

    /// Return the cached window for `key`, or insert the one `load` builds.
    pub fn get_or_load<L>(&mut self, key: WindowKey, load: L) -> Result<&Window, StreamError>
    where
        L: FnOnce() -> Result<Window, StreamError>,
    {
        if self.entries.contains_key(&key) {
            self.stats.hits += 1;
            log::trace!("pool hit {key:?}");
            let tick = self.tick();
            if let Some(entry) = self.entries.get_mut(&key) {
                entry.tick = tick;
            }
            let capacity = self.capacity;
            return self
                .get(key)
                .ok_or_else(|| ResourceError::PoolExhausted { capacity }.into());
        }
        self.stats.misses += 1;
        log::trace!("pool miss {key:?}");
        let window = load()?;
        self.insert(window)
    }

    /// Insert `window`, replacing any window with the same key and evicting
    /// the least recently used unpinned window when full.
    pub fn insert(&mut self, window: Window) -> Result<&Window, StreamError> {
        let key = window.key;
        let pins = match self.entries.remove(&key) {
            Some(old) => {
                self.stats.resident_bytes -= old.window.len();
                old.pins
            }
            None => {
                if self.entries.len() >= self.capacity {
                    self.evict_one()?;
                }
                0
            }
        };
        let tick = self.tick();
        self.stats.resident_bytes += window.len();
        self.entries.insert(key, Entry { window, pins, tick });
        self.stats.resident = self.entries.len();
        self.stats.peak_resident = self.stats.peak_resident.max(self.stats.resident);
        let capacity = self.capacity;
        self.get(key)
            .ok_or_else(|| ResourceError::PoolExhausted { capacity }.into())
    }

    fn evict_one(&mut self) -> Result<(), StreamError> {
        let victim = self
            .entries
            .iter()
            .filter(|(_, e)| e.pins == 0)
            .min_by_key(|(_, e)| e.tick)
            .map(|(k, _)| *k)
            .ok_or(ResourceError::PoolExhausted {
                capacity: self.capacity,
            })?;
        if let Some(old) = self.entries.remove(&victim) {
            self.stats.resident_bytes -= old.window.len();
            self.stats.evictions += 1;
            log::trace!("pool evict {victim:?}");
        }
        Ok(())
    }

    /// Pin a resident window. Returns `false` if it is not resident.
    pub fn pin(&mut self, key: WindowKey) -> bool {
        match self.entries.get_mut(&key) {
            Some(e) => {
                e.pins += 1;
                true
            }
            None => false,
        }
    }

    /// Drop one pin. Returns `false` if the window is absent or unpinned.
    pub fn unpin(&mut self, key: WindowKey) -> bool {
        match self.entries.get_mut(&key) {
            Some(e) if e.pins > 0 => {
                e.pins -= 1;
                true
            }
            _ => false,
        }
    }

    pub fn is_pinned(&self, key: WindowKey) -> bool {
        self.entries.get(&key).is_some_and(|e| e.pins > 0)
    }

    pub fn remove(&mut self, key: WindowKey) -> Option<Window> {
        let entry = self.entries.remove(&key)?;
        self.stats.resident_bytes -= entry.window.len();
        self.stats.resident = self.entries.len();
        Some(entry.window)
    }

    /// Unpin every window.
    pub fn release_all(&mut self) {
        for entry in self.entries.values_mut() {
            entry.pins = 0;
        }
    }

    /// Drop every window of one origin.
    pub fn clear_origin(&mut self, origin: Origin) {
        self.entries.retain(|k, _| k.origin != origin);
        self.stats.resident = self.entries.len();
        self.stats.resident_bytes = self.entries.values().map(|e| e.window.len()).sum();
    }

    /// Drop every window. Counters other than residency are kept.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.stats.resident = 0;
        self.stats.resident_bytes = 0;
    }

    pub fn stats(&self) -> PoolStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn src(index: u64, len: usize) -> Window {
        Window::new(WindowKey::source(index), index * len as u64, vec![index as u8; len])
    }

    #[test]
    fn evicts_least_recently_used() {
        let mut pool = WindowPool::new(2);
        pool.insert(src(0, 4)).unwrap();
        pool.insert(src(1, 4)).unwrap();
        pool.get_or_load(WindowKey::source(0), || unreachable!())
            .unwrap();
        pool.insert(src(2, 4)).unwrap();
        assert!(pool.contains(WindowKey::source(0)));
        assert!(!pool.contains(WindowKey::source(1)));
        assert!(pool.contains(WindowKey::source(2)));
        let stats = pool.stats();
        assert_eq!((stats.hits, stats.evictions), (1, 1));
        assert_eq!(stats.resident_bytes, 8);
    }

    #[test]
    fn extend_counts_resident_bytes() {
        let mut pool = WindowPool::new(2);
        let key = WindowKey::target(0);
        pool.insert(Window::new(key, 0, Vec::new())).unwrap();
        assert_eq!(pool.extend(key, &[1; 10]), Some(10));
        assert_eq!(pool.extend(key, &[2; 5]), Some(15));
        assert_eq!(pool.stats().resident_bytes, 15);
        assert_eq!(pool.extend(WindowKey::target(1), &[3]), None);

        assert_eq!(pool.remove(key).map(|w| w.len()), Some(15));
        assert_eq!(pool.stats().resident_bytes, 0);
    }

    #[test]
    fn pinned_windows_survive() {
        let mut pool = WindowPool::new(2);
        pool.insert(src(0, 4)).unwrap();
        assert!(pool.pin(WindowKey::source(0)));
        pool.insert(src(1, 4)).unwrap();
        pool.insert(src(2, 4)).unwrap();
        assert!(pool.contains(WindowKey::source(0)));
        assert!(!pool.contains(WindowKey::source(1)));
    }

    #[test]
    fn all_pinned_is_exhaustion() {
        let mut pool = WindowPool::new(1);
        pool.insert(src(0, 4)).unwrap();
        pool.pin(WindowKey::source(0));
        let err = pool.insert(src(1, 4)).unwrap_err();
        assert!(matches!(
            err,
            StreamError::Resource(ResourceError::PoolExhausted { capacity: 1 })
        ));
        pool.release_all();
        pool.insert(src(1, 4)).unwrap();
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn replacing_keeps_pins() {
        let mut pool = WindowPool::new(1);
        pool.insert(src(0, 4)).unwrap();
        pool.pin(WindowKey::source(0));
        pool.insert(src(0, 8)).unwrap();
        assert!(pool.is_pinned(WindowKey::source(0)));
        assert_eq!(pool.stats().resident_bytes, 8);
        assert!(pool.unpin(WindowKey::source(0)));
        assert!(!pool.unpin(WindowKey::source(0)));
    }

    #[test]
    fn loader_errors_propagate() {
        let mut pool = WindowPool::new(2);
        let err = pool
            .get_or_load(WindowKey::target(0), || {
                Err(ResourceError::Allocation(10).into())
            })
            .unwrap_err();
        assert!(err.is_resource());
        assert!(pool.is_empty());
        assert_eq!(pool.stats().misses, 1);
    }

    #[test]
    fn peak_never_exceeds_capacity() {
        let mut pool = WindowPool::new(3);
        for i in 0..50 {
            pool.get_or_load(WindowKey::source(i % 7), || Ok(src(i % 7, 16)))
                .unwrap();
        }
        assert_eq!(pool.stats().peak_resident, 3);
        pool.insert(Window::new(WindowKey::target(0), 0, vec![1, 2])).unwrap();
        pool.clear_origin(Origin::Source);
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.stats().resident_bytes, 2);
        pool.clear();
        assert!(pool.is_empty());
    }
}
