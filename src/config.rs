// Session configuration.

use crate::compress::secondary::SecondaryCompression;
use crate::error::StreamError;
use crate::hash::config::MAX_LEVEL;
use crate::vcdiff::HARD_MAX_WINDOW;

/// Default target and source window size (8 MiB).
pub const DEFAULT_WINDOW_SIZE: usize = 1 << 23;

/// Default number of source blocks visible to one target window.
pub const DEFAULT_SOURCE_WINDOWS: usize = 8;

/// Default pool capacity in windows.
pub const DEFAULT_POOL_CAPACITY: usize = 12;

/// Default compression level.
pub const DEFAULT_LEVEL: u32 = 6;

/// Smallest accepted window size.
pub const MIN_WINDOW_SIZE: usize = 1 << 10;

/// Tuning for a `DeltaStream`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamConfig {
    /// Bytes per encoded target window and per source block.
    pub window_size: usize,
    /// Largest target window accepted while decoding.
    pub max_window_size: usize,
    /// Source blocks visible to one target window.
    pub source_windows: usize,
    /// Windows the buffer pool may hold.
    pub pool_capacity: usize,
    /// Compression level 0-9; 0 stores literals only.
    pub level: u32,
    /// Emit an Adler-32 per window and verify it on decode.
    pub checksum: bool,
    pub secondary: SecondaryCompression,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_WINDOW_SIZE,
            max_window_size: HARD_MAX_WINDOW as usize,
            source_windows: DEFAULT_SOURCE_WINDOWS,
            pool_capacity: DEFAULT_POOL_CAPACITY,
            level: DEFAULT_LEVEL,
            checksum: true,
            secondary: SecondaryCompression::None,
        }
    }
}

impl StreamConfig {
    pub fn with_window_size(mut self, window_size: usize) -> Self {
        self.window_size = window_size;
        self
    }

    pub fn with_max_window_size(mut self, max_window_size: usize) -> Self {
        self.max_window_size = max_window_size;
        self
    }

    pub fn with_source_windows(mut self, source_windows: usize) -> Self {
        self.source_windows = source_windows;
        self
    }

    pub fn with_pool_capacity(mut self, pool_capacity: usize) -> Self {
        self.pool_capacity = pool_capacity;
        self
    }

    pub fn with_level(mut self, level: u32) -> Self {
        self.level = level;
        self
    }

    pub fn with_checksum(mut self, checksum: bool) -> Self {
        self.checksum = checksum;
        self
    }

    pub fn with_secondary(mut self, secondary: SecondaryCompression) -> Self {
        self.secondary = secondary;
        self
    }

    /// Check every field; the first problem found is reported.
    pub fn validate(&self) -> Result<(), StreamError> {
        let fail = |msg: String| Err(StreamError::Config(msg));
        if self.window_size < MIN_WINDOW_SIZE {
            return fail(format!(
                "window_size {} is below the minimum of {MIN_WINDOW_SIZE}",
                self.window_size
            ));
        }
        if self.window_size as u64 > HARD_MAX_WINDOW {
            return fail(format!(
                "window_size {} exceeds the format maximum of {HARD_MAX_WINDOW}",
                self.window_size
            ));
        }
        if self.max_window_size < self.window_size {
            return fail(format!(
                "max_window_size {} is smaller than window_size {}",
                self.max_window_size, self.window_size
            ));
        }
        if self.source_windows == 0 {
            return fail("source_windows must be at least 1".into());
        }
        if self.pool_capacity < self.source_windows + 1 {
            return fail(format!(
                "pool_capacity {} must exceed source_windows {}",
                self.pool_capacity, self.source_windows
            ));
        }
        if self.level > MAX_LEVEL {
            return fail(format!("level {} is above {MAX_LEVEL}", self.level));
        }
        Ok(())
    }

    /// Source bytes one target window can see.
    pub fn source_span(&self) -> u64 {
        self.window_size as u64 * self.source_windows as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = StreamConfig::default();
        config.validate().unwrap();
        assert_eq!(config.window_size, 1 << 23);
        assert_eq!(config.max_window_size, 1 << 24);
        assert_eq!(config.source_span(), 64 << 20);
    }

    #[test]
    fn rejects_bad_values() {
        let base = StreamConfig::default();
        for bad in [
            base.clone().with_window_size(10),
            base.clone().with_window_size(1 << 25),
            base.clone().with_max_window_size(1 << 20),
            base.clone().with_source_windows(0),
            base.clone().with_pool_capacity(8),
            base.clone().with_level(10),
        ] {
            assert!(
                matches!(bad.validate(), Err(StreamError::Config(_))),
                "{bad:?}"
            );
        }
    }

    #[test]
    fn builders_compose() {
        let config = StreamConfig::default()
            .with_window_size(4096)
            .with_source_windows(2)
            .with_pool_capacity(3)
            .with_level(0)
            .with_checksum(false);
        config.validate().unwrap();
        assert_eq!(config.source_span(), 8192);
        assert!(!config.checksum);
    }
}
