#![no_main]
use std::io::Cursor;

use deltafile::{DeltaStream, StreamConfig};
use libfuzzer_sys::fuzz_target;

fn config() -> StreamConfig {
    StreamConfig::default()
        .with_window_size(1 << 12)
        .with_max_window_size(1 << 16)
        .with_source_windows(2)
        .with_pool_capacity(3)
}

fuzz_target!(|data: &[u8]| {
    // Arbitrary input must only ever produce errors, never panics.
    if let Ok(mut stream) = DeltaStream::new(data, config()) {
        let _ = stream.read_bytes(Some(1 << 20));
    }

    if data.len() >= 2 {
        let (source, delta) = data.split_at(data.len() / 2);
        if let Ok(mut stream) = DeltaStream::with_source(delta, Cursor::new(source.to_vec()), config()) {
            let _ = stream.read_bytes(Some(1 << 20));
        }
    }
});
