#![no_main]
use std::io::Cursor;

use deltafile::{DeltaStream, StreamConfig};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if data.len() < 4 {
        return;
    }

    // data[0]: level, data[1]: write chunk, data[2..]: source then target.
    let level = (data[0] % 10) as u32;
    let chunk = data[1] as usize + 1;
    let split = 2 + (data[2] as usize % (data.len() - 2));
    let source = data[2..split].to_vec();
    let target = &data[split..];

    let config = StreamConfig::default()
        .with_window_size(1 << 10)
        .with_source_windows(2)
        .with_pool_capacity(3)
        .with_level(level);

    let mut enc = DeltaStream::with_source(Vec::new(), Cursor::new(source.clone()), config.clone()).unwrap();
    for piece in target.chunks(chunk) {
        enc.write(piece).unwrap();
    }
    let delta = enc.close().unwrap().unwrap();

    let mut dec = DeltaStream::with_source(Cursor::new(delta), Cursor::new(source), config).unwrap();
    assert_eq!(dec.read_bytes(None).unwrap(), target);
});
