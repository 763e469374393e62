// Interoperability with the reference xdelta3 codec, in both directions.

use std::io::Cursor;

use deltafile::{DeltaStream, StreamConfig};

fn generate_data(size: usize, seed: u64) -> Vec<u8> {
    let mut state = seed;
    (0..size)
        .map(|_| {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            (state >> 33) as u8
        })
        .collect()
}

fn mutate_data(base: &[u8], percent: f64, seed: u64) -> Vec<u8> {
    let mut out = base.to_vec();
    let edits = (base.len() as f64 * percent / 100.0) as usize;
    let noise = generate_data(edits * 2, seed);
    for pair in noise.chunks(2) {
        if out.is_empty() {
            break;
        }
        let at = (pair[0] as usize * 257 + pair[1] as usize * 31) % out.len();
        out[at] = pair[1];
    }
    out
}

fn encode(source: &[u8], target: &[u8], config: StreamConfig) -> Vec<u8> {
    let mut stream = DeltaStream::new(Vec::new(), config).unwrap();
    if !source.is_empty() {
        stream.bind_source(Cursor::new(source.to_vec())).unwrap();
    }
    for chunk in target.chunks(1500) {
        stream.write(chunk).unwrap();
    }
    stream.close().unwrap().unwrap()
}

fn decode(source: &[u8], delta: &[u8], config: StreamConfig) -> Vec<u8> {
    let mut stream = DeltaStream::new(Cursor::new(delta.to_vec()), config).unwrap();
    if !source.is_empty() {
        stream.bind_source(Cursor::new(source.to_vec())).unwrap();
    }
    stream.read_bytes(None).unwrap()
}

fn windowed() -> StreamConfig {
    StreamConfig::default()
        .with_window_size(4096)
        .with_source_windows(2)
        .with_pool_capacity(3)
}

#[test]
fn xdelta3_can_decode_our_output() {
    let source = b"The quick brown fox jumps over the lazy dog. 1234567890";
    let target = b"The quick brown cat sits on the lazy mat. 1234567890!!!";
    let delta = encode(source, target, StreamConfig::default());
    let decoded = xdelta3::decode(&delta, source).expect("xdelta3 failed to decode");
    assert_eq!(decoded, target);
}

#[test]
fn we_can_decode_xdelta3_output() {
    let source = b"The quick brown fox jumps over the lazy dog. 1234567890";
    let target = b"The quick brown cat sits on the lazy mat. 1234567890!!!";
    let delta = xdelta3::encode(target, source).expect("xdelta3 failed to encode");
    assert_eq!(decode(source, &delta, StreamConfig::default()), target);
}

#[test]
fn xdelta3_decodes_every_level() {
    let source = generate_data(4096, 33);
    let target = mutate_data(&source, 5.0, 44);
    for level in [0, 1, 6, 9] {
        let delta = encode(&source, &target, StreamConfig::default().with_level(level));
        let decoded = xdelta3::decode(&delta, &source)
            .unwrap_or_else(|| panic!("xdelta3 failed to decode level {level}"));
        assert_eq!(decoded, target, "level {level}");
    }
}

#[test]
fn xdelta3_decodes_sliding_source_windows() {
    let source = generate_data(40 * 1024, 5);
    let target = mutate_data(&source, 1.0, 6);
    let delta = encode(&source, &target, windowed());
    assert!(delta.len() < target.len() / 4);
    let decoded = xdelta3::decode(&delta, &source).expect("xdelta3 failed to decode");
    assert_eq!(decoded, target);
}

#[test]
fn xdelta3_decodes_output_without_source() {
    let target = generate_data(6000, 12);
    let delta = encode(b"", &target, windowed());
    let decoded = xdelta3::decode(&delta, &[]).expect("xdelta3 failed to decode");
    assert_eq!(decoded, target);
}

#[test]
fn we_decode_xdelta3_mutations() {
    let source = generate_data(64 * 1024, 7);
    for (percent, seed) in [(0.5, 1), (3.0, 2), (20.0, 3)] {
        let target = mutate_data(&source, percent, seed);
        let delta = xdelta3::encode(&target, &source).expect("xdelta3 failed to encode");
        assert_eq!(
            decode(&source, &delta, StreamConfig::default()),
            target,
            "{percent}% mutated"
        );
    }
}

#[test]
fn chained_through_xdelta3() {
    // v1 -> v2 by us, v2 -> v3 by xdelta3, v3 rebuilt by us from v1.
    let v1 = generate_data(16 * 1024, 9);
    let v2 = mutate_data(&v1, 2.0, 10);
    let v3 = mutate_data(&v2, 2.0, 11);
    let d12 = encode(&v1, &v2, windowed());
    let d23 = xdelta3::encode(&v3, &v2).expect("xdelta3 failed to encode");

    let v2_stream =
        DeltaStream::with_source(Cursor::new(d12), Cursor::new(v1), windowed()).unwrap();
    let mut v3_stream =
        DeltaStream::with_source(Cursor::new(d23), v2_stream, StreamConfig::default()).unwrap();
    assert_eq!(v3_stream.read_bytes(None).unwrap(), v3);
}
