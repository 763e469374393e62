// File-level helpers around `DeltaStream`.
//
// `encode_stream`/`decode_stream` pump any reader into any writer through a
// session; `encode_file`/`decode_file` add buffered file handling. The
// source is streamed through the session's window pool, never read whole.
// SHA-256 of the plaintext is computed on the fly behind `file-io`.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::config::StreamConfig;
use crate::error::StreamError;
use crate::source::SourceBinding;
use crate::stream::DeltaStream;

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

/// Counters from one pass through a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamStats {
    /// Plaintext bytes (written when encoding, produced when decoding).
    pub plain_size: u64,
    /// VCDIFF bytes (produced when encoding, consumed when decoding).
    pub delta_size: u64,
    pub windows: u64,
    /// Most windows the pool held at once.
    pub pool_peak: usize,
    /// SHA-256 of the plaintext (feature `file-io`).
    pub sha256: Option<[u8; 32]>,
}

/// Statistics returned by `encode_file()`.
#[derive(Debug, Clone)]
pub struct EncodeStats {
    pub source_size: Option<u64>,
    pub target_size: u64,
    pub delta_size: u64,
    pub windows: u64,
    pub pool_peak: usize,
    pub target_sha256: Option<[u8; 32]>,
}

/// Statistics returned by `decode_file()`.
#[derive(Debug, Clone)]
pub struct DecodeStats {
    pub source_size: Option<u64>,
    pub delta_size: u64,
    pub output_size: u64,
    pub windows: u64,
    pub pool_peak: usize,
    pub output_sha256: Option<[u8; 32]>,
}

const BUF_SIZE: usize = 64 * 1024;

// ---------------------------------------------------------------------------
// Plaintext digest
// ---------------------------------------------------------------------------

#[derive(Default)]
struct PlainDigest {
    #[cfg(feature = "file-io")]
    hasher: sha2::Sha256,
}

impl PlainDigest {
    #[cfg_attr(not(feature = "file-io"), allow(unused_variables))]
    fn update(&mut self, data: &[u8]) {
        #[cfg(feature = "file-io")]
        sha2::Digest::update(&mut self.hasher, data);
    }

    fn finish(self) -> Option<[u8; 32]> {
        #[cfg(feature = "file-io")]
        {
            Some(sha2::Digest::finalize(self.hasher).into())
        }
        #[cfg(not(feature = "file-io"))]
        {
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Streams
// ---------------------------------------------------------------------------

fn read_retrying<R: Read + ?Sized>(input: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        match input.read(buf) {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            other => return other,
        }
    }
}

/// Encode everything `input` yields into `output`.
pub fn encode_stream<R, W>(
    input: &mut R,
    output: W,
    source: Option<SourceBinding>,
    config: StreamConfig,
) -> Result<StreamStats, StreamError>
where
    R: Read + ?Sized,
    W: Write,
{
    let mut stream = DeltaStream::new(output, config)?;
    stream.set_source(source)?;
    let mut digest = PlainDigest::default();
    let mut buf = vec![0u8; BUF_SIZE];
    loop {
        let n = read_retrying(input, &mut buf)?;
        if n == 0 {
            break;
        }
        digest.update(&buf[..n]);
        stream.write(&buf[..n])?;
    }
    stream.flush()?;

    let stats = StreamStats {
        plain_size: stream.bytes_consumed(),
        delta_size: stream.bytes_produced(),
        windows: stream.windows(),
        pool_peak: stream.pool_stats().peak_resident,
        sha256: digest.finish(),
    };
    stream.close()?;
    Ok(stats)
}

/// Decode the VCDIFF stream `input` into `output`.
pub fn decode_stream<R, W>(
    input: R,
    output: &mut W,
    source: Option<SourceBinding>,
    config: StreamConfig,
) -> Result<StreamStats, StreamError>
where
    R: Read,
    W: Write + ?Sized,
{
    let mut stream = DeltaStream::new(input, config)?;
    stream.set_source(source)?;
    let mut digest = PlainDigest::default();
    let mut buf = vec![0u8; BUF_SIZE];
    loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            break;
        }
        digest.update(&buf[..n]);
        output.write_all(&buf[..n])?;
    }
    output.flush()?;

    let stats = StreamStats {
        plain_size: stream.bytes_produced(),
        delta_size: stream.bytes_consumed(),
        windows: stream.windows(),
        pool_peak: stream.pool_stats().peak_resident,
        sha256: digest.finish(),
    };
    stream.close()?;
    Ok(stats)
}

// ---------------------------------------------------------------------------
// Files
// ---------------------------------------------------------------------------

/// Open `path` as a buffered source. Returns the binding and the file size.
pub fn open_source(path: &Path) -> Result<(SourceBinding, u64), StreamError> {
    let file = File::open(path)?;
    let size = file.metadata()?.len();
    Ok((
        SourceBinding::new(BufReader::with_capacity(BUF_SIZE, file)),
        size,
    ))
}

fn open_optional_source(
    path: Option<&Path>,
) -> Result<(Option<SourceBinding>, Option<u64>), StreamError> {
    match path {
        Some(path) => {
            let (binding, size) = open_source(path)?;
            Ok((Some(binding), Some(size)))
        }
        None => Ok((None, None)),
    }
}

/// Encode `target_path` against the optional source into `delta_path`.
pub fn encode_file(
    source_path: Option<&Path>,
    target_path: &Path,
    delta_path: &Path,
    config: StreamConfig,
) -> Result<EncodeStats, StreamError> {
    let (source, source_size) = open_optional_source(source_path)?;
    let mut target = BufReader::with_capacity(BUF_SIZE, File::open(target_path)?);
    let delta = BufWriter::with_capacity(BUF_SIZE, File::create(delta_path)?);

    let stats = encode_stream(&mut target, delta, source, config)?;
    log::debug!(
        "encoded {} into {} ({} -> {} bytes)",
        target_path.display(),
        delta_path.display(),
        stats.plain_size,
        stats.delta_size
    );
    Ok(EncodeStats {
        source_size,
        target_size: stats.plain_size,
        delta_size: stats.delta_size,
        windows: stats.windows,
        pool_peak: stats.pool_peak,
        target_sha256: stats.sha256,
    })
}

/// Decode `delta_path` against the optional source into `output_path`.
pub fn decode_file(
    source_path: Option<&Path>,
    delta_path: &Path,
    output_path: &Path,
    config: StreamConfig,
) -> Result<DecodeStats, StreamError> {
    let (source, source_size) = open_optional_source(source_path)?;
    let delta = BufReader::with_capacity(BUF_SIZE, File::open(delta_path)?);
    let mut output = BufWriter::with_capacity(BUF_SIZE, File::create(output_path)?);

    let stats = decode_stream(delta, &mut output, source, config)?;
    output.into_inner().map_err(|e| e.into_error())?;
    Ok(DecodeStats {
        source_size,
        delta_size: stats.delta_size,
        output_size: stats.plain_size,
        windows: stats.windows,
        pool_peak: stats.pool_peak,
        output_sha256: stats.sha256,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> StreamConfig {
        StreamConfig::default()
            .with_window_size(1 << 12)
            .with_source_windows(2)
            .with_pool_capacity(3)
    }

    #[test]
    fn file_roundtrip_with_source() {
        let dir = tempfile::tempdir().unwrap();
        let source: Vec<u8> = (0..50_000u32).map(|i| (i * 31 % 253) as u8).collect();
        let mut target = source.clone();
        target[20_000..20_100].fill(0);
        let paths = ["source", "target", "delta", "output"].map(|n| dir.path().join(n));
        std::fs::write(&paths[0], &source).unwrap();
        std::fs::write(&paths[1], &target).unwrap();

        let enc = encode_file(Some(&paths[0]), &paths[1], &paths[2], small()).unwrap();
        assert_eq!(enc.source_size, Some(50_000));
        assert_eq!(enc.target_size, 50_000);
        assert_eq!(enc.windows, 13);
        assert!(enc.delta_size < 2_000, "delta {} bytes", enc.delta_size);
        assert!(enc.pool_peak <= 3);
        assert_eq!(std::fs::metadata(&paths[2]).unwrap().len(), enc.delta_size);

        let dec = decode_file(Some(&paths[0]), &paths[2], &paths[3], small()).unwrap();
        assert_eq!(dec.output_size, 50_000);
        assert_eq!(dec.windows, 13);
        assert_eq!(std::fs::read(&paths[3]).unwrap(), target);
        assert_eq!(dec.output_sha256, enc.target_sha256);
    }

    #[test]
    fn streams_without_source() {
        let text = b"no source here, just repeated words words words words".repeat(50);
        let mut delta = Vec::new();
        let enc = encode_stream(&mut &text[..], &mut delta, None, small()).unwrap();
        assert_eq!(enc.delta_size, delta.len() as u64);
        assert!(delta.len() < text.len() / 4);

        let mut out = Vec::new();
        let dec = decode_stream(&delta[..], &mut out, None, small()).unwrap();
        assert_eq!(out, text);
        assert_eq!(dec.delta_size, delta.len() as u64);
    }

    #[cfg(feature = "file-io")]
    #[test]
    fn digest_matches_sha256() {
        use sha2::Digest;
        let data = b"digest me".to_vec();
        let mut delta = Vec::new();
        let stats = encode_stream(&mut &data[..], &mut delta, None, small()).unwrap();
        let expected: [u8; 32] = sha2::Sha256::digest(&data).into();
        assert_eq!(stats.sha256, Some(expected));
    }

    #[test]
    fn missing_source_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = encode_file(
            Some(&dir.path().join("absent")),
            &dir.path().join("absent-too"),
            &dir.path().join("delta"),
            small(),
        )
        .unwrap_err();
        assert!(matches!(err, StreamError::Io(_)));
    }
}
