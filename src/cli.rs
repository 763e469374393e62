// Command-line front end for deltafile.
//
// Subcommands map onto the streaming helpers in `crate::io`; `headers`
// walks a VCDIFF file without decoding it.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::process;

use clap::{ArgAction, Args, Parser, Subcommand, ValueHint};

use crate::compress::secondary::{SecondaryCompression, VCD_LZMA_ID, VCD_ZLIB_ID};
use crate::config::{
    DEFAULT_LEVEL, DEFAULT_POOL_CAPACITY, DEFAULT_SOURCE_WINDOWS, DEFAULT_WINDOW_SIZE,
    MIN_WINDOW_SIZE, StreamConfig,
};
use crate::error::StreamError;
use crate::io::{StreamStats, decode_stream, encode_stream, open_source};
use crate::vcdiff::{FileHeader, HARD_MAX_WINDOW, WindowHeader, WindowRecord};

const BUF_SIZE: usize = 64 * 1024;

// ---------------------------------------------------------------------------
// Byte size parsing (supports K, M, G suffixes)
// ---------------------------------------------------------------------------

fn parse_byte_size(s: &str) -> Result<u64, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty size string".into());
    }
    let (num_part, multiplier) = match s.as_bytes().last() {
        Some(b'k' | b'K') => (&s[..s.len() - 1], 1024u64),
        Some(b'm' | b'M') => (&s[..s.len() - 1], 1024 * 1024),
        Some(b'g' | b'G') => (&s[..s.len() - 1], 1024 * 1024 * 1024),
        _ => (s, 1u64),
    };
    let num: u64 = num_part
        .trim()
        .parse()
        .map_err(|e| format!("invalid size '{s}': {e}"))?;
    num.checked_mul(multiplier)
        .ok_or_else(|| format!("size overflow: '{s}'"))
}

// ---------------------------------------------------------------------------
// Clap CLI definition
// ---------------------------------------------------------------------------

/// Streaming VCDIFF delta encoder/decoder.
#[derive(Parser, Debug)]
#[command(
    name = "deltafile",
    version,
    about = "Streaming VCDIFF delta encoder/decoder",
    arg_required_else_help = true
)]
struct Cli {
    #[command(subcommand)]
    command: Cmd,

    /// Force overwrite existing output files.
    #[arg(short = 'f', long, global = true)]
    force: bool,

    /// Quiet mode (errors only).
    #[arg(short = 'q', long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Verbose mode (-v debug, -vv trace).
    #[arg(short = 'v', long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Output stats as JSON to stderr.
    #[arg(long = "json", global = true)]
    json_output: bool,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Delta encode an input stream.
    Encode(EncodeArgs),
    /// Delta decode an input stream.
    Decode(DecodeArgs),
    /// Print the file header and every window header.
    Headers(PrintArgs),
    /// Print defaults and enabled features.
    Config,
}

#[derive(Args, Debug)]
struct SessionArgs {
    /// Target window and source block size (supports K/M/G suffix).
    #[arg(long = "window-size", short = 'W', value_parser = parse_byte_size, default_value_t = DEFAULT_WINDOW_SIZE as u64)]
    window_size: u64,

    /// Largest window accepted when decoding (supports K/M/G suffix).
    #[arg(long = "max-window-size", value_parser = parse_byte_size, default_value_t = HARD_MAX_WINDOW)]
    max_window_size: u64,

    /// Source blocks visible to one target window.
    #[arg(long = "source-windows", default_value_t = DEFAULT_SOURCE_WINDOWS)]
    source_windows: usize,

    /// Windows kept in memory at once.
    #[arg(long = "pool-capacity", default_value_t = DEFAULT_POOL_CAPACITY)]
    pool_capacity: usize,

    /// Disable Adler-32 checksums.
    #[arg(long = "no-checksum")]
    no_checksum: bool,
}

#[derive(Args, Debug)]
struct EncodeArgs {
    /// Source file to copy from.
    #[arg(long, short = 's', value_hint = ValueHint::FilePath)]
    source: Option<PathBuf>,

    /// Write output to stdout.
    #[arg(short = 'c', long)]
    stdout: bool,

    /// Compression level (0-9).
    #[arg(long, short = 'l', value_parser = clap::value_parser!(u32).range(0..=9), default_value_t = DEFAULT_LEVEL)]
    level: u32,

    /// Secondary compressor: none, lzma, zlib or zlib:LEVEL.
    #[arg(long, value_parser = SecondaryCompression::parse, default_value = "none")]
    secondary: SecondaryCompression,

    #[command(flatten)]
    session: SessionArgs,

    /// Input file (default: stdin).
    #[arg(value_hint = ValueHint::FilePath)]
    input: Option<PathBuf>,

    /// Output file (default: stdout).
    #[arg(value_hint = ValueHint::FilePath)]
    output: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct DecodeArgs {
    /// Source file to copy from.
    #[arg(long, short = 's', value_hint = ValueHint::FilePath)]
    source: Option<PathBuf>,

    /// Write output to stdout.
    #[arg(short = 'c', long)]
    stdout: bool,

    #[command(flatten)]
    session: SessionArgs,

    /// Input delta file (default: stdin).
    #[arg(value_hint = ValueHint::FilePath)]
    input: Option<PathBuf>,

    /// Output file (default: stdout).
    #[arg(value_hint = ValueHint::FilePath)]
    output: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct PrintArgs {
    /// VCDIFF input file.
    #[arg(value_hint = ValueHint::FilePath)]
    input: PathBuf,
}

// ---------------------------------------------------------------------------
// Resolved command + options (flattened from Cli)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Encode,
    Decode,
    Headers,
    Config,
}

#[derive(Debug)]
struct Options {
    command: Command,
    force: bool,
    quiet: bool,
    verbose: u8,
    json_output: bool,
    use_stdout: bool,
    source_file: Option<PathBuf>,
    input_file: Option<PathBuf>,
    output_file: Option<PathBuf>,
    /// Raw window size; checked against `usize` in `stream_config`.
    window_size: u64,
    max_window_size: u64,
    config: StreamConfig,
}

fn session_config(session: &SessionArgs) -> StreamConfig {
    StreamConfig::default()
        .with_source_windows(session.source_windows)
        .with_pool_capacity(session.pool_capacity)
        .with_checksum(!session.no_checksum)
}

fn resolve_options(cli: Cli) -> Options {
    let base = |command| Options {
        command,
        force: cli.force,
        quiet: cli.quiet,
        verbose: cli.verbose.min(2),
        json_output: cli.json_output,
        use_stdout: false,
        source_file: None,
        input_file: None,
        output_file: None,
        window_size: DEFAULT_WINDOW_SIZE as u64,
        max_window_size: HARD_MAX_WINDOW,
        config: StreamConfig::default(),
    };

    match cli.command {
        Cmd::Encode(args) => Options {
            use_stdout: args.stdout,
            source_file: args.source,
            input_file: args.input,
            output_file: args.output,
            window_size: args.session.window_size,
            max_window_size: args.session.max_window_size,
            config: session_config(&args.session)
                .with_level(args.level)
                .with_secondary(args.secondary),
            ..base(Command::Encode)
        },
        Cmd::Decode(args) => Options {
            use_stdout: args.stdout,
            source_file: args.source,
            input_file: args.input,
            output_file: args.output,
            window_size: args.session.window_size,
            max_window_size: args.session.max_window_size,
            config: session_config(&args.session),
            ..base(Command::Decode)
        },
        Cmd::Headers(args) => Options {
            input_file: Some(args.input),
            ..base(Command::Headers)
        },
        Cmd::Config => base(Command::Config),
    }
}

/// Finish the session config with the window sizes and validate it.
fn stream_config(opts: &Options) -> Result<StreamConfig, StreamError> {
    let size = |v: u64, what: &str| {
        usize::try_from(v).map_err(|_| StreamError::Config(format!("{what} {v} is too large")))
    };
    let config = opts
        .config
        .clone()
        .with_window_size(size(opts.window_size, "window size")?)
        .with_max_window_size(size(opts.max_window_size, "max window size")?);
    config.validate()?;
    Ok(config)
}

#[cfg(any(test, feature = "fuzzing"))]
pub fn fuzz_try_parse_args(args: &[String]) {
    let argv: Vec<String> = std::iter::once("deltafile".to_string())
        .chain(args.iter().cloned())
        .collect();
    if let Ok(cli) = Cli::try_parse_from(argv) {
        let opts = resolve_options(cli);
        let _ = stream_config(&opts);
    }
}

// ---------------------------------------------------------------------------
// Config command
// ---------------------------------------------------------------------------

fn cmd_config() -> i32 {
    let version = env!("CARGO_PKG_VERSION");
    eprintln!("deltafile version {version}");

    let djw = cfg!(feature = "djw-secondary") as u8;
    let lzma = cfg!(feature = "lzma-secondary") as u8;
    let zlib = cfg!(feature = "zlib-secondary") as u8;
    let adler32 = cfg!(feature = "adler32") as u8;
    let file_io = cfg!(feature = "file-io") as u8;

    eprintln!("SECONDARY_DJW={djw} (decode only)");
    eprintln!("SECONDARY_LZMA={lzma}");
    eprintln!("SECONDARY_ZLIB={zlib}");
    eprintln!("ADLER32={adler32}");
    eprintln!("FILE_IO={file_io}");
    eprintln!("DEFAULT_LEVEL={DEFAULT_LEVEL}");
    eprintln!("DEFAULT_WINDOW_SIZE={DEFAULT_WINDOW_SIZE}");
    eprintln!("DEFAULT_SOURCE_WINDOWS={DEFAULT_SOURCE_WINDOWS}");
    eprintln!("DEFAULT_POOL_CAPACITY={DEFAULT_POOL_CAPACITY}");
    eprintln!("MIN_WINDOW_SIZE={MIN_WINDOW_SIZE}");
    eprintln!("HARD_MAX_WINDOW={HARD_MAX_WINDOW}");

    0
}

// ---------------------------------------------------------------------------
// Input / output plumbing
// ---------------------------------------------------------------------------

fn open_input(path: Option<&Path>) -> io::Result<Box<dyn Read>> {
    Ok(match path {
        Some(path) => Box::new(BufReader::with_capacity(BUF_SIZE, File::open(path)?)),
        None => Box::new(BufReader::new(io::stdin())),
    })
}

fn open_output(opts: &Options) -> Result<Box<dyn Write>, String> {
    match (&opts.output_file, opts.use_stdout) {
        (Some(path), false) => {
            if path.exists() && !opts.force {
                return Err(format!(
                    "output file exists, use -f to overwrite: {}",
                    path.display()
                ));
            }
            File::create(path)
                .map(|f| Box::new(BufWriter::with_capacity(BUF_SIZE, f)) as Box<dyn Write>)
                .map_err(|e| format!("output file: {}: {e}", path.display()))
        }
        _ => Ok(Box::new(BufWriter::with_capacity(
            BUF_SIZE,
            io::stdout().lock(),
        ))),
    }
}

fn hex(digest: &[u8]) -> String {
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

fn report(opts: &Options, command: &str, stats: &StreamStats) {
    if opts.verbose > 0 && !opts.quiet {
        eprintln!(
            "deltafile: {command}: plaintext {} bytes, delta {} bytes, windows {}, pool peak {}",
            stats.plain_size, stats.delta_size, stats.windows, stats.pool_peak
        );
    }
    if opts.json_output {
        let json = serde_json::json!({
            "command": command,
            "plain_size": stats.plain_size,
            "delta_size": stats.delta_size,
            "windows": stats.windows,
            "pool_peak": stats.pool_peak,
            "source": opts.source_file.as_ref().map(|p| p.display().to_string()),
            "sha256": stats.sha256.as_ref().map(|d| hex(d)),
        });
        eprintln!("{json:#}");
    }
}

// ---------------------------------------------------------------------------
// Encode / decode commands
// ---------------------------------------------------------------------------

fn run_stream(opts: &Options, encode: bool) -> i32 {
    let config = match stream_config(opts) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("deltafile: {e}");
            return 1;
        }
    };
    let source = match opts.source_file.as_deref().map(open_source).transpose() {
        Ok(source) => source.map(|(binding, _)| binding),
        Err(e) => {
            eprintln!(
                "deltafile: source file: {}: {e}",
                opts.source_file.as_deref().unwrap_or(Path::new("")).display()
            );
            return 1;
        }
    };
    let mut input = match open_input(opts.input_file.as_deref()) {
        Ok(input) => input,
        Err(e) => {
            let name = opts.input_file.as_deref().unwrap_or(Path::new("-"));
            eprintln!("deltafile: input file: {}: {e}", name.display());
            return 1;
        }
    };
    let mut output = match open_output(opts) {
        Ok(output) => output,
        Err(e) => {
            eprintln!("deltafile: {e}");
            return 1;
        }
    };

    let (command, result) = if encode {
        ("encode", encode_stream(&mut input, &mut output, source, config))
    } else {
        ("decode", decode_stream(input, &mut output, source, config))
    };
    match result {
        Ok(stats) => {
            report(opts, command, &stats);
            0
        }
        Err(e) => {
            eprintln!("deltafile: {command} error: {e}");
            1
        }
    }
}

// ---------------------------------------------------------------------------
// Headers command
// ---------------------------------------------------------------------------

fn flag_names<I: Iterator<Item = (&'static str, T)>, T>(names: I) -> String {
    let names: Vec<String> = names.map(|(name, _)| format!("VCD_{name}")).collect();
    if names.is_empty() {
        "none".into()
    } else {
        names.join(" ")
    }
}

fn secondary_name(id: Option<u8>) -> String {
    match id {
        None => "none".into(),
        Some(VCD_LZMA_ID) => "lzma".into(),
        Some(VCD_ZLIB_ID) => "zlib".into(),
        Some(id) => format!("unknown (id={id})"),
    }
}

fn print_headers<R: Read, W: Write>(reader: &mut R, out: &mut W) -> Result<u64, StreamError> {
    let Some(file_hdr) = FileHeader::read_from(reader)? else {
        return Err(StreamError::Format(crate::vcdiff::DecodeError::Truncated));
    };
    writeln!(out, "VCDIFF version:               0")?;
    writeln!(out, "VCDIFF header size:           {}", file_hdr.to_bytes().len())?;
    writeln!(
        out,
        "VCDIFF header indicator:      {}",
        flag_names(file_hdr.flags.iter_names())
    )?;
    writeln!(
        out,
        "VCDIFF secondary compressor:  {}",
        secondary_name(file_hdr.secondary_id)
    )?;
    if let Some(app) = file_hdr.app_header.as_deref()
        && !app.is_empty()
    {
        writeln!(
            out,
            "VCDIFF application header:    {}",
            String::from_utf8_lossy(app)
        )?;
    }

    let mut window: u64 = 0;
    let mut target_offset: u64 = 0;
    while let Some(wh) = WindowHeader::read_from(reader)? {
        writeln!(out)?;
        writeln!(out, "VCDIFF window number:         {window}")?;
        writeln!(
            out,
            "VCDIFF window indicator:      {}",
            flag_names(wh.flags.iter_names())
        )?;
        if let Some(sum) = wh.adler32 {
            writeln!(out, "VCDIFF adler32 checksum:      {sum:08X}")?;
        }
        if !wh.delta.is_empty() {
            writeln!(
                out,
                "VCDIFF delta indicator:       {}",
                flag_names(wh.delta.iter_names())
            )?;
        }
        writeln!(out, "VCDIFF target window offset:  {target_offset}")?;
        if wh.has_source() {
            writeln!(out, "VCDIFF copy window length:    {}", wh.copy_len)?;
            writeln!(out, "VCDIFF copy window offset:    {}", wh.copy_offset)?;
        }
        writeln!(out, "VCDIFF delta encoding length: {}", wh.enc_len)?;
        writeln!(out, "VCDIFF target window length:  {}", wh.target_len)?;
        writeln!(out, "VCDIFF data section length:   {}", wh.data_len)?;
        writeln!(out, "VCDIFF inst section length:   {}", wh.inst_len)?;
        writeln!(out, "VCDIFF addr section length:   {}", wh.addr_len)?;

        target_offset += wh.target_len;
        WindowRecord::read_sections(wh, reader)?;
        window += 1;
    }
    Ok(window)
}

fn cmd_headers(opts: &Options) -> i32 {
    let Some(path) = opts.input_file.as_deref() else {
        eprintln!("deltafile: headers requires an input file");
        return 1;
    };
    let mut reader = match File::open(path) {
        Ok(f) => BufReader::with_capacity(BUF_SIZE, f),
        Err(e) => {
            eprintln!("deltafile: {}: {e}", path.display());
            return 1;
        }
    };
    let stdout = io::stdout();
    let mut out = stdout.lock();
    match print_headers(&mut reader, &mut out) {
        Ok(windows) => {
            log::debug!("{} windows in {}", windows, path.display());
            0
        }
        Err(e) => {
            eprintln!("deltafile: {}: {e}", path.display());
            1
        }
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

fn init_logging(opts: &Options) {
    let level = match (opts.quiet, opts.verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "debug",
        (false, _) => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .format_target(false)
        .init();
}

/// Main CLI entry point. Parses arguments via clap, dispatches commands.
pub fn run() -> ! {
    let cli = Cli::parse();
    let mut opts = resolve_options(cli);
    init_logging(&opts);

    if opts.use_stdout
        && let Some(path) = opts.output_file.take()
        && !opts.quiet
    {
        eprintln!(
            "deltafile: warning: -c option overrides output filename: {}",
            path.display()
        );
    }

    let exit_code = match opts.command {
        Command::Encode => run_stream(&opts, true),
        Command::Decode => run_stream(&opts, false),
        Command::Headers => cmd_headers(&opts),
        Command::Config => cmd_config(),
    };

    process::exit(exit_code);
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_opts(args: &[&str]) -> Options {
        let argv: Vec<String> = std::iter::once("deltafile".to_string())
            .chain(args.iter().map(|s| s.to_string()))
            .collect();
        let cli = Cli::try_parse_from(argv).expect("cli parse failed");
        resolve_options(cli)
    }

    #[test]
    fn parse_byte_size_suffixes() {
        assert_eq!(parse_byte_size("1").unwrap(), 1);
        assert_eq!(parse_byte_size("2K").unwrap(), 2 * 1024);
        assert_eq!(parse_byte_size("3m").unwrap(), 3 * 1024 * 1024);
        assert_eq!(parse_byte_size("4G").unwrap(), 4 * 1024 * 1024 * 1024);
        assert!(parse_byte_size("").is_err());
        assert!(parse_byte_size("12Q").is_err());
    }

    #[test]
    fn encode_subcommand_maps_correctly() {
        let opts = parse_opts(&[
            "encode",
            "--source",
            "source.bin",
            "--level",
            "9",
            "--window-size",
            "1M",
            "--source-windows",
            "4",
            "--pool-capacity",
            "6",
            "in.bin",
            "out.vcdiff",
        ]);
        assert_eq!(opts.command, Command::Encode);
        assert_eq!(opts.source_file, Some(PathBuf::from("source.bin")));
        assert_eq!(opts.input_file, Some(PathBuf::from("in.bin")));
        assert_eq!(opts.output_file, Some(PathBuf::from("out.vcdiff")));

        let config = stream_config(&opts).unwrap();
        assert_eq!(config.level, 9);
        assert_eq!(config.window_size, 1 << 20);
        assert_eq!(config.source_windows, 4);
        assert_eq!(config.pool_capacity, 6);
        assert!(config.checksum);
        assert_eq!(config.secondary, SecondaryCompression::None);
    }

    #[test]
    fn decode_subcommand_maps_correctly() {
        let opts = parse_opts(&["--quiet", "decode", "-s", "old", "--no-checksum", "in.vcdiff"]);
        assert_eq!(opts.command, Command::Decode);
        assert!(opts.quiet);
        assert_eq!(opts.output_file, None);
        let config = stream_config(&opts).unwrap();
        assert!(!config.checksum);
        assert_eq!(config.window_size, DEFAULT_WINDOW_SIZE);
    }

    #[test]
    fn invalid_session_config_is_rejected() {
        let opts = parse_opts(&["encode", "--window-size", "100"]);
        assert!(matches!(stream_config(&opts), Err(StreamError::Config(_))));
        let opts = parse_opts(&["encode", "--source-windows", "20"]);
        assert!(matches!(stream_config(&opts), Err(StreamError::Config(_))));
    }

    #[test]
    fn secondary_flag_parses() {
        let argv = ["deltafile", "encode", "--secondary", "bogus"];
        assert!(Cli::try_parse_from(argv).is_err());
        let opts = parse_opts(&["encode", "--secondary", "none"]);
        assert_eq!(opts.config.secondary, SecondaryCompression::None);
    }

    #[test]
    fn global_flags() {
        let opts = parse_opts(&["-f", "--json", "-vvv", "encode", "-c", "in", "out"]);
        assert!(opts.force);
        assert!(opts.json_output);
        assert!(opts.use_stdout);
        assert_eq!(opts.verbose, 2);
    }

    #[test]
    fn headers_and_config_map() {
        let opts = parse_opts(&["headers", "x.vcdiff"]);
        assert_eq!(opts.command, Command::Headers);
        assert_eq!(opts.input_file, Some(PathBuf::from("x.vcdiff")));
        assert_eq!(parse_opts(&["config"]).command, Command::Config);
    }

    #[test]
    fn prints_window_headers() {
        let mut delta = Vec::new();
        let mut input: &[u8] = &[b'z'; 3000];
        let config = StreamConfig::default().with_window_size(1024).with_source_windows(1).with_pool_capacity(2);
        encode_stream(&mut input, &mut delta, None, config).unwrap();

        let mut out = Vec::new();
        let windows = print_headers(&mut &delta[..], &mut out).unwrap();
        assert_eq!(windows, 3);
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("VCDIFF secondary compressor:  none"));
        assert!(text.contains("VCDIFF window indicator:      VCD_ADLER32"));
        assert!(text.contains("VCDIFF target window offset:  2048"));
    }
}
