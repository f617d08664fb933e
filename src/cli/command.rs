use std::path::PathBuf;

use clap::{Args, Parser as ClapParser, Subcommand, ValueEnum};

use eal3::process::codec::CodecKind;

const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (eal3 ",
    env!("EAL3_VERSION"),
    ", built ",
    env!("BUILD_TIMESTAMP"),
    ")"
);

#[derive(Debug, ClapParser)]
#[command(
    name         = env!("CARGO_PKG_NAME"),
    version      = env!("CARGO_PKG_VERSION"),
    long_version = LONG_VERSION,
    author       = env!("CARGO_PKG_AUTHORS"),
    about        = "Converts EA Layer 3 audio streams to MP3 and back",
    long_about   = None,
)]
pub struct Cli {
    /// Set the log level
    #[arg(long, global = true, value_enum, default_value_t = LogLevel::Info)]
    pub loglevel: LogLevel,

    /// Treat warnings as fatal errors (fail on first warning).
    #[arg(long, global = true)]
    pub strict: bool,

    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Plain)]
    pub log_format: LogFormat,

    /// Show progress bars during operations.
    #[arg(long, global = true)]
    pub progress: bool,

    /// Choose an operation to perform.
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Convert an EAL3 file into MP3 files, one per stream.
    Decode(DecodeArgs),

    /// Interleave MP3 files into one EAL3 file.
    Encode(EncodeArgs),

    /// Print stream information
    Info(InfoArgs),
}

#[derive(Debug, Args)]
pub struct DecodeArgs {
    /// Input EAL3 file (use "-" for stdin).
    #[arg(value_name = "INPUT")]
    pub input: PathBuf,

    /// Output file name; stream and part suffixes are added to it.
    #[arg(long, value_name = "PATH")]
    pub output_path: Option<PathBuf>,

    /// Stream to extract, counting from 1, or "all".
    #[arg(long, value_name = "INDEX", default_value = "all", value_parser = parse_stream)]
    pub stream: StreamSelection,

    /// Granule format of the blocks.
    #[arg(long, value_enum, default_value_t = ParserChoice::Auto)]
    pub parser: ParserChoice,

    /// Byte offset of the first container in the input.
    #[arg(long, value_name = "BYTES", default_value_t = 0)]
    pub offset: usize,
}

#[derive(Debug, Args)]
pub struct EncodeArgs {
    /// Input MP3 files; each becomes one interleaved stream.
    #[arg(value_name = "INPUT", required = true, num_args = 1..)]
    pub inputs: Vec<PathBuf>,

    /// Output file. Defaults to the first input with an .ealayer3 extension.
    #[arg(long, value_name = "PATH")]
    pub output_path: Option<PathBuf>,

    /// Container layout of the output.
    #[arg(long, value_enum, default_value_t = ContainerFormat::Headerless)]
    pub container: ContainerFormat,

    /// Granule format of the output blocks.
    #[arg(long, value_enum, default_value_t = EncodeCodec::V5)]
    pub codec: EncodeCodec,

    /// Mark the stream as a loop (single-block and split layouts).
    #[arg(long = "loop")]
    pub looped: bool,
}

#[derive(Debug, Args)]
pub struct InfoArgs {
    /// Input EAL3 file (use "-" for stdin).
    #[arg(value_name = "INPUT")]
    pub input: PathBuf,

    /// Granule format of the blocks.
    #[arg(long, value_enum, default_value_t = ParserChoice::Auto)]
    pub parser: ParserChoice,

    /// Byte offset of the first container in the input.
    #[arg(long, value_name = "BYTES", default_value_t = 0)]
    pub offset: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamSelection {
    All,
    /// Zero-based stream index.
    Index(usize),
}

fn parse_stream(value: &str) -> Result<StreamSelection, String> {
    if value.eq_ignore_ascii_case("all") {
        return Ok(StreamSelection::All);
    }
    match value.parse::<usize>() {
        Ok(0) | Err(_) => Err(format!("expected a stream number from 1 or \"all\", got {value}")),
        Ok(n) => Ok(StreamSelection::Index(n - 1)),
    }
}

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq)]
pub enum ParserChoice {
    /// Use the container's format, or detect it from the first block.
    Auto,
    /// EAL3 version 5.
    V5,
    /// EAL3 versions 6 and 7.
    V6,
    /// EAL3 blocks from SCx files.
    Scx,
}

impl ParserChoice {
    pub fn codec(self) -> Option<CodecKind> {
        match self {
            ParserChoice::Auto => None,
            ParserChoice::V5 => Some(CodecKind::Version5),
            ParserChoice::V6 => Some(CodecKind::Version6),
            ParserChoice::Scx => Some(CodecKind::Scx),
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq)]
pub enum EncodeCodec {
    /// EAL3 version 5.
    V5,
    /// EAL3 versions 6 and 7.
    V6,
}

impl EncodeCodec {
    pub fn codec(self) -> CodecKind {
        match self {
            EncodeCodec::V5 => CodecKind::Version5,
            EncodeCodec::V6 => CodecKind::Version6,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq)]
pub enum ContainerFormat {
    /// Blocks with 8-byte headers.
    Headerless,
    /// One header and one block holding the whole stream.
    SingleBlock,
    /// Stream info, audio and end chunks.
    HeaderB,
    /// Headerless blocks plus a single-block header in a separate .header file.
    Split,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogLevel {
    /// Disable logging output.
    Off,
    /// No output except errors.
    Error,
    /// Show warnings and errors.
    Warn,
    /// Show info, warnings and errors (default).
    Info,
    /// Show debug, info, warnings and errors.
    Debug,
    /// Show all log messages including trace.
    Trace,
}

impl LogLevel {
    /// Convert LogLevel to log::LevelFilter
    pub fn to_level_filter(self) -> log::LevelFilter {
        match self {
            LogLevel::Off => log::LevelFilter::Off,
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogFormat {
    /// Colorized human-readable text.
    Plain,
    /// Structured JSON per log record.
    Json,
}
