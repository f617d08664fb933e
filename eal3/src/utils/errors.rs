#[macro_export]
macro_rules! log_or_err {
    ($state:expr, $level:expr, $err:expr $(,)?) => {{
        if $level <= $state.fail_level {
            return Err($err.into());
        } else {
            match $level {
                ::log::Level::Error => ::log::error!("{}", $err),
                ::log::Level::Warn => ::log::warn!("{}", $err),
                ::log::Level::Info => ::log::info!("{}", $err),
                ::log::Level::Debug => ::log::debug!("{}", $err),
                ::log::Level::Trace => ::log::trace!("{}", $err),
            }
        }
    }};
}

/// Malformed EAL3 granule data. Recoverable per block or container part.
#[derive(thiserror::Error, Debug)]
pub enum FormatError {
    #[error("Version field invalid (reserved MPEG version)")]
    ReservedVersion,

    #[error("Sample rate index field invalid: {0}")]
    InvalidSampleRateIndex(u8),

    #[error("Data goes beyond end of stream: {needed} bits needed, {available} available")]
    DataPastEnd { needed: u64, available: u64 },

    #[error(
        "The number of uncompressed samples exceeds the amount of data left: {needed} bits needed, {available} available"
    )]
    UncompressedPastEnd { needed: u64, available: u64 },

    #[error("There aren't any granules in the block")]
    NoGranules,

    #[error("Granule placement skipped a {what}: index {index}, only {len} present")]
    PlacementGap {
        what: &'static str,
        index: usize,
        len: usize,
    },

    #[error("Ver. 6 and 7 header: total granule size {0} is too small")]
    TotalSizeTooSmall(u32),

    #[error("Ver. 6 and 7 header: invalid uncompressed samples offset {0}")]
    InvalidUncompressedOffset(u32),

    #[error("Ver. 6 and 7 header: invalid mode {0}")]
    InvalidMode(u8),

    #[error("Ver. 6 and 7 header: mode {0} encountered, continuing")]
    UnusualMode(u8),

    #[error("Ver. 6 and 7 header: granule size set incorrectly, declared {declared} bits, read {actual}")]
    GranuleSizeMismatch { declared: u64, actual: u64 },

    #[error("Ver. 6 and 7 header: total granule size {total} bits is not big enough for {consumed}")]
    TotalSizeNotBigEnough { total: u64, consumed: u64 },

    #[error("Ver. 6 and 7 header: total granule size goes past the end of the stream")]
    TotalSizePastEnd,

    #[error("The first granule of an SCx block is uncompressed samples, which is not supported")]
    UnsupportedScxUncompressed,

    #[error("{0} does not support encoding")]
    EncodeUnsupported(&'static str),

    #[error("Uncompressed sample count {count} does not match {samples} stored samples")]
    SampleCountMismatch { count: u32, samples: usize },

    #[error("Granules of one frame disagree on version, sample rate or channel mode")]
    GranuleLayoutMismatch,

    #[error("Stream {stream}: dropping a frame whose granules never arrived")]
    IncompleteFrame { stream: usize },

    #[error("Granule field does not fit: {field} = {value}")]
    FieldOverflow { field: &'static str, value: u32 },
}

/// Genuine MPEG Layer III input that cannot be decomposed.
#[derive(thiserror::Error, Debug)]
pub enum MpegError {
    #[error(
        "MPEG sync bits don't match at offset {0}. The input must be a well-formed MPEG Layer III stream"
    )]
    SyncMismatch(usize),

    #[error("Only MPEG layer 3 is supported, found layer bits {0:#b}")]
    UnsupportedLayer(u8),

    #[error("Reserved MPEG version in frame header")]
    ReservedVersion,

    #[error("Invalid sample rate index {0} in frame header")]
    InvalidSampleRateIndex(u8),

    #[error("Unsupported bitrate index {0} (free format or invalid)")]
    UnsupportedBitrateIndex(u8),

    #[error("Truncated MPEG frame at offset {offset}: {needed} bytes needed, {available} available")]
    TruncatedFrame {
        offset: usize,
        needed: usize,
        available: usize,
    },
}

/// Bit reservoir bookkeeping failure while decomposing MP3 frames.
#[derive(thiserror::Error, Debug)]
pub enum ReservoirError {
    #[error(
        "Bit reservoir underflow: main_data_start {requested} exceeds {available} reserved bytes. It is either an invalid MP3 file or there is a bug in this program"
    )]
    Underflow { requested: usize, available: usize },

    #[error(
        "Negative reservoir occupancy ({0}). It is either an invalid MP3 file or there is a bug in this program"
    )]
    Negative(i64),

    #[error("Bit reservoir overflow: {requested} bytes exceed capacity {capacity}")]
    Overflow { requested: usize, capacity: usize },
}

/// The payload of a frame cannot be represented at any MPEG bitrate.
#[derive(thiserror::Error, Debug)]
pub enum BitrateError {
    #[error(
        "Was unable to construct MPEG audio frame {frame}: {used} bytes exceed the maximum bitrate frame size {max}"
    )]
    Exceeded { frame: usize, used: usize, max: usize },

    #[error("Frame {frame} borrows {borrowed} bytes, more than main_data_start can address ({max})")]
    BorrowTooFar {
        frame: usize,
        borrowed: usize,
        max: usize,
    },

    #[error("Frame {frame} borrows {borrowed} bytes but only carries {own} bytes of its own data")]
    BorrowExceedsData {
        frame: usize,
        borrowed: usize,
        own: usize,
    },
}

/// Programming-contract violations on the synthesizer.
#[derive(thiserror::Error, Debug)]
pub enum SequencingError {
    #[error("Haven't finalized the synthesizer, we're not done parsing blocks")]
    NotFinalized,

    #[error("Already finalized, can't parse any more blocks")]
    AlreadyFinalized,

    #[error("Stream index {index} exceeds the number of streams ({count})")]
    StreamOutOfRange { index: usize, count: usize },

    #[error("Frame index {index} is past the end of the stream ({count} frames)")]
    FrameOutOfRange { index: usize, count: usize },

    #[error("Granule index {0} is out of range, a frame has two granules")]
    GranuleOutOfRange(usize),
}
