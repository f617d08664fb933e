/// Granule framings of the EAL3 variants.
///
/// Provides the [`GranuleCodec`](codec::GranuleCodec) trait, the Version5,
/// Version6/7 and SCx codecs and the distribution of block granules into
/// interleaved streams.
pub mod codec;

/// EAL3 to MP3.
///
/// Provides the [`FrameSynthesizer`](synthesize::FrameSynthesizer) that turns
/// granule streams into MPEG frames with a Xing header and a rebuilt bit
/// reservoir.
pub mod synthesize;

/// MP3 to granules.
///
/// Provides the [`FrameDecomposer`](decompose::FrameDecomposer) that walks an
/// MP3 file and resolves each frame's main data out of the bit reservoir.
pub mod decompose;

/// Packing of frames into EAL3 blocks with [`BlockAssembler`](assemble::BlockAssembler).
pub mod assemble;

/// The multi-input [`EncodeSession`](encode::EncodeSession).
pub mod encode;
