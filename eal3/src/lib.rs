#![doc = include_str!("../README.md")]
//!
//! ## Technical Overview
//!
//! ### Bitstream Organization
//!
//! **EAL3 blocks**: a sequence of granule records ended by the data or by an
//! all-zero granule header. Each record carries the MPEG header fields of its
//! frame, per-channel side information and the granule's main data. MPEG 1
//! streams are interleaved granule by granule; MPEG 2 and 2.5 data forms one
//! stream.
//!
//! **MPEG frames**: header, side information and main data, where the main
//! data of one frame may start in the unused tail of earlier frames
//! (`main_data_start`).
//!
//! ### Variants
//!
//! - Version5: a flag byte before every granule
//! - Version6/7: a size header before every granule
//! - SCx: a trailing flag after every granule (decode only)
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use eal3::process::codec::CodecKind;
//! use eal3::process::synthesize::FrameSynthesizer;
//! use eal3::structs::block::Block;
//!
//! let blocks: Vec<Block> = Vec::new(); // blocks read from a container
//! let first = &blocks[0];
//!
//! let kind = CodecKind::detect(&first.data).unwrap_or(CodecKind::Version5);
//! let mut synth = FrameSynthesizer::new(kind.create(), first)?;
//! for block in &blocks {
//!     synth.push_block(block)?;
//! }
//! synth.finalize()?;
//!
//! let mp3: Vec<u8> = synth.mpeg_stream(0)?.flatten().collect();
//! # Ok::<(), anyhow::Error>(())
//! ```

/// Conversion in both directions.
///
/// 1. **Codecs** ([`process::codec`]): reading and writing granule records.
///
/// 2. **Synthesis** ([`process::synthesize`]): EAL3 blocks to MPEG frames.
///
/// 3. **Decomposition** ([`process::decompose`]): MPEG frames to granules.
///
/// 4. **Assembly** ([`process::assemble`], [`process::encode`]): granules to
///    EAL3 blocks.
pub mod process;

/// Data structures shared by both directions.
///
/// - **MPEG** ([`structs::mpeg`]): header fields and size tables
/// - **Granules** ([`structs::granule`]): granules, frames and streams
/// - **Reservoir** ([`structs::reservoir`]): the bit reservoir followed while decomposing
///   MP3 frames
/// - **Blocks** ([`structs::block`]): EAL3 blocks
pub mod structs;

/// Utility functions and supporting infrastructure.
///
/// - **Bitstream** ([`utils::bitstream`]): clamped bit-level reading and writing
/// - **Error Handling** ([`utils::errors`]): Error types
pub mod utils;
