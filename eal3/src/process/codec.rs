//! Granule codecs.
//!
//! Every EAL3 variant stores the same MPEG granule grammar (a 9-bit header,
//! side information and main data) and differs only in how it frames a
//! granule and its uncompressed sample block. [`GranuleCodec`] is the seam
//! between those framings and the rest of the crate; a codec is picked once
//! per container, never per granule.
//!
//! ## Granule Grammar
//!
//! | Field           | Bits                         |
//! |-----------------|------------------------------|
//! | version         | 2                            |
//! | sample rate     | 2                            |
//! | channel mode    | 2                            |
//! | mode extension  | 2                            |
//! | granule index   | 1                            |
//! | scfsi           | 4 per channel, MPEG 1 `index == 1` only |
//! | size            | 12 per channel               |
//! | side info       | 32 + 15 (MPEG 1) or 32 + 19 per channel |
//! | main data       | sum of sizes                 |
//!
//! An all-zero header ends the granule list of a block.

use std::fmt;

use anyhow::{Result, bail};
use log::{debug, trace};

use crate::structs::granule::{ChannelInfo, Frame, Granule, Stream, UncompressedOverride};
use crate::structs::mpeg::{self, ChannelMode, MpegVersion};
use crate::utils::bitstream::{BitStream, SliceBitStream, SliceBitStreamMut};
use crate::utils::errors::FormatError;

pub mod scx;
pub mod version6;

pub use scx::ScxCodec;
pub use version6::Version6Codec;

pub trait GranuleCodec: fmt::Debug {
    fn name(&self) -> &'static str;

    /// Reads the next granule and its uncompressed samples. `None` ends the
    /// block.
    fn read_granule(&self, bs: &mut SliceBitStream) -> Result<Option<Granule>>;

    fn write_granule(&self, _bs: &mut SliceBitStreamMut, _gr: &Granule) -> Result<()> {
        bail!(FormatError::EncodeUnsupported(self.name()))
    }

    fn set_fail_level(&mut self, _level: log::Level) {}

    /// Accepts a block when at least one granule reads from it and no granule
    /// raises an error.
    fn probe(&self, block: &[u8]) -> bool {
        let mut bs = BitStream::new(block);
        let mut granules = 0usize;

        while !bs.eos() {
            match self.read_granule(&mut bs) {
                Ok(Some(_)) => granules += 1,
                Ok(None) => break,
                Err(e) => {
                    debug!("{} rejected block: {e}", self.name());
                    return false;
                }
            }
        }

        granules > 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecKind {
    Version5,
    Version6,
    Scx,
}

impl CodecKind {
    pub fn create(self) -> Box<dyn GranuleCodec> {
        match self {
            Self::Version5 => Box::new(Version5Codec),
            Self::Version6 => Box::new(Version6Codec::default()),
            Self::Scx => Box::new(ScxCodec),
        }
    }

    /// Picks the codec for headerless data: Version6/7 first, then Version5.
    pub fn detect(block: &[u8]) -> Option<Self> {
        [Self::Version6, Self::Version5]
            .into_iter()
            .find(|kind| kind.create().probe(block))
    }

    pub fn name(self) -> &'static str {
        self.create().name()
    }
}

/// The first EAL3 framing: a flag byte, the granule, then on a nonzero
/// flag a 32-bit sample count, a 32-bit offset and channel-planar samples.
#[derive(Debug, Clone, Copy, Default)]
pub struct Version5Codec;

impl GranuleCodec for Version5Codec {
    fn name(&self) -> &'static str {
        "EAL3 ver. 5"
    }

    fn read_granule(&self, bs: &mut SliceBitStream) -> Result<Option<Granule>> {
        if bs.eos() {
            return Ok(None);
        }

        let has_uncompressed = bs.read_bits(8) != 0;
        let Some(mut gr) = read_mpeg_granule(bs)? else {
            return Ok(None);
        };
        bs.seek_to_next_byte();

        if has_uncompressed {
            let count = bs.read_aligned32();
            let offset = bs.read_aligned32();
            read_uncompressed_samples(bs, &mut gr, count, offset)?;
        }

        Ok(Some(gr))
    }

    fn write_granule(&self, bs: &mut SliceBitStreamMut, gr: &Granule) -> Result<()> {
        let unc = &gr.uncompressed;
        let needed = 8 + mpeg_granule_bits(gr) + 7 + uncompressed_bits(gr) + 64;
        check_room(bs, needed)?;

        bs.write_bits(if unc.is_empty() { 0x00 } else { 0xEE }, 8);
        write_mpeg_granule(bs, gr)?;
        bs.write_to_next_byte();

        if !unc.is_empty() {
            bs.write_aligned32(unc.count);
            bs.write_aligned32(unc.offset);
            write_uncompressed_samples(bs, gr)?;
        }
        Ok(())
    }
}

/// Reads the MPEG part of a granule. `None` on the null header or an empty
/// stream.
pub fn read_mpeg_granule(bs: &mut SliceBitStream) -> Result<Option<Granule>> {
    if bs.eos() {
        return Ok(None);
    }

    let version = bs.read_bits(2) as u8;
    let sample_rate_index = bs.read_bits(2) as u8;
    let channel_mode = bs.read_bits(2) as u8;
    let mode_extension = bs.read_bits(2) as u8;
    let index = bs.read_bits(1) as u8;

    if Granule::is_null_header(version, sample_rate_index, channel_mode, mode_extension, index) {
        trace!("Null granule at bit {}", bs.tell() - 9);
        return Ok(None);
    }

    let version = MpegVersion::from_bits(version);
    if version == MpegVersion::Reserved {
        bail!(FormatError::ReservedVersion);
    }
    if sample_rate_index == 3 {
        bail!(FormatError::InvalidSampleRateIndex(sample_rate_index));
    }

    let index = if version.is_v1() { index } else { 0 };
    let channel_mode = ChannelMode::from_bits(channel_mode);
    let mut channel_info = vec![ChannelInfo::default(); channel_mode.channels()];

    if index == 1 && version.is_v1() {
        for ci in channel_info.iter_mut() {
            ci.scfsi = bs.read_bits(4) as u8;
        }
    }

    let tail_bits = mpeg::side_info_tail_bits(version);
    for ci in channel_info.iter_mut() {
        ci.size = bs.read_bits(12) as u16;
        ci.side_info[0] = bs.read_bits(32);
        ci.side_info[1] = bs.read_bits(tail_bits);
    }

    let mut gr = Granule {
        used: true,
        version,
        sample_rate_index,
        channel_mode,
        mode_extension,
        index,
        channel_info,
        ..Default::default()
    };

    let bits = gr.data_size_bits();
    if bits > bs.bits_remaining() {
        bail!(FormatError::DataPastEnd {
            needed: bits,
            available: bs.bits_remaining(),
        });
    }

    gr.data = vec![0; bits.div_ceil(8) as usize];
    BitStream::new(&mut gr.data[..]).copy_bits_from(bs, bits);

    trace!(
        "Granule {} ({}, {} ch): {bits} bits of main data",
        gr.index,
        gr.version.label(),
        gr.channels()
    );
    Ok(Some(gr))
}

pub fn write_mpeg_granule(bs: &mut SliceBitStreamMut, gr: &Granule) -> Result<()> {
    let bits = gr.data_size_bits();
    if bits > (gr.data.len() as u64) << 3 {
        bail!(FormatError::DataPastEnd {
            needed: bits,
            available: (gr.data.len() as u64) << 3,
        });
    }

    bs.write_bits(gr.version.bits().into(), 2);
    bs.write_bits(gr.sample_rate_index.into(), 2);
    bs.write_bits(gr.channel_mode.bits().into(), 2);
    bs.write_bits(gr.mode_extension.into(), 2);
    bs.write_bits(gr.index.into(), 1);

    if gr.index == 1 && gr.version.is_v1() {
        for ci in &gr.channel_info {
            bs.write_bits(ci.scfsi.into(), 4);
        }
    }

    let tail_bits = mpeg::side_info_tail_bits(gr.version);
    for ci in &gr.channel_info {
        bs.write_bits(ci.size.into(), 12);
        bs.write_bits(ci.side_info[0], 32);
        bs.write_bits(ci.side_info[1], tail_bits);
    }

    bs.copy_bits_from(&mut BitStream::new(&gr.data[..]), bits);
    Ok(())
}

/// Bits [`write_mpeg_granule`] produces for `gr`.
pub fn mpeg_granule_bits(gr: &Granule) -> u64 {
    let channels = gr.channel_info.len() as u64;
    let scfsi = if gr.index == 1 && gr.version.is_v1() {
        4 * channels
    } else {
        0
    };
    let side = channels * u64::from(12 + 32 + mpeg::side_info_tail_bits(gr.version));
    9 + scfsi + side + gr.data_size_bits()
}

pub fn uncompressed_bits(gr: &Granule) -> u64 {
    u64::from(gr.uncompressed.count) * gr.channels() as u64 * 16
}

/// Reads `count` channel-planar 16-bit samples per channel from the next byte
/// boundary and stores them interleaved.
pub fn read_uncompressed_samples(
    bs: &mut SliceBitStream,
    gr: &mut Granule,
    count: u32,
    offset: u32,
) -> Result<()> {
    if count == 0 {
        gr.uncompressed = UncompressedOverride::default();
        return Ok(());
    }

    bs.seek_to_next_byte();
    let channels = gr.channels();
    let needed = u64::from(count) * channels as u64 * 16;
    if needed > bs.bits_remaining() {
        bail!(FormatError::UncompressedPastEnd {
            needed,
            available: bs.bits_remaining(),
        });
    }

    let count_usize = count as usize;
    let mut samples = vec![0i16; count_usize * channels];
    for ch in 0..channels {
        for i in 0..count_usize {
            samples[i * channels + ch] = bs.read_aligned16() as i16;
        }
    }

    trace!("{count} uncompressed samples at offset {offset}");
    gr.uncompressed = UncompressedOverride {
        count,
        offset,
        samples,
    };
    Ok(())
}

pub fn write_uncompressed_samples(bs: &mut SliceBitStreamMut, gr: &Granule) -> Result<()> {
    let unc = &gr.uncompressed;
    let channels = gr.channels();
    let count = unc.count as usize;
    if unc.samples.len() != count * channels {
        bail!(FormatError::SampleCountMismatch {
            count: unc.count,
            samples: unc.samples.len(),
        });
    }

    for ch in 0..channels {
        for i in 0..count {
            bs.write_aligned16(unc.samples[i * channels + ch] as u16);
        }
    }
    Ok(())
}

pub(crate) fn check_room(bs: &SliceBitStreamMut, needed: u64) -> Result<()> {
    if needed > bs.bits_remaining() {
        bail!(FormatError::DataPastEnd {
            needed,
            available: bs.bits_remaining(),
        });
    }
    Ok(())
}

fn put_on_back<T: Default>(
    items: &mut std::collections::VecDeque<T>,
    index: usize,
    what: &'static str,
) -> Result<()> {
    if index == items.len() {
        items.push_back(T::default());
    } else if index > items.len() {
        bail!(FormatError::PlacementGap {
            what,
            index,
            len: items.len(),
        });
    }
    Ok(())
}

fn put_stream_on_back(streams: &mut Vec<Stream>, index: usize) -> Result<()> {
    if index == streams.len() {
        streams.push(Stream::new());
    } else if index > streams.len() {
        bail!(FormatError::PlacementGap {
            what: "stream",
            index,
            len: streams.len(),
        });
    }
    Ok(())
}

/// Reads every granule of a block and files it under its stream and frame.
///
/// MPEG 1 granules of one frame index are interleaved stream by stream; a
/// change of granule index starts over at stream 0 and index 0 opens a new
/// frame on every stream. Other versions carry one granule per frame, so
/// their granules form a single stream. Frames left incomplete stay in
/// `streams` for the next block to finish. Returns the number of granules.
pub fn distribute_block(
    codec: &dyn GranuleCodec,
    data: &[u8],
    streams: &mut Vec<Stream>,
) -> Result<usize> {
    let mut bs = BitStream::new(data);
    let mut stream = 0usize;
    let mut granule = 0u8;
    let mut frame = 0usize;
    let mut placed = 0usize;

    while !bs.eos() {
        let Some(gr) = codec.read_granule(&mut bs)? else {
            break;
        };

        if gr.index != granule {
            granule = gr.index;
            stream = 0;
            put_stream_on_back(streams, stream)?;

            if gr.index == 0 {
                frame += 1;
                for s in streams.iter_mut() {
                    s.push_back(Frame::default());
                }
            }
        } else {
            put_stream_on_back(streams, stream)?;
        }
        put_on_back(&mut streams[stream], frame, "frame")?;

        let is_v1 = gr.version.is_v1();
        streams[stream][frame].gr[granule as usize] = gr;
        placed += 1;

        if is_v1 {
            stream += 1;
        } else {
            frame += 1;
        }
    }

    Ok(placed)
}
