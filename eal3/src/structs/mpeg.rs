//! MPEG audio Layer III constants, tables and the 32-bit frame header.
//!
//! ## Versions
//!
//! The two-bit version field selects the table row: `0` is MPEG 2.5, `1` is
//! reserved, `2` is MPEG 2 and `3` is MPEG 1. MPEG 1 frames carry two granules
//! of 576 samples, the other versions a single granule.
//!
//! ## Frame Size
//!
//! `144000 * kbps / rate` bytes for MPEG 1, half that for MPEG 2 and 2.5, plus
//! one byte when the padding bit is set.

use anyhow::{Result, bail};
use bitstream_io::{BigEndian, BitRead, BitReader};

use crate::utils::bitstream::BitStream;
use crate::utils::errors::MpegError;

/// 11-bit frame sync pattern.
pub const MPEG_SYNC: u32 = 0x7FF;

/// Layer bits identifying Layer III.
pub const LAYER_III: u8 = 0b01;

/// Largest bitrate index usable by a synthesized frame (index 15 is invalid).
pub const MAX_BITRATE_INDEX: u8 = 14;

/// Worst-case frame size: 144 * 1000 * 320 / 32000 * 2 bytes.
pub const MAX_MPEG_FRAME_BUFFER: usize = 144 * 1000 * 320 / 32000 * 2;

pub const SAMPLES_PER_GRANULE: u32 = 576;

/// Bytes of the frame header without CRC.
pub const HEADER_SIZE: usize = 4;

const SAMPLE_RATES: [[u32; 3]; 4] = [
    [11025, 12000, 8000],
    [0, 0, 0],
    [22050, 24000, 16000],
    [44100, 48000, 32000],
];

const BITRATES_V1: [u32; 16] = [
    0, 32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320, 0,
];

const BITRATES_V2: [u32; 16] = [
    0, 8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160, 0,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MpegVersion {
    #[default]
    V2_5,
    Reserved,
    V2,
    V1,
}

impl MpegVersion {
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0 => Self::V2_5,
            1 => Self::Reserved,
            2 => Self::V2,
            _ => Self::V1,
        }
    }

    pub fn bits(self) -> u8 {
        match self {
            Self::V2_5 => 0,
            Self::Reserved => 1,
            Self::V2 => 2,
            Self::V1 => 3,
        }
    }

    #[inline(always)]
    pub fn is_v1(self) -> bool {
        self == Self::V1
    }

    /// Granules per frame.
    pub fn granule_count(self) -> usize {
        if self.is_v1() { 2 } else { 1 }
    }

    pub fn samples_per_frame(self) -> u32 {
        SAMPLES_PER_GRANULE * self.granule_count() as u32
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::V2_5 => "MPEG 2.5",
            Self::Reserved => "reserved",
            Self::V2 => "MPEG 2",
            Self::V1 => "MPEG 1",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelMode {
    #[default]
    Stereo,
    JointStereo,
    DualChannel,
    Mono,
}

impl ChannelMode {
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0 => Self::Stereo,
            1 => Self::JointStereo,
            2 => Self::DualChannel,
            _ => Self::Mono,
        }
    }

    pub fn bits(self) -> u8 {
        match self {
            Self::Stereo => 0,
            Self::JointStereo => 1,
            Self::DualChannel => 2,
            Self::Mono => 3,
        }
    }

    #[inline(always)]
    pub fn channels(self) -> usize {
        if self == Self::Mono { 1 } else { 2 }
    }
}

/// Sample rate in Hz, 0 for the reserved version or index 3.
pub fn sample_rate(version: MpegVersion, index: u8) -> u32 {
    SAMPLE_RATES
        .get(version.bits() as usize)
        .and_then(|row| row.get(index as usize))
        .copied()
        .unwrap_or(0)
}

pub fn bitrate_kbps(version: MpegVersion, index: u8) -> u32 {
    let table = if version.is_v1() {
        &BITRATES_V1
    } else {
        &BITRATES_V2
    };
    table.get(index as usize).copied().unwrap_or(0)
}

/// Unpadded frame size in bytes for a bitrate index.
pub fn frame_size(bitrate_index: u8, sample_rate: u32, version: MpegVersion) -> usize {
    if sample_rate == 0 {
        return 0;
    }

    let kbps = bitrate_kbps(version, bitrate_index);
    let size = if version.is_v1() {
        144_000 * kbps / sample_rate
    } else {
        144_000 * kbps / (sample_rate * 2)
    };
    size as usize
}

/// Side information size in bytes.
pub fn side_info_size(channels: usize, version: MpegVersion) -> usize {
    match (version.is_v1(), channels) {
        (true, 1) => 17,
        (true, _) => 32,
        (false, 1) => 9,
        (false, _) => 17,
    }
}

pub fn private_bits(channels: usize, version: MpegVersion) -> u32 {
    match (version.is_v1(), channels) {
        (true, 1) => 5,
        (true, _) => 3,
        (false, 1) => 1,
        (false, _) => 2,
    }
}

pub fn main_data_start_bits(version: MpegVersion) -> u32 {
    if version.is_v1() { 9 } else { 8 }
}

/// Largest back-reference `main_data_start` can express.
pub fn max_main_data_start(version: MpegVersion) -> usize {
    (1 << main_data_start_bits(version)) - 1
}

/// Width of the second side information word of a channel.
pub fn side_info_tail_bits(version: MpegVersion) -> u32 {
    if version.is_v1() { 15 } else { 19 }
}

/// Smallest bitrate index whose frame holds `used` bytes, or 0 when even the
/// largest index is too small.
pub fn estimate_bitrate_index(used: usize, sample_rate: u32, version: MpegVersion) -> u8 {
    (0..15u8)
        .find(|&i| frame_size(i, sample_rate, version) >= used)
        .unwrap_or(0)
}

/// Fields of the 32-bit Layer III frame header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameHeader {
    pub version: MpegVersion,
    pub crc_protected: bool,
    pub bitrate_index: u8,
    pub sample_rate_index: u8,
    pub padding: bool,
    pub private: bool,
    pub channel_mode: ChannelMode,
    pub mode_extension: u8,
}

impl FrameHeader {
    /// Parses the header at the start of `bytes`. `offset` is only used for
    /// error reporting.
    pub fn parse(bytes: &[u8], offset: usize) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            bail!(MpegError::TruncatedFrame {
                offset,
                needed: HEADER_SIZE,
                available: bytes.len(),
            });
        }

        let mut bs = BitReader::endian(&bytes[..HEADER_SIZE], BigEndian);
        if bs.read_unsigned_var::<u16>(11)? != MPEG_SYNC as u16 {
            bail!(MpegError::SyncMismatch(offset));
        }

        let version = MpegVersion::from_bits(bs.read_unsigned_var(2)?);
        if version == MpegVersion::Reserved {
            bail!(MpegError::ReservedVersion);
        }

        let layer: u8 = bs.read_unsigned_var(2)?;
        if layer != LAYER_III {
            bail!(MpegError::UnsupportedLayer(layer));
        }

        let crc_protected = !bs.read_bit()?;

        let bitrate_index: u8 = bs.read_unsigned_var(4)?;
        if bitrate_index == 0 || bitrate_index == 15 {
            bail!(MpegError::UnsupportedBitrateIndex(bitrate_index));
        }

        let sample_rate_index: u8 = bs.read_unsigned_var(2)?;
        if sample_rate_index == 3 {
            bail!(MpegError::InvalidSampleRateIndex(sample_rate_index));
        }

        let padding = bs.read_bit()?;
        let private = bs.read_bit()?;
        let channel_mode = ChannelMode::from_bits(bs.read_unsigned_var(2)?);
        let mode_extension: u8 = bs.read_unsigned_var(2)?;
        // copyright, original and emphasis are not carried over

        Ok(Self {
            version,
            crc_protected,
            bitrate_index,
            sample_rate_index,
            padding,
            private,
            channel_mode,
            mode_extension,
        })
    }

    /// Writes a header for a synthesized frame: no CRC, copyright and original
    /// bits set, no emphasis.
    pub fn write<B: AsRef<[u8]> + AsMut<[u8]>>(&self, bs: &mut BitStream<B>) {
        bs.write_bits(MPEG_SYNC, 11);
        bs.write_bits(self.version.bits().into(), 2);
        bs.write_bits(LAYER_III.into(), 2);
        bs.write_bit(!self.crc_protected);
        bs.write_bits(self.bitrate_index.into(), 4);
        bs.write_bits(self.sample_rate_index.into(), 2);
        bs.write_bit(self.padding);
        bs.write_bit(self.private);
        bs.write_bits(self.channel_mode.bits().into(), 2);
        bs.write_bits(self.mode_extension.into(), 2);
        bs.write_bit(true);
        bs.write_bit(true);
        bs.write_bits(0, 2);
    }

    pub fn channels(&self) -> usize {
        self.channel_mode.channels()
    }

    pub fn sample_rate(&self) -> u32 {
        sample_rate(self.version, self.sample_rate_index)
    }

    /// Header bytes including the optional CRC word.
    pub fn header_size(&self) -> usize {
        if self.crc_protected {
            HEADER_SIZE + 2
        } else {
            HEADER_SIZE
        }
    }

    pub fn side_info_size(&self) -> usize {
        side_info_size(self.channels(), self.version)
    }

    pub fn frame_size(&self) -> usize {
        frame_size(self.bitrate_index, self.sample_rate(), self.version) + usize::from(self.padding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_sizes() {
        assert_eq!(frame_size(9, 44100, MpegVersion::V1), 417);
        assert_eq!(frame_size(14, 32000, MpegVersion::V1), 1440);
        assert_eq!(frame_size(14, 8000, MpegVersion::V2_5), 1440);
        assert_eq!(frame_size(8, 24000, MpegVersion::V2), 192);
        assert_eq!(frame_size(0, 44100, MpegVersion::V1), 0);
        assert_eq!(frame_size(5, 0, MpegVersion::Reserved), 0);
        assert!(frame_size(14, 8000, MpegVersion::V2_5) * 2 <= MAX_MPEG_FRAME_BUFFER);
    }

    #[test]
    fn frame_sizes_grow_with_index() {
        for version in [MpegVersion::V1, MpegVersion::V2, MpegVersion::V2_5] {
            for rate_index in 0..3 {
                let rate = sample_rate(version, rate_index);
                for i in 1..MAX_BITRATE_INDEX {
                    assert!(frame_size(i, rate, version) < frame_size(i + 1, rate, version));
                }
            }
        }
    }

    #[test]
    fn side_info_table() {
        assert_eq!(side_info_size(1, MpegVersion::V1), 17);
        assert_eq!(side_info_size(2, MpegVersion::V1), 32);
        assert_eq!(side_info_size(1, MpegVersion::V2), 9);
        assert_eq!(side_info_size(2, MpegVersion::V2_5), 17);

        // main_data_start + private bits + scfsi + per granule and channel fields
        for channels in 1..=2usize {
            let v1 = 9
                + private_bits(channels, MpegVersion::V1) as usize
                + 4 * channels
                + 2 * channels * (12 + 32 + 15);
            assert_eq!(v1, side_info_size(channels, MpegVersion::V1) * 8);

            let v2 = 8 + private_bits(channels, MpegVersion::V2) as usize + channels * (12 + 32 + 19);
            assert_eq!(v2, side_info_size(channels, MpegVersion::V2) * 8);
        }
    }

    #[test]
    fn side_info_by_channel_mode() {
        let modes = [
            (ChannelMode::Stereo, 32, 17),
            (ChannelMode::JointStereo, 32, 17),
            (ChannelMode::DualChannel, 32, 17),
            (ChannelMode::Mono, 17, 9),
        ];
        for (channel_mode, v1_size, v2_size) in modes {
            for (version, expected) in [
                (MpegVersion::V1, v1_size),
                (MpegVersion::V2, v2_size),
                (MpegVersion::V2_5, v2_size),
            ] {
                let header = FrameHeader {
                    version,
                    channel_mode,
                    ..Default::default()
                };
                assert_eq!(header.side_info_size(), expected, "{channel_mode:?} {version:?}");
            }
        }
    }

    #[test]
    fn bitrate_estimate() {
        let v1 = MpegVersion::V1;
        assert_eq!(estimate_bitrate_index(1, 44100, v1), 1);
        assert_eq!(estimate_bitrate_index(104, 44100, v1), 1);
        assert_eq!(estimate_bitrate_index(105, 44100, v1), 2);
        assert_eq!(estimate_bitrate_index(1044, 44100, v1), 14);
        assert_eq!(estimate_bitrate_index(1045, 44100, v1), 0);
    }

    #[test]
    fn header_write_then_parse() -> anyhow::Result<()> {
        let header = FrameHeader {
            version: MpegVersion::V2,
            bitrate_index: 8,
            sample_rate_index: 1,
            channel_mode: ChannelMode::JointStereo,
            mode_extension: 2,
            ..Default::default()
        };

        let mut bytes = [0u8; 4];
        header.write(&mut BitStream::new(&mut bytes[..]));
        assert_eq!(bytes, [0xFF, 0xF3, 0x84, 0x6C]);

        let parsed = FrameHeader::parse(&bytes, 0)?;
        assert_eq!(parsed, header);
        assert_eq!(parsed.sample_rate(), 24000);
        assert_eq!(parsed.frame_size(), 192);
        assert_eq!(parsed.header_size(), 4);
        Ok(())
    }

    #[test]
    fn header_rejects() {
        let err = FrameHeader::parse(&[0xFF, 0xE8, 0x90, 0x00], 7).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<MpegError>(),
            Some(MpegError::ReservedVersion)
        ));

        // layer II
        let err = FrameHeader::parse(&[0xFF, 0xFC, 0x90, 0x00], 0).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<MpegError>(),
            Some(MpegError::UnsupportedLayer(0b10))
        ));

        // free format
        let err = FrameHeader::parse(&[0xFF, 0xFB, 0x00, 0x00], 0).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<MpegError>(),
            Some(MpegError::UnsupportedBitrateIndex(0))
        ));

        let err = FrameHeader::parse(&[0x12, 0x34, 0x56, 0x78], 3).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<MpegError>(),
            Some(MpegError::SyncMismatch(3))
        ));
    }
}
