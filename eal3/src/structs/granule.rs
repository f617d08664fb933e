//! Granule and frame records shared by the codecs, the frame synthesizer and
//! the frame decomposer.
//!
//! A granule is one half of an MPEG 1 frame, or the whole frame for MPEG 2
//! and 2.5. It holds the header fields needed to rebuild a frame header, the
//! per-channel side information, the main data bits and an optional block of
//! raw PCM samples that replace part of the decoded granule.

use std::collections::VecDeque;

use crate::structs::mpeg::{self, ChannelMode, FrameHeader, MpegVersion};

/// Samples of silence attached to the first frame of an encoded stream.
pub const ENCODER_UNCOMPRESSED_SAMPLES: u32 = 47;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelInfo {
    /// Scale factor selection information (MPEG 1 only).
    pub scfsi: u8,
    /// Main data size in bits (part2_3_length).
    pub size: u16,
    pub side_info: [u32; 2],
}

/// Raw PCM samples spliced over the decoded output of a granule.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UncompressedOverride {
    /// Sample frames, per channel.
    pub count: u32,
    /// Offset into the granule output where the samples start.
    pub offset: u32,
    /// Interleaved samples, `count * channels` entries.
    pub samples: Vec<i16>,
}

impl UncompressedOverride {
    pub fn silence(count: u32, channels: usize) -> Self {
        Self {
            count,
            offset: 0,
            samples: vec![0; count as usize * channels],
        }
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Granule {
    pub used: bool,
    pub version: MpegVersion,
    pub sample_rate_index: u8,
    pub channel_mode: ChannelMode,
    pub mode_extension: u8,
    /// Position inside an MPEG 1 frame, always 0 for the other versions.
    pub index: u8,
    pub channel_info: Vec<ChannelInfo>,
    /// Main data, padded to a whole byte.
    pub data: Vec<u8>,
    pub uncompressed: UncompressedOverride,
}

impl Granule {
    #[inline(always)]
    pub fn channels(&self) -> usize {
        self.channel_mode.channels()
    }

    pub fn sample_rate(&self) -> u32 {
        mpeg::sample_rate(self.version, self.sample_rate_index)
    }

    /// All-zero header bits mark the end of a block.
    pub fn is_null_header(
        version: u8,
        sample_rate_index: u8,
        channel_mode: u8,
        mode_extension: u8,
        index: u8,
    ) -> bool {
        version == 0
            && sample_rate_index == 0
            && channel_mode == 0
            && mode_extension == 0
            && index == 0
    }

    /// Main data size in bits, the sum of the channel sizes.
    pub fn data_size_bits(&self) -> u64 {
        self.channel_info.iter().map(|ci| u64::from(ci.size)).sum()
    }

    /// Header of a synthesized frame carrying this granule. The bitrate index
    /// stays 0 until the stream is finalized.
    pub fn frame_header(&self) -> FrameHeader {
        FrameHeader {
            version: self.version,
            crc_protected: false,
            bitrate_index: 0,
            sample_rate_index: self.sample_rate_index,
            padding: false,
            private: false,
            channel_mode: self.channel_mode,
            mode_extension: self.mode_extension,
        }
    }

    /// True when both granules describe the same stream layout.
    pub fn same_layout(&self, other: &Granule) -> bool {
        self.version == other.version
            && self.sample_rate_index == other.sample_rate_index
            && self.channel_mode == other.channel_mode
    }
}

/// One MPEG frame worth of granules. Only `gr[0]` is used by MPEG 2 and 2.5.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Frame {
    pub gr: [Granule; 2],
}

impl Frame {
    /// The first used granule, which carries the frame's header fields.
    pub fn base(&self) -> Option<&Granule> {
        self.gr.iter().find(|gr| gr.used)
    }

    /// All granules a frame of this version needs are present.
    pub fn is_complete(&self) -> bool {
        match self.base() {
            Some(gr) if gr.version.is_v1() => self.gr[0].used && self.gr[1].used,
            Some(_) => self.gr[0].used,
            None => false,
        }
    }

    pub fn is_empty(&self) -> bool {
        !self.gr[0].used && !self.gr[1].used
    }

    /// Replaces the uncompressed samples of the granule a decoder outputs
    /// first after the encoder delay: `gr[1]` for MPEG 1, `gr[0]` otherwise.
    pub fn attach_lead_in(&mut self, count: u32) {
        let slot = match self.base() {
            Some(gr) if gr.version.is_v1() => 1,
            Some(_) => 0,
            None => return,
        };
        let channels = self.gr[slot].channels();
        self.gr[slot].uncompressed = UncompressedOverride::silence(count, channels);
    }
}

/// Pending frames of one interleaved stream.
pub type Stream = VecDeque<Frame>;

#[cfg(test)]
mod tests {
    use super::*;

    fn granule(version: MpegVersion, index: u8) -> Granule {
        Granule {
            used: true,
            version,
            sample_rate_index: 1,
            channel_mode: ChannelMode::Mono,
            index,
            channel_info: vec![ChannelInfo {
                size: 20,
                ..Default::default()
            }],
            data: vec![0; 3],
            ..Default::default()
        }
    }

    #[test]
    fn frame_completeness() {
        let mut frame = Frame::default();
        assert!(!frame.is_complete());
        assert!(frame.is_empty());

        frame.gr[0] = granule(MpegVersion::V1, 0);
        assert!(!frame.is_complete());
        frame.gr[1] = granule(MpegVersion::V1, 1);
        assert!(frame.is_complete());

        let mut frame = Frame::default();
        frame.gr[0] = granule(MpegVersion::V2, 0);
        assert!(frame.is_complete());

        let mut frame = Frame::default();
        frame.gr[1] = granule(MpegVersion::V1, 1);
        assert!(!frame.is_complete());
    }

    #[test]
    fn lead_in_slot() {
        let mut frame = Frame::default();
        frame.gr[0] = granule(MpegVersion::V1, 0);
        frame.gr[1] = granule(MpegVersion::V1, 1);
        frame.attach_lead_in(ENCODER_UNCOMPRESSED_SAMPLES);
        assert!(frame.gr[0].uncompressed.is_empty());
        assert_eq!(frame.gr[1].uncompressed.count, 47);
        assert_eq!(frame.gr[1].uncompressed.samples.len(), 47);

        let mut frame = Frame::default();
        frame.gr[0] = granule(MpegVersion::V2_5, 0);
        frame.attach_lead_in(ENCODER_UNCOMPRESSED_SAMPLES);
        assert_eq!(frame.gr[0].uncompressed.count, 47);
        assert!(frame.gr[1].uncompressed.is_empty());
    }

    #[test]
    fn null_header() {
        assert!(Granule::is_null_header(0, 0, 0, 0, 0));
        assert!(!Granule::is_null_header(0, 0, 0, 0, 1));
        assert!(!Granule::is_null_header(3, 0, 0, 0, 0));
    }
}
