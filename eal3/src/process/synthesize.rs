//! Reconstruction of MPEG Layer III streams from EAL3 granules.
//!
//! ## Workflow
//!
//! 1. [`FrameSynthesizer::new`] probes the first block to learn how many
//!    interleaved streams there are and their layout, and opens each stream
//!    with a Xing frame.
//! 2. [`FrameSynthesizer::push_block`] is called for every block, the first
//!    one included. Complete frames are laid out immediately with bitrate
//!    index 0 and `main_data_start` 0.
//! 3. [`FrameSynthesizer::finalize`] walks each stream backwards, picks the
//!    smallest bitrate that holds each frame and lets frames that do not fit
//!    even the largest bitrate borrow space from their predecessor through
//!    the bit reservoir.
//! 4. The accessors then hand out physical frames.
//!
//! ## Physical Frames
//!
//! A physical frame is its header and side info, its own main data minus the
//! bytes that moved into the previous frame, padding, then the leading main
//! data of the next frame when the next frame borrows from this one. Audio
//! frames are padded with `0xE5`, the Xing frame with `0xEE`.

use anyhow::{Result, bail};
use log::Level::Warn;
use log::{debug, trace};

use crate::log_or_err;
use crate::process::codec::{GranuleCodec, distribute_block};
use crate::structs::block::Block;
use crate::structs::granule::{Frame, Stream, UncompressedOverride};
use crate::structs::mpeg::{
    FrameHeader, HEADER_SIZE, MAX_BITRATE_INDEX, MAX_MPEG_FRAME_BUFFER, MpegVersion,
    estimate_bitrate_index, frame_size, main_data_start_bits, max_main_data_start, private_bits,
    side_info_size, side_info_tail_bits,
};
use crate::utils::bitstream::BitStream;
use crate::utils::errors::{BitrateError, FormatError, SequencingError};

/// Filler between a frame's own data and the data it lends to the next frame.
pub const FRAME_PADDING: u8 = 0xE5;

const XING_FILL: u8 = 0xEE;
const XING_TAG: &[u8; 4] = b"Xing";
const XING_FLAGS_FRAMES_BYTES: u32 = 0x3;
const XING_PAYLOAD_SIZE: usize = 16;

#[derive(Debug, Clone)]
pub struct SynthesizedFrame {
    data: Vec<u8>,
    header_size: usize,
    used: usize,
    size: usize,
    bitrate_index: u8,
    used_from_previous: usize,
    used_by_next: usize,
    /// Byte written between the frame's data and the next frame's data.
    fill: u8,
    uncompressed: [UncompressedOverride; 2],
}

impl SynthesizedFrame {
    fn xing(header: &FrameHeader) -> Self {
        let header_size = HEADER_SIZE + header.side_info_size() + XING_PAYLOAD_SIZE;
        let mut data = vec![XING_FILL; MAX_MPEG_FRAME_BUFFER];

        let mut bs = BitStream::new(&mut data[..]);
        header.write(&mut bs);
        for _ in 0..header.side_info_size() {
            bs.write_bits(0, 8);
        }

        let mut frame = Self {
            data,
            header_size,
            used: header_size,
            size: 0,
            bitrate_index: 0,
            used_from_previous: 0,
            used_by_next: 0,
            fill: XING_FILL,
            uncompressed: Default::default(),
        };
        frame.write_xing_payload(header.side_info_size(), 0, 0);
        frame
    }

    fn write_xing_payload(&mut self, side_info_size: usize, frames: u32, bytes: u32) {
        let start = HEADER_SIZE + side_info_size;
        let payload = &mut self.data[start..start + XING_PAYLOAD_SIZE];
        payload[..4].copy_from_slice(XING_TAG);
        payload[4..8].copy_from_slice(&XING_FLAGS_FRAMES_BYTES.to_be_bytes());
        payload[8..12].copy_from_slice(&frames.to_be_bytes());
        payload[12..].copy_from_slice(&bytes.to_be_bytes());
    }

    fn construct(frame: Frame) -> Result<Self> {
        let Frame { gr: [gr0, gr1] } = frame;
        let version = gr0.version;
        if version.is_v1() && !gr0.same_layout(&gr1) {
            bail!(FormatError::GranuleLayoutMismatch);
        }

        let header = gr0.frame_header();
        let channels = gr0.channels();
        let header_size = HEADER_SIZE + side_info_size(channels, version);
        let granules = if version.is_v1() {
            vec![&gr0, &gr1]
        } else {
            vec![&gr0]
        };

        let data_bits: u64 = granules.iter().map(|gr| gr.data_size_bits()).sum();
        let used = header_size + data_bits.div_ceil(8) as usize;

        let mut data = vec![0u8; MAX_MPEG_FRAME_BUFFER];
        let mut bs = BitStream::new(&mut data[..]);
        header.write(&mut bs);
        bs.write_bits(0, main_data_start_bits(version));
        bs.write_bits(0, private_bits(channels, version));
        if version.is_v1() {
            for ci in &gr1.channel_info {
                bs.write_bits(ci.scfsi.into(), 4);
            }
        }

        let tail_bits = side_info_tail_bits(version);
        for gr in &granules {
            for ci in &gr.channel_info {
                bs.write_bits(ci.size.into(), 12);
                bs.write_bits(ci.side_info[0], 32);
                bs.write_bits(ci.side_info[1], tail_bits);
            }
        }
        for gr in &granules {
            bs.copy_bits_from(&mut BitStream::new(&gr.data[..]), gr.data_size_bits());
        }
        bs.write_to_next_byte();
        data.truncate(used);

        let uncompressed = if version.is_v1() {
            [gr0.uncompressed, gr1.uncompressed]
        } else {
            [gr0.uncompressed, UncompressedOverride::default()]
        };

        Ok(Self {
            data,
            header_size,
            used,
            size: 0,
            bitrate_index: 0,
            used_from_previous: 0,
            used_by_next: 0,
            fill: FRAME_PADDING,
            uncompressed,
        })
    }

    /// Patches the bitrate index and `main_data_start` into the header.
    fn write_fields(&mut self, version: MpegVersion) {
        let mut bs = BitStream::new(&mut self.data[..]);
        bs.seek_absolute(16);
        bs.write_bits(self.bitrate_index.into(), 4);
        bs.seek_absolute(32);
        bs.write_bits(self.used_from_previous as u32, main_data_start_bits(version));
    }

    /// Header and side info bytes.
    pub fn header_size(&self) -> usize {
        self.header_size
    }

    /// Header, side info and main data bytes before any borrowing.
    pub fn used(&self) -> usize {
        self.used
    }

    /// Physical frame size, known after finalizing.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn bitrate_index(&self) -> u8 {
        self.bitrate_index
    }

    /// Bytes of this frame's main data stored in the previous frame.
    pub fn used_from_previous(&self) -> usize {
        self.used_from_previous
    }

    /// Bytes of the next frame's main data stored in this frame.
    pub fn used_by_next(&self) -> usize {
        self.used_by_next
    }

    pub fn uncompressed(&self) -> &[UncompressedOverride; 2] {
        &self.uncompressed
    }
}

#[derive(Debug)]
pub struct FrameSynthesizer {
    codec: Box<dyn GranuleCodec>,
    headers: Vec<FrameHeader>,
    pending: Vec<Stream>,
    outputs: Vec<Vec<SynthesizedFrame>>,
    sample_frames: u64,
    uncompressed_sample_frames: u64,
    blocks: usize,
    finalized: bool,
    fail_level: log::Level,
}

impl FrameSynthesizer {
    /// Discovers the streams of `first_block`. The block is not consumed;
    /// push it like every other block.
    pub fn new(codec: Box<dyn GranuleCodec>, first_block: &Block) -> Result<Self> {
        let mut probe = Vec::new();
        distribute_block(codec.as_ref(), &first_block.data, &mut probe)?;

        let headers = probe
            .iter()
            .map(|stream| stream.iter().find_map(Frame::base).map(|gr| gr.frame_header()))
            .collect::<Option<Vec<_>>>()
            .unwrap_or_default();
        if headers.is_empty() {
            bail!(FormatError::NoGranules);
        }

        for (i, header) in headers.iter().enumerate() {
            debug!(
                "Stream {i}: {}, {} Hz, {} channel(s)",
                header.version.label(),
                header.sample_rate(),
                header.channels()
            );
        }

        let outputs = headers.iter().map(|h| vec![SynthesizedFrame::xing(h)]).collect();
        Ok(Self {
            codec,
            headers,
            pending: Vec::new(),
            outputs,
            sample_frames: 0,
            uncompressed_sample_frames: 0,
            blocks: 0,
            finalized: false,
            fail_level: log::Level::Error,
        })
    }

    pub fn set_fail_level(&mut self, level: log::Level) {
        self.fail_level = level;
        self.codec.set_fail_level(level);
    }

    pub fn codec_name(&self) -> &'static str {
        self.codec.name()
    }

    pub fn push_block(&mut self, block: &Block) -> Result<()> {
        if self.finalized {
            bail!(SequencingError::AlreadyFinalized);
        }

        self.sample_frames += u64::from(block.sample_count);
        let granules = distribute_block(self.codec.as_ref(), &block.data, &mut self.pending)?;
        trace!(
            "Block {} at offset {}: {granules} granules",
            self.blocks, block.offset
        );
        self.blocks += 1;

        if self.pending.len() > self.outputs.len() {
            debug!(
                "Block at offset {} carries {} streams, only {} are decoded",
                block.offset,
                self.pending.len(),
                self.outputs.len()
            );
            self.pending.truncate(self.outputs.len());
        }

        for (i, stream) in self.pending.iter_mut().enumerate() {
            while let Some(front) = stream.front() {
                if !front.is_complete() {
                    if stream.len() == 1 {
                        break;
                    }
                    log_or_err!(self, Warn, FormatError::IncompleteFrame { stream: i });
                    stream.pop_front();
                    continue;
                }

                let Some(frame) = stream.pop_front() else {
                    break;
                };
                let frame = SynthesizedFrame::construct(frame)?;
                self.uncompressed_sample_frames += frame
                    .uncompressed
                    .iter()
                    .map(|unc| u64::from(unc.count))
                    .sum::<u64>();
                self.outputs[i].push(frame);
            }
        }

        Ok(())
    }

    /// Assigns bitrates and bit reservoir offsets and fills in the Xing
    /// frames. No blocks can be pushed afterwards.
    pub fn finalize(&mut self) -> Result<()> {
        if self.finalized {
            bail!(SequencingError::AlreadyFinalized);
        }

        for (frames, header) in self.outputs.iter_mut().zip(&self.headers) {
            let version = header.version;
            let sample_rate = header.sample_rate();
            let max_size = frame_size(MAX_BITRATE_INDEX, sample_rate, version);
            let mut total_bytes = 0u64;

            for j in (0..frames.len()).rev() {
                let (before, rest) = frames.split_at_mut(j);
                let frame = &mut rest[0];
                let needed = frame.used + frame.used_by_next;

                let mut index = estimate_bitrate_index(needed, sample_rate, version);
                if index > 0 {
                    frame.size = frame_size(index, sample_rate, version);
                    frame.used_from_previous = 0;
                } else if let Some(previous) = before.last_mut() {
                    index = MAX_BITRATE_INDEX;
                    frame.size = max_size;

                    let borrowed = needed - max_size;
                    let max = max_main_data_start(version);
                    if borrowed > max {
                        bail!(BitrateError::BorrowTooFar {
                            frame: j,
                            borrowed,
                            max,
                        });
                    }
                    let own = frame.used - frame.header_size;
                    if borrowed > own {
                        bail!(BitrateError::BorrowExceedsData {
                            frame: j,
                            borrowed,
                            own,
                        });
                    }

                    frame.used_from_previous = borrowed;
                    previous.used_by_next = borrowed;
                } else {
                    bail!(BitrateError::Exceeded {
                        frame: j,
                        used: needed,
                        max: max_size,
                    });
                }

                frame.bitrate_index = index;
                frame.write_fields(version);
                total_bytes += frame.size as u64;
            }

            let count = frames.len() as u32;
            if let Some(xing) = frames.first_mut() {
                xing.write_xing_payload(header.side_info_size(), count, total_bytes as u32);
            }
            debug!("{count} frames, {total_bytes} bytes");
        }

        self.finalized = true;
        Ok(())
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    pub fn stream_count(&self) -> usize {
        self.outputs.len()
    }

    pub fn sample_rate(&self, stream: usize) -> Result<u32> {
        Ok(self.header(stream)?.sample_rate())
    }

    pub fn channels(&self, stream: usize) -> Result<usize> {
        Ok(self.header(stream)?.channels())
    }

    pub fn version(&self, stream: usize) -> Result<MpegVersion> {
        Ok(self.header(stream)?.version)
    }

    /// Sum of the sample counts of all pushed blocks.
    pub fn sample_frames(&self) -> u64 {
        self.sample_frames
    }

    /// Uncompressed override samples (per channel) in all built frames.
    pub fn uncompressed_sample_frames(&self) -> u64 {
        self.uncompressed_sample_frames
    }

    /// Frames of a stream, the Xing frame included.
    pub fn frame_count(&self, stream: usize) -> Result<usize> {
        Ok(self.frames(stream)?.len())
    }

    pub fn frames(&self, stream: usize) -> Result<&[SynthesizedFrame]> {
        if !self.finalized {
            bail!(SequencingError::NotFinalized);
        }
        self.outputs
            .get(stream)
            .map(Vec::as_slice)
            .ok_or_else(|| {
                SequencingError::StreamOutOfRange {
                    index: stream,
                    count: self.outputs.len(),
                }
                .into()
            })
    }

    /// The physical bytes of frame `index` of `stream`.
    pub fn read_frame(&self, index: usize, stream: usize) -> Result<Vec<u8>> {
        let frames = self.frames(stream)?;
        if index >= frames.len() {
            bail!(SequencingError::FrameOutOfRange {
                index,
                count: frames.len(),
            });
        }
        Ok(physical_frame(frames, index))
    }

    pub fn uncompressed_samples(
        &self,
        granule: usize,
        index: usize,
        stream: usize,
    ) -> Result<&UncompressedOverride> {
        let frames = self.frames(stream)?;
        let frame = frames.get(index).ok_or(SequencingError::FrameOutOfRange {
            index,
            count: frames.len(),
        })?;
        frame
            .uncompressed
            .get(granule)
            .ok_or_else(|| SequencingError::GranuleOutOfRange(granule).into())
    }

    /// Iterates over the physical frames of a stream in order.
    pub fn mpeg_stream(&self, stream: usize) -> Result<MpegStream<'_>> {
        Ok(MpegStream {
            frames: self.frames(stream)?,
            next: 0,
        })
    }

    fn header(&self, stream: usize) -> Result<&FrameHeader> {
        self.headers.get(stream).ok_or_else(|| {
            SequencingError::StreamOutOfRange {
                index: stream,
                count: self.headers.len(),
            }
            .into()
        })
    }
}

fn physical_frame(frames: &[SynthesizedFrame], index: usize) -> Vec<u8> {
    let frame = &frames[index];
    let mut out = Vec::with_capacity(frame.size);

    out.extend_from_slice(&frame.data[..frame.header_size]);
    out.extend_from_slice(&frame.data[frame.header_size + frame.used_from_previous..frame.used]);

    let padding = frame
        .size
        .saturating_sub(frame.used - frame.used_from_previous)
        .saturating_sub(frame.used_by_next);
    out.resize(out.len() + padding, frame.fill);

    if frame.used_by_next > 0 {
        if let Some(next) = frames.get(index + 1) {
            out.extend_from_slice(&next.data[next.header_size..next.header_size + frame.used_by_next]);
        }
    }
    out
}

/// Physical frames of one finalized stream.
#[derive(Debug, Clone)]
pub struct MpegStream<'a> {
    frames: &'a [SynthesizedFrame],
    next: usize,
}

impl Iterator for MpegStream<'_> {
    type Item = Vec<u8>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.frames.len() {
            return None;
        }
        let frame = physical_frame(self.frames, self.next);
        self.next += 1;
        Some(frame)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.frames.len() - self.next;
        (left, Some(left))
    }
}
