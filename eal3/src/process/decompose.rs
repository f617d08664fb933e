//! Decomposition of MPEG Layer III streams into granules.
//!
//! The decomposer walks an MP3 file frame by frame, follows `main_data_start`
//! back into the bit reservoir and hands out [`Frame`]s whose granules carry
//! their complete main data, ready to be packed into EAL3 blocks.
//!
//! ID3v2 tags are skipped. Anything else that does not start with `0xFF`
//! triggers a resync scan; a header that fails to parse after a resync is
//! taken as the end of the stream.

use anyhow::{Result, bail};
use log::Level::Warn;
use log::{debug, trace};

use crate::log_or_err;
use crate::structs::granule::{ChannelInfo, Frame, Granule};
use crate::structs::mpeg::{FrameHeader, main_data_start_bits, private_bits, side_info_tail_bits};
use crate::structs::reservoir::Reservoir;
use crate::utils::bitstream::BitStream;
use crate::utils::errors::{MpegError, ReservoirError};

const ID3_TAG: &[u8; 3] = b"ID3";
const ID3_HEADER_SIZE: usize = 10;
const RESYNC_WINDOW: usize = 2000;

/// Reads before [`FrameDecomposer::next_audio_frame`] gives up on finding a
/// frame with main data.
pub const MAX_FRAME_ATTEMPTS: usize = 16;

#[derive(Debug)]
pub struct FrameDecomposer {
    data: Vec<u8>,
    pos: usize,
    reservoir: Reservoir,
    frames_read: usize,
    empty_frames: usize,
    finished: bool,
    fail_level: log::Level,
}

impl FrameDecomposer {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            pos: 0,
            reservoir: Reservoir::default(),
            frames_read: 0,
            empty_frames: 0,
            finished: false,
            fail_level: log::Level::Error,
        }
    }

    pub fn set_fail_level(&mut self, level: log::Level) {
        self.fail_level = level;
    }

    /// MPEG frames parsed so far, ID3 tags excluded.
    pub fn frames_read(&self) -> usize {
        self.frames_read
    }

    /// Frames without main data that were passed over.
    pub fn empty_frames(&self) -> usize {
        self.empty_frames
    }

    pub fn bytes_consumed(&self) -> usize {
        self.pos
    }

    pub fn is_finished(&self) -> bool {
        self.finished || self.pos >= self.data.len()
    }

    /// Reads the next tag or frame. ID3 tags and frames without main data
    /// come back as a [`Frame`] with no used granule; `None` is the end of the
    /// stream.
    pub fn read_frame(&mut self) -> Result<Option<Frame>> {
        if self.is_finished() {
            return Ok(None);
        }

        let rest = &self.data[self.pos..];
        if rest.starts_with(ID3_TAG) {
            return Ok(self.skip_id3());
        }

        if rest[0] == 0xFF {
            let header = FrameHeader::parse(rest, self.pos)?;
            return self.read_frame_body(header);
        }

        let window = &rest[..rest.len().min(RESYNC_WINDOW)];
        let Some(skip) = window.iter().position(|&b| b == 0xFF) else {
            debug!(
                "No frame sync within {} bytes of offset {}, ending stream",
                window.len(),
                self.pos
            );
            self.finished = true;
            return Ok(None);
        };

        debug!("Resynced {skip} bytes after offset {}", self.pos);
        self.pos += skip;
        match FrameHeader::parse(&self.data[self.pos..], self.pos) {
            Ok(header) => self.read_frame_body(header),
            Err(e) => {
                debug!("Ending stream after resync: {e}");
                self.finished = true;
                Ok(None)
            }
        }
    }

    /// Reads frames until one carries main data, passing over tags and empty
    /// frames.
    pub fn next_audio_frame(&mut self) -> Result<Option<Frame>> {
        for _ in 0..MAX_FRAME_ATTEMPTS {
            match self.read_frame()? {
                None => return Ok(None),
                Some(frame) if frame.gr[0].used => return Ok(Some(frame)),
                Some(_) => {}
            }
        }

        debug!(
            "No audio frame in {MAX_FRAME_ATTEMPTS} attempts at offset {}, ending stream",
            self.pos
        );
        self.finished = true;
        Ok(None)
    }

    fn skip_id3(&mut self) -> Option<Frame> {
        let rest = &self.data[self.pos..];
        if rest.len() < ID3_HEADER_SIZE {
            self.finished = true;
            return None;
        }

        let size = rest[6..10]
            .iter()
            .fold(0usize, |acc, &b| (acc << 7) | usize::from(b & 0x7F));
        debug!("Skipping {} byte ID3 tag at offset {}", size + ID3_HEADER_SIZE, self.pos);
        self.pos = (self.pos + size + ID3_HEADER_SIZE).min(self.data.len());
        Some(Frame::default())
    }

    fn read_frame_body(&mut self, header: FrameHeader) -> Result<Option<Frame>> {
        let start = self.pos;
        let frame_size = header.frame_size();
        let available = self.data.len() - start;
        if frame_size > available {
            log_or_err!(
                self,
                Warn,
                MpegError::TruncatedFrame {
                    offset: start,
                    needed: frame_size,
                    available,
                }
            );
            self.finished = true;
            return Ok(None);
        }

        self.pos = start + frame_size;
        self.frames_read += 1;

        let body = &self.data[start + header.header_size()..start + frame_size];
        let version = header.version;
        let channels = header.channels();
        let side_size = header.side_info_size();

        let mut bs = BitStream::new(body);
        let main_data_start = bs.read_bits(main_data_start_bits(version)) as usize;
        bs.read_bits(private_bits(channels, version));

        let mut frame = Frame::default();
        for (index, gr) in frame.gr.iter_mut().enumerate() {
            *gr = Granule {
                version,
                sample_rate_index: header.sample_rate_index,
                channel_mode: header.channel_mode,
                mode_extension: header.mode_extension,
                index: index as u8,
                channel_info: vec![ChannelInfo::default(); channels],
                ..Default::default()
            };
        }

        if version.is_v1() {
            for ci in frame.gr[1].channel_info.iter_mut() {
                ci.scfsi = bs.read_bits(4) as u8;
            }
        }

        let granule_count = version.granule_count();
        let tail_bits = side_info_tail_bits(version);
        for gr in frame.gr.iter_mut().take(granule_count) {
            for ci in gr.channel_info.iter_mut() {
                ci.size = bs.read_bits(12) as u16;
                ci.side_info[0] = bs.read_bits(32);
                ci.side_info[1] = bs.read_bits(tail_bits);
            }
        }

        let data_bits: u64 = frame
            .gr
            .iter()
            .take(granule_count)
            .map(Granule::data_size_bits)
            .sum();
        let data_size = data_bits.div_ceil(8) as usize;

        let occupancy = self.reservoir.occupancy();
        if data_size > 0 && main_data_start > occupancy {
            bail!(ReservoirError::Underflow {
                requested: main_data_start,
                available: occupancy,
            });
        }

        // room for main data in this frame, minus what it does not take from the reservoir
        let frame_space = (frame_size - header.header_size()) as i64 - side_size as i64;
        let new_occupancy = frame_space - (data_size as i64 - main_data_start as i64);
        if new_occupancy < 0 {
            bail!(ReservoirError::Negative(new_occupancy));
        }

        let window = main_data_start.min(occupancy);
        let mut res = BitStream::new(self.reservoir.tail(window)?);
        let mut res_bits_left = (window as u64) << 3;

        for gr in frame.gr.iter_mut().take(granule_count) {
            let bits = gr.data_size_bits();
            gr.data = vec![0; bits.div_ceil(8) as usize];
            let mut out = BitStream::new(&mut gr.data[..]);

            let from_reservoir = bits.min(res_bits_left);
            out.copy_bits_from(&mut res, from_reservoir);
            res_bits_left -= from_reservoir;
            out.copy_bits_from(&mut bs, bits - from_reservoir);
        }

        let still = (res_bits_left >> 3) as usize;
        bs.seek_to_next_byte();
        let fresh_start = ((bs.tell() >> 3) as usize).min(body.len());
        self.reservoir.refill(still, &body[fresh_start..])?;

        trace!(
            "Frame {} at offset {start}: {frame_size} bytes, main_data_start {main_data_start}, {data_bits} bits, reservoir {}",
            self.frames_read,
            self.reservoir.occupancy()
        );

        if data_size == 0 {
            debug!("Skipped empty frame at offset {start}");
            self.empty_frames += 1;
            return Ok(Some(frame));
        }

        for gr in frame.gr.iter_mut().take(granule_count) {
            gr.used = true;
        }
        Ok(Some(frame))
    }
}

impl Iterator for FrameDecomposer {
    type Item = Result<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_audio_frame() {
            Ok(frame) => frame.map(Ok),
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}
