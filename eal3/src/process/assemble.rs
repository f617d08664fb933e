//! Packing of MPEG frames into EAL3 blocks.
//!
//! One block carries one frame per interleaved stream. All first granules are
//! written before all second granules, which is the order the block
//! distribution on the decoding side expects.

use anyhow::Result;
use log::trace;

use crate::process::codec::{GranuleCodec, mpeg_granule_bits, uncompressed_bits};
use crate::structs::block::Block;
use crate::structs::granule::{ENCODER_UNCOMPRESSED_SAMPLES, Frame};
use crate::utils::bitstream::BitStream;

// flag byte, alignment and the largest sample and size headers
const GRANULE_FRAMING_BYTES: usize = 24;

#[derive(Debug)]
pub struct BlockAssembler {
    codec: Box<dyn GranuleCodec>,
    queued: Vec<Frame>,
}

impl BlockAssembler {
    pub fn new(codec: Box<dyn GranuleCodec>) -> Self {
        Self {
            codec,
            queued: Vec::new(),
        }
    }

    pub fn codec_name(&self) -> &'static str {
        self.codec.name()
    }

    /// Queues the next frame of one stream.
    pub fn add_frame(&mut self, frame: Frame) {
        self.queued.push(frame);
    }

    pub fn queued(&self) -> usize {
        self.queued.len()
    }

    /// Writes every queued frame into one block and clears the queue. `first`
    /// marks the block that opens the EAL3 stream. `None` when nothing is
    /// queued.
    pub fn assemble(&mut self, first: bool) -> Result<Option<Block>> {
        let Some(base) = self.queued.iter().find_map(Frame::base) else {
            self.queued.clear();
            return Ok(None);
        };
        let version = base.version;
        let sample_rate = base.sample_rate();

        let capacity: usize = self
            .queued
            .iter()
            .flat_map(|frame| frame.gr.iter())
            .filter(|gr| gr.used)
            .map(|gr| {
                let bits = mpeg_granule_bits(gr) + uncompressed_bits(gr);
                bits.div_ceil(8) as usize + GRANULE_FRAMING_BYTES
            })
            .sum();

        let mut data = vec![0u8; capacity];
        let mut bs = BitStream::new(&mut data[..]);
        for slot in 0..2 {
            for frame in &self.queued {
                let gr = &frame.gr[slot];
                if gr.used {
                    self.codec.write_granule(&mut bs, gr)?;
                }
            }
        }
        bs.write_to_next_byte();
        let size = (bs.tell() >> 3) as usize;
        data.truncate(size);

        let channels = self
            .queued
            .iter()
            .filter_map(Frame::base)
            .map(|gr| gr.channels() as u32)
            .sum();

        let sample_count = if first {
            ENCODER_UNCOMPRESSED_SAMPLES
        } else {
            version.samples_per_frame()
        };

        trace!(
            "Assembled {} frame(s) into a {size} byte block, {sample_count} samples",
            self.queued.len()
        );
        self.queued.clear();

        Ok(Some(Block {
            data,
            sample_count,
            sample_rate,
            channels,
            ..Default::default()
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::codec::tests::test_granule;
    use crate::process::codec::{Version5Codec, Version6Codec, distribute_block};
    use crate::structs::granule::UncompressedOverride;
    use crate::structs::mpeg::{ChannelMode, MpegVersion};

    fn frame(version: MpegVersion, mode: ChannelMode, seed: u8) -> Frame {
        let mut frame = Frame::default();
        frame.gr[0] = test_granule(version, mode, 0, seed);
        if version.is_v1() {
            frame.gr[1] = test_granule(version, mode, 1, seed + 1);
        }
        frame
    }

    #[test]
    fn streams_come_back_in_order() -> Result<()> {
        let mut first = frame(MpegVersion::V1, ChannelMode::Stereo, 1);
        first.attach_lead_in(ENCODER_UNCOMPRESSED_SAMPLES);
        let second = frame(MpegVersion::V1, ChannelMode::Mono, 5);

        for codec in [
            Box::new(Version5Codec) as Box<dyn GranuleCodec>,
            Box::new(Version6Codec::default()),
        ] {
            let mut assembler = BlockAssembler::new(codec);
            assembler.add_frame(first.clone());
            assembler.add_frame(second.clone());
            let block = assembler.assemble(true)?.unwrap();

            assert_eq!(block.sample_count, 47);
            assert_eq!(block.sample_rate, 48000);
            assert_eq!(block.channels, 3);
            assert_eq!(assembler.queued(), 0);

            let mut streams = Vec::new();
            distribute_block(assembler.codec.as_ref(), &block.data, &mut streams)?;
            assert_eq!(streams.len(), 2);
            assert_eq!(streams[0][0], first);
            assert_eq!(streams[1][0], second);
        }
        Ok(())
    }

    #[test]
    fn sample_counts() -> Result<()> {
        let mut assembler = BlockAssembler::new(Box::new(Version5Codec));
        assert!(assembler.assemble(false)?.is_none());

        assembler.add_frame(frame(MpegVersion::V1, ChannelMode::Mono, 0));
        assert_eq!(assembler.assemble(false)?.unwrap().sample_count, 1152);

        let mut v2 = frame(MpegVersion::V2, ChannelMode::Stereo, 0);
        v2.gr[0].uncompressed = UncompressedOverride::silence(10, 2);
        assembler.add_frame(v2);
        let block = assembler.assemble(false)?.unwrap();
        assert_eq!(block.sample_count, 576);
        assert_eq!(block.sample_rate, 24000);
        assert_eq!(block.channels, 2);
        Ok(())
    }
}
