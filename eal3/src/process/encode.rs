//! Multi-input encode loop.
//!
//! Every input MP3 becomes one interleaved stream. Frames are emitted one
//! step late so the first frame of each stream can still receive the
//! encoder's lead-in samples, and so the block written when an input runs out
//! can be flagged as the last one.

use anyhow::Result;
use log::debug;

use crate::process::assemble::BlockAssembler;
use crate::process::codec::GranuleCodec;
use crate::process::decompose::FrameDecomposer;
use crate::structs::block::Block;
use crate::structs::granule::{ENCODER_UNCOMPRESSED_SAMPLES, Frame};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedBlock {
    pub block: Block,
    /// Set on the block produced when any input ran out of frames.
    pub last: bool,
}

#[derive(Debug)]
struct EncodeInput {
    decomposer: FrameDecomposer,
    previous: Option<Frame>,
}

#[derive(Debug)]
pub struct EncodeSession {
    inputs: Vec<EncodeInput>,
    assembler: BlockAssembler,
    first: bool,
    done: bool,
    blocks: usize,
}

impl EncodeSession {
    pub fn new(inputs: Vec<FrameDecomposer>, codec: Box<dyn GranuleCodec>) -> Self {
        Self {
            inputs: inputs
                .into_iter()
                .map(|decomposer| EncodeInput {
                    decomposer,
                    previous: None,
                })
                .collect(),
            assembler: BlockAssembler::new(codec),
            first: true,
            done: false,
            blocks: 0,
        }
    }

    pub fn set_fail_level(&mut self, level: log::Level) {
        for input in self.inputs.iter_mut() {
            input.decomposer.set_fail_level(level);
        }
    }

    pub fn codec_name(&self) -> &'static str {
        self.assembler.codec_name()
    }

    pub fn streams(&self) -> usize {
        self.inputs.len()
    }

    /// Blocks produced so far.
    pub fn blocks(&self) -> usize {
        self.blocks
    }

    /// MP3 bytes consumed per input.
    pub fn bytes_consumed(&self) -> Vec<usize> {
        self.inputs
            .iter()
            .map(|input| input.decomposer.bytes_consumed())
            .collect()
    }

    pub fn next_block(&mut self) -> Result<Option<EncodedBlock>> {
        while !self.done {
            let mut exhausted = false;
            let mut current = Vec::with_capacity(self.inputs.len());
            for input in self.inputs.iter_mut() {
                let frame = input.decomposer.next_audio_frame()?;
                exhausted |= frame.is_none();
                current.push(frame);
            }

            let mut emitted = false;
            for (input, frame) in self.inputs.iter_mut().zip(current) {
                if let Some(mut previous) = std::mem::replace(&mut input.previous, frame) {
                    if self.first {
                        previous.attach_lead_in(ENCODER_UNCOMPRESSED_SAMPLES);
                    }
                    self.assembler.add_frame(previous);
                    emitted = true;
                }
            }

            let first = self.first && emitted;
            let block = self.assembler.assemble(first)?;
            if first {
                self.first = false;
            }
            self.done = exhausted;

            if let Some(block) = block {
                self.blocks += 1;
                if exhausted {
                    debug!("Input exhausted after {} blocks", self.blocks);
                }
                return Ok(Some(EncodedBlock {
                    block,
                    last: exhausted,
                }));
            }
        }

        Ok(None)
    }
}

impl Iterator for EncodeSession {
    type Item = Result<EncodedBlock>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_block() {
            Ok(block) => block.map(Ok),
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::codec::tests::test_granule;
    use crate::process::codec::{Version5Codec, distribute_block};
    use crate::process::decompose::tests::synthesized_mp3;
    use crate::structs::granule::Granule;
    use crate::structs::mpeg::{ChannelMode, MpegVersion};

    fn mp3(mode: ChannelMode, frames: u8) -> Result<(Vec<u8>, Vec<Granule>)> {
        let granules: Vec<Granule> = (0..frames * 2)
            .map(|i| test_granule(MpegVersion::V1, mode, i % 2, i))
            .collect();
        Ok((synthesized_mp3(&granules)?, granules))
    }

    #[test]
    fn one_block_per_frame() -> Result<()> {
        let (data, granules) = mp3(ChannelMode::Stereo, 3)?;
        let session = EncodeSession::new(vec![FrameDecomposer::new(data)], Box::new(Version5Codec));
        let blocks = session.collect::<Result<Vec<_>>>()?;

        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[0].block.sample_count, 47);
        assert_eq!(blocks[1].block.sample_count, 1152);
        assert_eq!(
            blocks.iter().map(|b| b.last).collect::<Vec<_>>(),
            [false, false, true]
        );

        let mut streams = Vec::new();
        distribute_block(&Version5Codec, &blocks[0].block.data, &mut streams)?;
        let frame = &streams[0][0];
        assert_eq!(frame.gr[0], granules[0]);
        assert_eq!(frame.gr[1].uncompressed.count, 47);
        assert_eq!(frame.gr[1].uncompressed.samples.len(), 94);
        assert_eq!(frame.gr[1].channel_info, granules[1].channel_info);

        let mut streams = Vec::new();
        distribute_block(&Version5Codec, &blocks[2].block.data, &mut streams)?;
        assert_eq!(streams[0][0].gr[1], granules[5]);
        Ok(())
    }

    #[test]
    fn inputs_are_interleaved() -> Result<()> {
        let (stereo, _) = mp3(ChannelMode::Stereo, 2)?;
        let (mono, _) = mp3(ChannelMode::Mono, 2)?;
        let mut session = EncodeSession::new(
            vec![FrameDecomposer::new(stereo), FrameDecomposer::new(mono)],
            Box::new(Version5Codec),
        );
        assert_eq!(session.streams(), 2);

        let first = session.next_block()?.unwrap();
        assert_eq!(first.block.channels, 3);
        assert!(!first.last);

        let mut streams = Vec::new();
        distribute_block(&Version5Codec, &first.block.data, &mut streams)?;
        assert_eq!(streams.len(), 2);
        assert!(streams.iter().all(|s| s[0].gr[1].uncompressed.count == 47));

        let second = session.next_block()?.unwrap();
        assert!(second.last);
        assert_eq!(second.block.sample_count, 1152);
        assert!(session.next_block()?.is_none());
        assert_eq!(session.blocks(), 2);
        Ok(())
    }
}
