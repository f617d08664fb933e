//! One stream header followed by a single block holding the whole stream.
//!
//! ## Layout
//!
//! | Field            | Size | Notes                                         |
//! |------------------|------|-----------------------------------------------|
//! | compression      | 1    | 5 = Version5, 6 and 7 = Version6/7            |
//! | channel value    | 1    | `(channels - 1) * 4`                          |
//! | sample rate      | 2    |                                               |
//! | total samples    | 4    | `0x20000000` loop, `0x40000000` data elsewhere |
//! | starting samples | 4    | loops only                                    |
//! | block size       | 4    | payload plus 8                                |
//! | block samples    | 4    |                                               |
//!
//! The main part of a looped stream may follow as a second part with only
//! the block size and sample fields.

use std::io::Write;

use anyhow::{Result, bail};
use eal3d_macros::{FromBytes, ToBytes};
use log::debug;

use super::{
    BlockLoader, BlockWriter, channel_value, channels_from_value, payload, sample_rate_field,
    size_field,
};
use crate::byteorder::{ReadBytesBe, WriteBytesBe};
use eal3::process::codec::CodecKind;
use eal3::structs::block::Block;

pub const LOOP_FLAG: u32 = 0x2000_0000;
pub const SEPARATE_DATA_FLAG: u32 = 0x4000_0000;
const SAMPLES_MASK: u32 = 0x1FFF_FFFF;
const BLOCK_HEADER_SIZE: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ToBytes, FromBytes)]
pub struct StreamHeader {
    pub compression: u8,
    pub channel_value: u8,
    pub sample_rate: u16,
    pub total_samples: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ToBytes, FromBytes)]
pub struct BlockHeader {
    pub size: u32,
    pub samples: u32,
}

fn compression_codec(compression: u8) -> Option<CodecKind> {
    match compression {
        5 => Some(CodecKind::Version5),
        6 | 7 => Some(CodecKind::Version6),
        _ => None,
    }
}

/// Reads the stream header and, for loops, the starting part sample count.
fn read_stream_header(src: &mut &[u8]) -> Option<(StreamHeader, u32)> {
    let header = StreamHeader::read_be(src)?;
    let starting = if header.total_samples & LOOP_FLAG != 0 {
        u32::read_be(src)?
    } else {
        0
    };
    Some((header, starting))
}

#[derive(Debug)]
pub struct SingleBlockLoader<'a> {
    data: &'a [u8],
    pos: usize,
    compression: u8,
    main_part: bool,
    done: bool,
}

impl<'a> SingleBlockLoader<'a> {
    pub fn probe(data: &'a [u8], start: usize) -> Option<Self> {
        if start != 0 {
            if let Some(compression) = Self::probe_main_part(data, start) {
                debug!("Main part of a looped single block stream at offset {start}");
                return Some(Self {
                    data,
                    pos: start,
                    compression,
                    main_part: true,
                    done: false,
                });
            }
        }

        let mut src = data.get(start..)?;
        let (header, starting) = read_stream_header(&mut src)?;
        let total = header.total_samples & SAMPLES_MASK;
        let block = BlockHeader::read_be(&mut src)?;

        if compression_codec(header.compression).is_none() {
            debug!("Not single block: compression {}", header.compression);
            return None;
        }
        if header.channel_value % 4 != 0 {
            debug!("Not single block: channel value {}", header.channel_value);
            return None;
        }
        if starting == 0 && total != block.samples {
            debug!("Not single block: {total} total samples, {} in the block", block.samples);
            return None;
        }
        if starting != 0 && starting != block.samples {
            debug!("Not single block: {starting} starting samples, {} in the block", block.samples);
            return None;
        }
        let fits = (block.size as usize)
            .checked_sub(BLOCK_HEADER_SIZE)
            .is_some_and(|len| len <= src.len());
        if !fits {
            debug!("Not single block: block size {}", block.size);
            return None;
        }

        Some(Self {
            data,
            pos: start,
            compression: header.compression,
            main_part: false,
            done: false,
        })
    }

    /// A looped stream stores its starting part first; the main part's block
    /// header follows with a sample count that adds up to the total.
    fn probe_main_part(data: &[u8], start: usize) -> Option<u8> {
        let mut src = data;
        let (header, starting) = read_stream_header(&mut src)?;
        if header.total_samples & LOOP_FLAG == 0 {
            return None;
        }
        let total = header.total_samples & SAMPLES_MASK;

        let mut src = data.get(start..)?;
        let main = BlockHeader::read_be(&mut src)?.samples;
        (starting.checked_add(main) == Some(total)).then_some(header.compression)
    }
}

impl BlockLoader for SingleBlockLoader<'_> {
    fn name(&self) -> &'static str {
        "Single Block Header"
    }

    fn codec(&self) -> Option<CodecKind> {
        compression_codec(self.compression)
    }

    fn next_block(&mut self) -> Result<Option<Block>> {
        if self.done {
            return Ok(None);
        }
        self.done = true;

        let offset = self.pos;
        let mut src = self.data.get(offset..).unwrap_or_default();
        let (sample_rate, channels) = if self.main_part {
            (0, 0)
        } else {
            let Some((header, _)) = read_stream_header(&mut src) else {
                return Ok(None);
            };
            (
                u32::from(header.sample_rate),
                channels_from_value(header.channel_value),
            )
        };
        let Some(block) = BlockHeader::read_be(&mut src) else {
            return Ok(None);
        };
        let Some(len) = (block.size as usize).checked_sub(BLOCK_HEADER_SIZE) else {
            bail!("Block at offset {offset} has an invalid size {}", block.size);
        };

        let data = payload(src, len, offset)?.to_vec();
        self.pos = self.data.len() - src.len() + len;

        Ok(Some(Block {
            data,
            sample_count: block.samples,
            offset: offset as u64,
            sample_rate,
            channels,
            ..Default::default()
        }))
    }

    fn position(&self) -> usize {
        self.pos
    }
}

#[derive(Debug)]
pub struct SingleBlockWriter {
    compression: u8,
    looped: bool,
}

impl SingleBlockWriter {
    pub fn new(codec: CodecKind, looped: bool) -> Result<Self> {
        let compression = match codec {
            CodecKind::Version5 => 5,
            CodecKind::Version6 => 6,
            CodecKind::Scx => bail!("The single block layout cannot hold SCx data"),
        };
        Ok(Self {
            compression,
            looped,
        })
    }

    fn stream_header(&self, block: &Block, flags: u32) -> Result<Vec<u8>> {
        if block.sample_count & !SAMPLES_MASK != 0 {
            bail!(
                "{} samples do not fit the single block header",
                block.sample_count
            );
        }
        let loop_flag = if self.looped { LOOP_FLAG } else { 0 };
        let header = StreamHeader {
            compression: self.compression,
            channel_value: channel_value(block.channels)?,
            sample_rate: sample_rate_field(block.sample_rate)?,
            total_samples: block.sample_count | flags | loop_flag,
        };

        let mut bytes = Vec::new();
        header.write_be(&mut bytes);
        Ok(bytes)
    }

    /// The header of a stream whose block data is stored in another file.
    pub fn write_header(&self, out: &mut dyn Write, block: &Block) -> Result<()> {
        let mut bytes = self.stream_header(block, SEPARATE_DATA_FLAG)?;
        if self.looped {
            bytes.extend_from_slice(&[0; 8]);
        }
        out.write_all(&bytes)?;
        Ok(())
    }
}

impl BlockWriter for SingleBlockWriter {
    fn write_block(&mut self, out: &mut dyn Write, block: &Block, _last: bool) -> Result<()> {
        let mut bytes = self.stream_header(block, 0)?;
        if self.looped {
            // no starting part
            0u32.write_be(&mut bytes);
        }
        BlockHeader {
            size: size_field(block.size() + BLOCK_HEADER_SIZE, "Block")?,
            samples: block.sample_count,
        }
        .write_be(&mut bytes);
        bytes.extend_from_slice(&block.data);
        out.write_all(&bytes)?;
        Ok(())
    }
}
