//! Chunked layout: a stream info chunk, audio chunks and an end chunk. Every
//! chunk starts with a 16-bit id and a 16-bit size that counts the 4 header
//! bytes.

use std::io::Write;

use anyhow::{Result, bail};
use eal3d_macros::{FromBytes, ToBytes, chunk_id};
use log::debug;

use super::{
    BlockLoader, BlockWriter, channel_value, channels_from_value, payload, sample_rate_field,
    size_field,
};
use crate::byteorder::{ReadBytesBe, WriteBytesBe};
use crate::join_bytes_be;
use eal3::process::codec::CodecKind;
use eal3::structs::block::Block;

pub const CHUNK_HEADER_SIZE: usize = 4;

const COMPRESSION_VERSION5: u8 = 0x15;
const COMPRESSION_VERSION6: u8 = 0x16;
const STREAM_INFO_FLAGS: u32 = 0x4000_0000;

pub trait Chunk: WriteBytesBe {
    const ID: u16;

    fn chunk_bytes(&self, payload: &[u8]) -> Result<Vec<u8>> {
        let mut fields = Vec::new();
        self.write_be(&mut fields);
        let size: u16 = size_field(CHUNK_HEADER_SIZE + fields.len() + payload.len(), "Chunk")?;

        let mut bytes = join_bytes_be!(Self::ID, size);
        bytes.extend(fields);
        bytes.extend_from_slice(payload);
        Ok(bytes)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes)]
struct ChunkHeader {
    id: u16,
    size: u16,
}

#[chunk_id(id = 0x4800)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, ToBytes, FromBytes)]
pub struct StreamInfo {
    pub compression: u8,
    pub channel_value: u8,
    pub sample_rate: u16,
    pub flags: u32,
}

#[chunk_id(id = 0x4400)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, ToBytes, FromBytes)]
pub struct AudioChunk {
    pub samples: u32,
}

#[chunk_id(id = 0x4500)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, ToBytes)]
pub struct EndChunk;

#[derive(Debug)]
pub struct HeaderBLoader<'a> {
    data: &'a [u8],
    pos: usize,
    codec: CodecKind,
    sample_rate: u32,
    channels: u32,
    done: bool,
}

impl<'a> HeaderBLoader<'a> {
    pub fn probe(data: &'a [u8], start: usize) -> Option<Self> {
        let mut src = data.get(start..)?;
        let header = ChunkHeader::read_be(&mut src)?;
        if header.id != StreamInfo::ID {
            return None;
        }
        // the flags word is not required
        if (header.size as usize) < CHUNK_HEADER_SIZE + 4 {
            debug!("Not header B: stream info size {}", header.size);
            return None;
        }

        let compression = u8::read_be(&mut src)?;
        let channel_value = u8::read_be(&mut src)?;
        let sample_rate = u16::read_be(&mut src)?;
        let codec = match compression {
            COMPRESSION_VERSION5 => CodecKind::Version5,
            COMPRESSION_VERSION6 => CodecKind::Version6,
            _ => {
                debug!("Not header B: compression {compression:#04x}");
                return None;
            }
        };

        Some(Self {
            data,
            pos: start + header.size as usize,
            codec,
            sample_rate: u32::from(sample_rate),
            channels: channels_from_value(channel_value),
            done: false,
        })
    }
}

impl BlockLoader for HeaderBLoader<'_> {
    fn name(&self) -> &'static str {
        "Header B"
    }

    fn codec(&self) -> Option<CodecKind> {
        Some(self.codec)
    }

    fn next_block(&mut self) -> Result<Option<Block>> {
        if self.done {
            return Ok(None);
        }

        let offset = self.pos;
        let mut src = self.data.get(offset..).unwrap_or_default();
        let Some(header) = ChunkHeader::read_be(&mut src) else {
            self.done = true;
            return Ok(None);
        };

        if header.id == EndChunk::ID {
            self.pos += CHUNK_HEADER_SIZE;
            self.done = true;
            return Ok(None);
        }
        if header.id != AudioChunk::ID {
            debug!("Unexpected chunk {:#06x} at offset {offset}", header.id);
            self.done = true;
            return Ok(None);
        }
        let Some(chunk) = AudioChunk::read_be(&mut src) else {
            self.done = true;
            return Ok(None);
        };
        let Some(len) = (header.size as usize).checked_sub(CHUNK_HEADER_SIZE + 4) else {
            bail!("Audio chunk at offset {offset} has an invalid size {}", header.size);
        };

        let data = payload(src, len, offset)?.to_vec();
        self.pos += header.size as usize;

        Ok(Some(Block {
            data,
            sample_count: chunk.samples,
            offset: offset as u64,
            sample_rate: self.sample_rate,
            channels: self.channels,
            ..Default::default()
        }))
    }

    fn position(&self) -> usize {
        self.pos
    }
}

#[derive(Debug)]
pub struct HeaderBWriter {
    compression: u8,
    wrote_info: bool,
}

impl HeaderBWriter {
    pub fn new(codec: CodecKind) -> Result<Self> {
        let compression = match codec {
            CodecKind::Version5 => COMPRESSION_VERSION5,
            CodecKind::Version6 => COMPRESSION_VERSION6,
            CodecKind::Scx => bail!("The header B layout cannot hold SCx data"),
        };
        Ok(Self {
            compression,
            wrote_info: false,
        })
    }
}

impl BlockWriter for HeaderBWriter {
    fn write_block(&mut self, out: &mut dyn Write, block: &Block, last: bool) -> Result<()> {
        if !self.wrote_info {
            let info = StreamInfo {
                compression: self.compression,
                channel_value: channel_value(block.channels)?,
                sample_rate: sample_rate_field(block.sample_rate)?,
                flags: STREAM_INFO_FLAGS,
            };
            out.write_all(&info.chunk_bytes(&[])?)?;
            self.wrote_info = true;
        }

        let chunk = AudioChunk {
            samples: block.sample_count,
        };
        out.write_all(&chunk.chunk_bytes(&block.data)?)?;

        if last {
            out.write_all(&EndChunk.chunk_bytes(&[])?)?;
        }
        Ok(())
    }
}
