//! Blocks with an 8-byte header each and no stream header.

use std::io::Write;

use anyhow::Result;
use eal3d_macros::{FromBytes, ToBytes};
use log::debug;

use super::{BlockLoader, BlockWriter, payload, size_field};
use crate::byteorder::{ReadBytesBe, WriteBytesBe};
use eal3::process::codec::CodecKind;
use eal3::structs::block::{BLOCK_FLAG_LAST, Block};

pub const BLOCK_HEADER_SIZE: usize = 8;

/// Blocks checked before the layout is accepted.
const PROBE_BLOCKS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ToBytes, FromBytes)]
pub struct BlockHeader {
    pub flags: u16,
    /// Payload size plus the header.
    pub size: u16,
    pub samples: u32,
}

#[derive(Debug)]
pub struct HeaderlessLoader<'a> {
    data: &'a [u8],
    pos: usize,
    last: bool,
}

impl<'a> HeaderlessLoader<'a> {
    pub fn probe(data: &'a [u8], start: usize) -> Option<Self> {
        let mut src = data.get(start..)?;

        for _ in 0..PROBE_BLOCKS {
            let Some(header) = BlockHeader::read_be(&mut src) else {
                break;
            };
            if header.flags & BLOCK_FLAG_LAST != 0 {
                break;
            }
            if header.flags != 0 {
                debug!("Not headerless: block flags {:#06x}", header.flags);
                return None;
            }
            let Some(len) = (header.size as usize).checked_sub(BLOCK_HEADER_SIZE) else {
                debug!("Not headerless: block size {}", header.size);
                return None;
            };
            src = src.get(len..).unwrap_or_default();
        }

        Some(Self {
            data,
            pos: start,
            last: false,
        })
    }
}

impl BlockLoader for HeaderlessLoader<'_> {
    fn name(&self) -> &'static str {
        "Headerless"
    }

    fn codec(&self) -> Option<CodecKind> {
        None
    }

    fn next_block(&mut self) -> Result<Option<Block>> {
        if self.last {
            return Ok(None);
        }

        let offset = self.pos;
        let mut src = self.data.get(offset..).unwrap_or_default();
        let Some(header) = BlockHeader::read_be(&mut src) else {
            return Ok(None);
        };
        self.pos += BLOCK_HEADER_SIZE;
        self.last = header.flags & BLOCK_FLAG_LAST != 0;

        if header.size as usize <= BLOCK_HEADER_SIZE {
            self.last = true;
            return Ok(None);
        }

        let len = header.size as usize - BLOCK_HEADER_SIZE;
        let data = payload(src, len, offset)?.to_vec();
        self.pos += len;

        Ok(Some(Block {
            data,
            sample_count: header.samples,
            flags: header.flags,
            offset: offset as u64,
            ..Default::default()
        }))
    }

    fn position(&self) -> usize {
        self.pos
    }
}

#[derive(Debug, Default)]
pub struct HeaderlessWriter;

impl BlockWriter for HeaderlessWriter {
    fn write_block(&mut self, out: &mut dyn Write, block: &Block, last: bool) -> Result<()> {
        let header = BlockHeader {
            flags: if last { BLOCK_FLAG_LAST } else { 0 },
            size: size_field(block.size() + BLOCK_HEADER_SIZE, "Block")?,
            samples: block.sample_count,
        };

        let mut bytes = Vec::with_capacity(BLOCK_HEADER_SIZE + block.size());
        header.write_be(&mut bytes);
        bytes.extend_from_slice(&block.data);
        out.write_all(&bytes)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_until_last_flag() -> Result<()> {
        let mut out = Vec::new();
        let mut writer = HeaderlessWriter;
        writer.write_block(&mut out, &Block::new(vec![1, 2, 3], 47), false)?;
        writer.write_block(&mut out, &Block::new(vec![4], 1152), true)?;
        assert_eq!(&out[..8], &[0x00, 0x00, 0x00, 0x0B, 0x00, 0x00, 0x00, 0x2F]);

        // a second part follows the last block
        out.extend_from_slice(&[0xAA; 12]);

        let mut loader = HeaderlessLoader::probe(&out, 0).unwrap();
        let first = loader.next_block()?.unwrap();
        assert_eq!(first.data, [1, 2, 3]);
        assert_eq!(first.sample_count, 47);
        assert!(!first.is_last());

        let second = loader.next_block()?.unwrap();
        assert_eq!(second.offset, 11);
        assert!(second.is_last());
        assert!(loader.next_block()?.is_none());
        assert_eq!(loader.position(), 20);
        Ok(())
    }

    #[test]
    fn probe_rejects_bad_headers() {
        let bad_flags = [0x00, 0x01, 0x00, 0x10, 0, 0, 0, 0];
        assert!(HeaderlessLoader::probe(&bad_flags, 0).is_none());

        let too_small = [0x00, 0x00, 0x00, 0x04, 0, 0, 0, 0];
        assert!(HeaderlessLoader::probe(&too_small, 0).is_none());
    }

    #[test]
    fn truncated_payload() {
        let data = [0x80, 0x00, 0x00, 0x10, 0, 0, 0, 0, 1, 2];
        let mut loader = HeaderlessLoader::probe(&data, 0).unwrap();
        assert!(loader.next_block().is_err());
    }
}
