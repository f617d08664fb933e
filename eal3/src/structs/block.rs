//! EAL3 blocks.
//!
//! A block is the payload of one container chunk: a run of granules for one or
//! more interleaved streams. Containers add their own framing (flags, size and
//! sample count fields) around [`Block::data`].

/// Flag bit marking the final block of a headerless stream.
pub const BLOCK_FLAG_LAST: u16 = 0x8000;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Block {
    pub data: Vec<u8>,
    /// Sample frames this block contributes to the decoded output.
    pub sample_count: u32,
    pub flags: u16,
    /// Byte offset of the block in its container, for diagnostics.
    pub offset: u64,
    /// Sample rate of the granules, set by the block assembler.
    pub sample_rate: u32,
    /// Channels summed over all interleaved streams, set by the block assembler.
    pub channels: u32,
}

impl Block {
    pub fn new(data: Vec<u8>, sample_count: u32) -> Self {
        Self {
            data,
            sample_count,
            ..Default::default()
        }
    }

    #[inline(always)]
    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn is_last(&self) -> bool {
        self.flags & BLOCK_FLAG_LAST != 0
    }
}
