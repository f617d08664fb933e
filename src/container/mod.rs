//! EAL3 container layouts.
//!
//! A container splits an EAL3 stream into blocks and may carry a stream
//! header with the compression variant, channel count and sample rate.
//! [`open`] tries the layouts in the order ASF GSTR, ASF PT, single block,
//! header B, headerless; the headerless probe accepts almost anything and
//! comes last.

use std::io::Write;

use anyhow::{Result, anyhow, bail};
use log::debug;

use eal3::process::codec::CodecKind;
use eal3::structs::block::Block;

pub mod asf_gstr;
pub mod asf_pt;
pub mod header_b;
pub mod headerless;
pub mod scx;
pub mod single_block;

use header_b::HeaderBLoader;
use headerless::HeaderlessLoader;
use single_block::SingleBlockLoader;

pub trait BlockLoader {
    fn name(&self) -> &'static str;

    /// Codec named by the container header, `None` when it has to be
    /// detected from the data.
    fn codec(&self) -> Option<CodecKind>;

    /// `None` at the end of the part.
    fn next_block(&mut self) -> Result<Option<Block>>;

    /// Byte offset just past everything read so far.
    fn position(&self) -> usize;
}

pub trait BlockWriter {
    fn write_block(&mut self, out: &mut dyn Write, block: &Block, last: bool) -> Result<()>;
}

pub fn open(data: &[u8], start: usize) -> Option<Box<dyn BlockLoader + '_>> {
    if let Some(loader) = asf_gstr::probe(data, start) {
        debug!("ASF GSTR container at offset {start}");
        return Some(Box::new(loader));
    }
    if let Some(loader) = asf_pt::probe(data, start) {
        debug!("ASF PT container at offset {start}");
        return Some(Box::new(loader));
    }
    if let Some(loader) = SingleBlockLoader::probe(data, start) {
        debug!("Single block container at offset {start}");
        return Some(Box::new(loader));
    }
    if let Some(loader) = HeaderBLoader::probe(data, start) {
        debug!("Header B container at offset {start}");
        return Some(Box::new(loader));
    }
    if let Some(loader) = HeaderlessLoader::probe(data, start) {
        debug!("Headerless container at offset {start}");
        return Some(Box::new(loader));
    }
    None
}

/// Converts a length into a fixed-width size field.
pub(crate) fn size_field<T: TryFrom<usize>>(len: usize, what: &str) -> Result<T> {
    T::try_from(len).map_err(|_| anyhow!("{what} of {len} bytes does not fit its size field"))
}

/// The `(channels - 1) * 4` byte used by the container headers.
pub(crate) fn channel_value(channels: u32) -> Result<u8> {
    if channels == 0 || channels > 64 {
        bail!("Cannot store {channels} channels in a container header");
    }
    Ok(((channels - 1) * 4) as u8)
}

pub(crate) fn channels_from_value(value: u8) -> u32 {
    u32::from(value / 4) + 1
}

pub(crate) fn sample_rate_field(sample_rate: u32) -> Result<u16> {
    size_field(sample_rate as usize, "Sample rate")
}

/// Slices `len` payload bytes off `src`.
pub(crate) fn payload<'a>(src: &'a [u8], len: usize, offset: usize) -> Result<&'a [u8]> {
    src.get(..len).ok_or_else(|| {
        anyhow!(
            "Block at offset {offset} needs {len} bytes, only {} left",
            src.len()
        )
    })
}
