//! EAL3 granules inside SCx (`SCDl`) blocks.
//!
//! Same layout as version 5 except that the uncompressed sample header is a
//! 16-bit unknown word and a 16-bit count, and the flag byte of the first
//! granule must be zero. The flag of each later granule trails the previous
//! one, so a zero flag is left in place for the next read.

use anyhow::{Result, bail};

use crate::process::codec::{GranuleCodec, read_mpeg_granule, read_uncompressed_samples};
use crate::structs::granule::Granule;
use crate::utils::bitstream::SliceBitStream;
use crate::utils::errors::FormatError;

#[derive(Debug, Clone, Copy, Default)]
pub struct ScxCodec;

impl GranuleCodec for ScxCodec {
    fn name(&self) -> &'static str {
        "EAL3 for SCx blocks"
    }

    fn read_granule(&self, bs: &mut SliceBitStream) -> Result<Option<Granule>> {
        if bs.eos() || bs.bits_remaining() < 32 {
            return Ok(None);
        }

        if bs.read_bits(8) != 0 {
            bail!(FormatError::UnsupportedScxUncompressed);
        }

        let Some(mut gr) = read_mpeg_granule(bs)? else {
            return Ok(None);
        };
        bs.seek_to_next_byte();

        if !bs.eos() {
            if bs.read_bits(8) != 0 {
                let _unknown = bs.read_aligned16();
                let count = bs.read_aligned16();
                read_uncompressed_samples(bs, &mut gr, count.into(), 0)?;
            } else {
                bs.seek_relative(-8);
            }
        }

        Ok(Some(gr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::codec::tests::{encode_block, test_granule};
    use crate::process::codec::{Version5Codec, distribute_block};
    use crate::structs::mpeg::{ChannelMode, MpegVersion};
    use crate::utils::bitstream::BitStream;

    #[test]
    fn trailing_sample_block() -> Result<()> {
        let gr = test_granule(MpegVersion::V2, ChannelMode::Mono, 0, 3);
        let mut data = encode_block(&Version5Codec, &[gr.clone()])?;
        // flag, unknown word, count 2, samples
        data.extend_from_slice(&[0xEE, 0x12, 0x34, 0x00, 0x02, 0xFF, 0xFE, 0x00, 0x03]);
        data.extend_from_slice(&encode_block(&Version5Codec, &[gr.clone()])?);

        let mut bs = BitStream::new(&data[..]);
        let first = ScxCodec.read_granule(&mut bs)?.unwrap();
        assert_eq!(first.uncompressed.count, 2);
        assert_eq!(first.uncompressed.samples, vec![-2, 3]);

        let second = ScxCodec.read_granule(&mut bs)?.unwrap();
        assert_eq!(second, gr);
        Ok(())
    }

    #[test]
    fn zero_flag_belongs_to_next_granule() -> Result<()> {
        let granules: Vec<_> = (0..3)
            .map(|seed| test_granule(MpegVersion::V2, ChannelMode::Stereo, 0, seed))
            .collect();
        let data = encode_block(&Version5Codec, &granules)?;

        let mut streams = Vec::new();
        assert_eq!(distribute_block(&ScxCodec, &data, &mut streams)?, 3);
        assert_eq!(streams[0][2].gr[0], granules[2]);
        Ok(())
    }

    #[test]
    fn leading_flag_is_unsupported() {
        let data = [0xEE, 0, 0, 0, 0];
        let err = ScxCodec
            .read_granule(&mut BitStream::new(&data[..]))
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<FormatError>(),
            Some(FormatError::UnsupportedScxUncompressed)
        ));
        assert!(ScxCodec.write_granule(&mut BitStream::new(&mut [0u8; 4][..]), &Granule::default()).is_err());
    }
}
