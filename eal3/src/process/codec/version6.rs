//! EAL3 versions 6 and 7.
//!
//! Each granule starts with a size header so a reader can skip it without
//! parsing the MPEG part:
//!
//! | Field            | Bits | Present            |
//! |------------------|------|--------------------|
//! | has second part  | 1    | always             |
//! | unknown          | 1    | always             |
//! | unused           | 2    | always             |
//! | total size       | 12   | always             |
//! | mode             | 2    | has second part    |
//! | samples offset   | 10   | has second part    |
//! | samples count    | 10   | has second part    |
//! | MPEG size        | 10   | has second part    |
//!
//! Without the second part the MPEG size is the total size minus the 2-byte
//! header. Uncompressed samples follow the byte-aligned MPEG part.

use anyhow::{Result, bail};
use log::Level::Info;

use crate::log_or_err;
use crate::process::codec::{
    GranuleCodec, check_room, mpeg_granule_bits, read_mpeg_granule, read_uncompressed_samples,
    uncompressed_bits, write_mpeg_granule, write_uncompressed_samples,
};
use crate::structs::granule::Granule;
use crate::structs::mpeg::SAMPLES_PER_GRANULE;
use crate::utils::bitstream::{SliceBitStream, SliceBitStreamMut};
use crate::utils::errors::FormatError;

const SHORT_HEADER_SIZE: u32 = 2;
const LONG_HEADER_SIZE: u32 = 6;
const MAX_TEN_BITS: u32 = 0x3FF;
const MAX_TOTAL_SIZE: u32 = 0xFFF;

#[derive(Debug, Clone, Copy)]
pub struct Version6Codec {
    fail_level: log::Level,
}

impl Default for Version6Codec {
    fn default() -> Self {
        Self {
            fail_level: log::Level::Error,
        }
    }
}

struct GranuleHeader {
    header_size: u32,
    total_size: u32,
    mode: u8,
    samples_offset: u32,
    samples_count: u32,
    mpeg_size: u32,
}

impl Version6Codec {
    fn read_header(&self, bs: &mut SliceBitStream) -> Result<GranuleHeader> {
        let has_second_part = bs.read_bit();
        let _unknown = bs.read_bit();
        bs.read_bits(2);
        let total_size = bs.read_bits(12);

        let header = if has_second_part {
            if total_size > 0 && total_size < LONG_HEADER_SIZE {
                bail!(FormatError::TotalSizeTooSmall(total_size));
            }
            GranuleHeader {
                header_size: LONG_HEADER_SIZE,
                total_size,
                mode: bs.read_bits(2) as u8,
                samples_offset: bs.read_bits(10),
                samples_count: bs.read_bits(10),
                mpeg_size: bs.read_bits(10),
            }
        } else {
            if total_size > 0 && total_size < SHORT_HEADER_SIZE {
                bail!(FormatError::TotalSizeTooSmall(total_size));
            }
            GranuleHeader {
                header_size: SHORT_HEADER_SIZE,
                total_size,
                mode: 0,
                samples_offset: 0,
                samples_count: 0,
                mpeg_size: total_size.saturating_sub(SHORT_HEADER_SIZE),
            }
        };

        if header.samples_offset > SAMPLES_PER_GRANULE {
            bail!(FormatError::InvalidUncompressedOffset(header.samples_offset));
        }
        match header.mode {
            0 => {}
            3 => bail!(FormatError::InvalidMode(header.mode)),
            mode => log_or_err!(self, Info, FormatError::UnusualMode(mode)),
        }

        Ok(header)
    }
}

impl GranuleCodec for Version6Codec {
    fn name(&self) -> &'static str {
        "EAL3 ver. 6 and 7"
    }

    fn set_fail_level(&mut self, level: log::Level) {
        self.fail_level = level;
    }

    fn read_granule(&self, bs: &mut SliceBitStream) -> Result<Option<Granule>> {
        if bs.eos() || bs.bits_remaining() < 16 {
            return Ok(None);
        }

        let start = bs.tell();
        let header = self.read_header(bs)?;
        if header.total_size == 0 || header.mpeg_size == 0 {
            return Ok(None);
        }

        let mpeg_start = bs.tell();
        let Some(mut gr) = read_mpeg_granule(bs)? else {
            return Ok(None);
        };
        bs.seek_to_next_byte();

        let declared = u64::from(header.mpeg_size) * 8;
        let actual = bs.tell() - mpeg_start;
        if declared != actual {
            bail!(FormatError::GranuleSizeMismatch { declared, actual });
        }

        if header.samples_count > 0 {
            bs.seek_absolute(start + u64::from(header.mpeg_size + header.header_size) * 8);
            read_uncompressed_samples(bs, &mut gr, header.samples_count, header.samples_offset)?;
        }

        let total = u64::from(header.total_size) * 8;
        let consumed = bs.tell() - start;
        if total < consumed {
            bail!(FormatError::TotalSizeNotBigEnough { total, consumed });
        }
        if start + total > bs.len_bits() {
            bail!(FormatError::TotalSizePastEnd);
        }
        bs.seek_absolute(start + total);

        Ok(Some(gr))
    }

    fn write_granule(&self, bs: &mut SliceBitStreamMut, gr: &Granule) -> Result<()> {
        let unc = &gr.uncompressed;
        let has_second_part = !unc.is_empty();
        let header_size = if has_second_part {
            LONG_HEADER_SIZE
        } else {
            SHORT_HEADER_SIZE
        };

        let mpeg_size = mpeg_granule_bits(gr).div_ceil(8) as u32;
        let samples_size = (uncompressed_bits(gr) / 8) as u32;
        let total_size = header_size + mpeg_size + samples_size;

        if total_size > MAX_TOTAL_SIZE {
            bail!(FormatError::FieldOverflow {
                field: "total size",
                value: total_size,
            });
        }
        if has_second_part {
            for (field, value) in [
                ("samples offset", unc.offset),
                ("samples count", unc.count),
                ("MPEG size", mpeg_size),
            ] {
                if value > MAX_TEN_BITS {
                    bail!(FormatError::FieldOverflow { field, value });
                }
            }
            if unc.offset > SAMPLES_PER_GRANULE {
                bail!(FormatError::InvalidUncompressedOffset(unc.offset));
            }
        }
        check_room(bs, u64::from(total_size) * 8 + 7)?;

        bs.write_to_next_byte();
        bs.write_bit(has_second_part);
        bs.write_bit(false);
        bs.write_bits(0, 2);
        bs.write_bits(total_size, 12);
        if has_second_part {
            bs.write_bits(0, 2);
            bs.write_bits(unc.offset, 10);
            bs.write_bits(unc.count, 10);
            bs.write_bits(mpeg_size, 10);
        }

        write_mpeg_granule(bs, gr)?;
        bs.write_to_next_byte();

        if has_second_part {
            write_uncompressed_samples(bs, gr)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::codec::tests::{encode_block, test_granule};
    use crate::structs::granule::UncompressedOverride;
    use crate::structs::mpeg::{ChannelMode, MpegVersion};
    use crate::utils::bitstream::BitStream;

    #[test]
    fn compact_and_long_headers() -> Result<()> {
        let codec = Version6Codec::default();
        let plain = test_granule(MpegVersion::V1, ChannelMode::Mono, 0, 4);
        let mut with_samples = test_granule(MpegVersion::V1, ChannelMode::Mono, 1, 5);
        with_samples.uncompressed = UncompressedOverride {
            count: 4,
            offset: 100,
            samples: vec![7, 8, 9, 10],
        };

        let data = encode_block(&codec, &[plain.clone(), with_samples.clone()])?;
        // 9 + 59 + 41 bits of MPEG granule round up to 14 bytes
        assert_eq!(data[0] & 0x80, 0);
        assert_eq!(u16::from_be_bytes([data[0], data[1]]) & 0xFFF, 16);
        assert_eq!(data[16] & 0x80, 0x80);

        let mut bs = BitStream::new(&data[..]);
        assert_eq!(codec.read_granule(&mut bs)?, Some(plain));
        assert_eq!(codec.read_granule(&mut bs)?, Some(with_samples));
        assert!(bs.eos());
        assert_eq!(codec.read_granule(&mut bs)?, None);
        Ok(())
    }

    #[test]
    fn zero_total_ends_block() -> Result<()> {
        let data = [0x00, 0x00, 0xFF, 0xFF];
        let mut bs = BitStream::new(&data[..]);
        assert_eq!(Version6Codec::default().read_granule(&mut bs)?, None);
        Ok(())
    }

    #[test]
    fn header_checks() {
        let codec = Version6Codec::default();

        // long header with total 3
        let mut bs = BitStream::new(&[0x80, 0x03, 0, 0, 0, 0][..]);
        let err = codec.read_granule(&mut bs).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<FormatError>(),
            Some(FormatError::TotalSizeTooSmall(3))
        ));

        // mode 3
        let mut bs = BitStream::new(&[0x80, 0x10, 0xC0, 0, 0, 0][..]);
        let err = codec.read_granule(&mut bs).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<FormatError>(),
            Some(FormatError::InvalidMode(3))
        ));

        // samples offset 577
        let mut bs = BitStream::new(&[0x80, 0x10, 0x24, 0x10, 0, 0][..]);
        let err = codec.read_granule(&mut bs).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<FormatError>(),
            Some(FormatError::InvalidUncompressedOffset(577))
        ));
    }

    #[test]
    fn unusual_mode_fails_only_when_strict() -> Result<()> {
        let gr = test_granule(MpegVersion::V2, ChannelMode::Mono, 0, 2);
        let mut gr_with_samples = gr.clone();
        gr_with_samples.uncompressed = UncompressedOverride::silence(1, 1);

        let mut data = encode_block(&Version6Codec::default(), &[gr_with_samples])?;
        // mode 1
        data[2] |= 0x40;

        let mut codec = Version6Codec::default();
        assert!(codec.read_granule(&mut BitStream::new(&data[..]))?.is_some());

        codec.set_fail_level(log::Level::Info);
        let err = codec.read_granule(&mut BitStream::new(&data[..])).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<FormatError>(),
            Some(FormatError::UnusualMode(1))
        ));
        Ok(())
    }

    #[test]
    fn size_mismatch_is_rejected() -> Result<()> {
        let gr = test_granule(MpegVersion::V1, ChannelMode::Mono, 0, 4);
        let mut data = encode_block(&Version6Codec::default(), &[gr])?;
        data.push(0);
        // declare one byte more than the MPEG part uses
        data[1] += 1;

        let err = Version6Codec::default()
            .read_granule(&mut BitStream::new(&data[..]))
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<FormatError>(),
            Some(FormatError::GranuleSizeMismatch { .. })
        ));
        Ok(())
    }
}
