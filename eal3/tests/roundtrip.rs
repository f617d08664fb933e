use anyhow::Result;

use eal3::process::codec::{CodecKind, GranuleCodec, Version5Codec, Version6Codec};
use eal3::process::decompose::FrameDecomposer;
use eal3::process::encode::EncodeSession;
use eal3::process::synthesize::FrameSynthesizer;
use eal3::structs::block::Block;
use eal3::structs::granule::{ChannelInfo, Granule};
use eal3::structs::mpeg::{ChannelMode, MpegVersion};
use eal3::utils::bitstream::BitStream;

struct Lcg(u32);

impl Lcg {
    fn next(&mut self) -> u32 {
        self.0 = self.0.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
        self.0
    }
}

fn granule(rng: &mut Lcg, mode: ChannelMode, index: u8, large: bool) -> Granule {
    let channel_info: Vec<ChannelInfo> = (0..mode.channels())
        .map(|_| ChannelInfo {
            scfsi: if index == 1 { (rng.next() >> 28) as u8 } else { 0 },
            // a large stereo frame does not fit 320 kbps and borrows from its predecessor
            size: if large {
                1900 + (rng.next() % 400) as u16
            } else {
                (rng.next() % 400) as u16 + 1
            },
            side_info: [rng.next(), rng.next() & 0x7FFF],
        })
        .collect();
    let bits: u64 = channel_info.iter().map(|ci| u64::from(ci.size)).sum();

    let mut data: Vec<u8> = (0..bits.div_ceil(8)).map(|_| (rng.next() >> 24) as u8).collect();
    let pad = (8 - bits % 8) % 8;
    if let Some(last) = data.last_mut() {
        *last &= 0xFFu8 << pad;
    }

    Granule {
        used: true,
        version: MpegVersion::V1,
        sample_rate_index: 1,
        channel_mode: mode,
        mode_extension: if mode == ChannelMode::JointStereo { 2 } else { 0 },
        index,
        channel_info,
        data,
        ..Default::default()
    }
}

fn granules(seed: u32, mode: ChannelMode, frames: usize) -> Vec<Granule> {
    let mut rng = Lcg(seed);
    (0..frames * 2)
        .map(|i| granule(&mut rng, mode, (i % 2) as u8, i / 2 % 4 == 2))
        .collect()
}

fn write_block(codec: &dyn GranuleCodec, granules: &[Granule]) -> Result<Block> {
    let mut buf = vec![0u8; 64 * 1024];
    let mut bs = BitStream::new(&mut buf[..]);
    for gr in granules {
        codec.write_granule(&mut bs, gr)?;
    }
    bs.write_to_next_byte();
    let size = (bs.tell() >> 3) as usize;
    buf.truncate(size);
    Ok(Block::new(buf, 1152))
}

fn synthesize(kind: CodecKind, blocks: &[Block]) -> Result<FrameSynthesizer> {
    let mut synth = FrameSynthesizer::new(kind.create(), &blocks[0])?;
    for block in blocks {
        synth.push_block(block)?;
    }
    synth.finalize()?;
    Ok(synth)
}

fn mp3(synth: &FrameSynthesizer, stream: usize) -> Result<Vec<u8>> {
    Ok(synth.mpeg_stream(stream)?.flatten().collect())
}

#[test]
fn eal3_to_mp3_and_back() -> Result<()> {
    let source = granules(7, ChannelMode::JointStereo, 40);
    let blocks = source
        .chunks(8)
        .map(|chunk| write_block(&Version5Codec, chunk))
        .collect::<Result<Vec<_>>>()?;

    let synth = synthesize(CodecKind::Version5, &blocks)?;
    assert_eq!(synth.stream_count(), 1);
    assert_eq!(synth.frame_count(0)?, 41);
    let frames = synth.frames(0)?;
    assert!(frames.iter().any(|f| f.used_from_previous() > 0));
    let first = mp3(&synth, 0)?;

    let session = EncodeSession::new(
        vec![FrameDecomposer::new(first.clone())],
        Box::new(Version6Codec::default()),
    );
    let encoded = session.collect::<Result<Vec<_>>>()?;
    assert_eq!(encoded.len(), 40);
    assert!(encoded.last().is_some_and(|b| b.last));
    assert!(encoded.iter().rev().skip(1).all(|b| !b.last));

    let blocks: Vec<Block> = encoded.into_iter().map(|b| b.block).collect();
    let kind = CodecKind::detect(&blocks[0].data);
    assert_eq!(kind, Some(CodecKind::Version6));

    let again = synthesize(CodecKind::Version6, &blocks)?;
    assert_eq!(again.sample_frames(), 47 + 39 * 1152);
    assert_eq!(again.uncompressed_sample_frames(), 47);
    assert_eq!(again.uncompressed_samples(1, 1, 0)?.count, 47);
    assert!(again.uncompressed_samples(0, 1, 0)?.is_empty());
    assert_eq!(mp3(&again, 0)?, first);
    Ok(())
}

#[test]
fn interleaved_streams_survive_encoding() -> Result<()> {
    let stereo = granules(1, ChannelMode::Stereo, 12);
    let mono = granules(2, ChannelMode::Mono, 12);

    let mut originals = Vec::new();
    for source in [&stereo, &mono] {
        let block = write_block(&Version5Codec, source)?;
        originals.push(mp3(&synthesize(CodecKind::Version5, &[block])?, 0)?);
    }

    let session = EncodeSession::new(
        originals.iter().cloned().map(FrameDecomposer::new).collect(),
        Box::new(Version5Codec),
    );
    let blocks: Vec<Block> = session
        .map(|b| b.map(|b| b.block))
        .collect::<Result<_>>()?;
    assert_eq!(blocks.len(), 12);
    assert!(blocks.iter().all(|b| b.channels == 3));

    let synth = synthesize(CodecKind::Version5, &blocks)?;
    assert_eq!(synth.stream_count(), 2);
    assert_eq!(synth.channels(0)?, 2);
    assert_eq!(synth.channels(1)?, 1);
    assert_eq!(mp3(&synth, 0)?, originals[0]);
    assert_eq!(mp3(&synth, 1)?, originals[1]);
    Ok(())
}
