use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result, bail};
use indicatif::{MultiProgress, ProgressBar};
use log::{Level, debug, info};

use super::command::{Cli, DecodeArgs, ParserChoice, StreamSelection};
use super::progress::create_progress_bar;
use super::{fail_level, output_name};
use crate::container;
use crate::input::InputReader;
use crate::timestamp::duration_str;
use eal3::process::codec::CodecKind;
use eal3::process::synthesize::FrameSynthesizer;

/// One container part turned into MPEG frames.
pub(crate) struct DecodedPart {
    pub container: &'static str,
    pub codec: CodecKind,
    pub blocks: usize,
    pub start: usize,
    /// Offset just past the part.
    pub end: usize,
    pub synth: FrameSynthesizer,
}

/// Reads every block of the container at `start` and finalizes the frames.
/// The codec named by `parser` wins over the container's, which wins over
/// detection from the first block.
pub(crate) fn decode_part(
    data: &[u8],
    start: usize,
    parser: ParserChoice,
    level: Level,
    pb: Option<&ProgressBar>,
) -> Result<DecodedPart> {
    let Some(mut loader) = container::open(data, start) else {
        bail!("No known container layout at offset {start}");
    };
    let Some(first) = loader.next_block()? else {
        bail!("{} container at offset {start} holds no blocks", loader.name());
    };

    let codec = match parser.codec().or_else(|| loader.codec()) {
        Some(codec) => codec,
        None => CodecKind::detect(&first.data)
            .with_context(|| format!("Unknown EAL3 block format at offset {start}"))?,
    };
    debug!(
        "Part at offset {start}: {} container, {}",
        loader.name(),
        codec.name()
    );

    let mut synth = FrameSynthesizer::new(codec.create(), &first)?;
    synth.set_fail_level(level);
    synth.push_block(&first)?;

    let mut blocks = 1;
    while let Some(block) = loader.next_block()? {
        synth.push_block(&block)?;
        blocks += 1;

        if let Some(pb) = pb {
            pb.set_position(loader.position() as u64);
        }
    }
    synth.finalize()?;

    Ok(DecodedPart {
        container: loader.name(),
        codec,
        blocks,
        start,
        end: loader.position(),
        synth,
    })
}

fn check_selection(part: &DecodedPart, selection: StreamSelection) -> Result<()> {
    let count = part.synth.stream_count();
    if let StreamSelection::Index(stream) = selection {
        if stream >= count {
            bail!(
                "Stream {} was requested, the part at offset {} has {count}",
                stream + 1,
                part.start
            );
        }
    }
    Ok(())
}

/// File name suffix of `stream` in part `part`, both counted from 0.
fn stream_suffix(selection: StreamSelection, stream: usize, streams: usize, part: usize) -> String {
    let single = matches!(selection, StreamSelection::Index(_)) || streams == 1;
    match (part, single) {
        (0, true) => String::new(),
        (0, false) => format!("_{}", stream + 1),
        (_, true) => format!("_part{}", part + 1),
        (_, false) => format!("_{}part{}", stream + 1, part + 1),
    }
}

/// The container parts of an input, one after another. An error in the
/// first part is returned; a later part that fails to decode ends the
/// sequence, since trailing data is not necessarily audio.
pub(crate) struct Parts<'a> {
    data: &'a [u8],
    pos: usize,
    index: usize,
    parser: ParserChoice,
    level: Level,
    pb: Option<&'a ProgressBar>,
    done: bool,
}

impl<'a> Parts<'a> {
    pub fn new(
        data: &'a [u8],
        start: usize,
        parser: ParserChoice,
        level: Level,
        pb: Option<&'a ProgressBar>,
    ) -> Result<Self> {
        if start >= data.len() {
            bail!(
                "Offset {start} is past the end of the input ({} bytes)",
                data.len()
            );
        }
        Ok(Self {
            data,
            pos: start,
            index: 0,
            parser,
            level,
            pb,
            done: false,
        })
    }
}

impl Iterator for Parts<'_> {
    type Item = Result<DecodedPart>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let part = match decode_part(self.data, self.pos, self.parser, self.level, self.pb) {
            Ok(part) => part,
            Err(e) if self.index > 0 => {
                debug!("Stopping at offset {}: {e:#}", self.pos);
                self.done = true;
                return None;
            }
            Err(e) => {
                self.done = true;
                return Some(Err(e));
            }
        };

        self.index += 1;
        self.done = part.end <= self.pos || part.end + 4 >= self.data.len();
        self.pos = part.end;
        Some(Ok(part))
    }
}

pub fn cmd_decode(args: &DecodeArgs, cli: &Cli, multi: Option<&MultiProgress>) -> Result<()> {
    info!(
        "Decoding EAL3 stream: {} (strict mode: {}, parser: {:?})",
        args.input.display(),
        cli.strict,
        args.parser
    );

    let mut input = InputReader::new(&args.input)?;
    let base = match &args.output_path {
        Some(path) => path.clone(),
        None if input.is_pipe() => bail!("An output path is required when reading from stdin"),
        None => args.input.with_extension("mp3"),
    };
    let data = input.read_all()?;

    let pb = multi
        .map(|m| create_progress_bar(m, data.len() as u64, "decoding"))
        .transpose()?;
    let started = Instant::now();

    let mut count = 0;
    let parts = Parts::new(&data, args.offset, args.parser, fail_level(cli), pb.as_ref())?;
    for (index, part) in parts.enumerate() {
        let part = part?;
        if let Err(e) = check_selection(&part, args.stream) {
            if index == 0 {
                return Err(e);
            }
            debug!("Stopping at offset {}: {e}", part.start);
            break;
        }

        info!(
            "Part {}: {} container, {}, {} blocks, {} stream(s)",
            index + 1,
            part.container,
            part.codec.name(),
            part.blocks,
            part.synth.stream_count()
        );
        write_part(&part, &base, index, args.stream)?;
        count += 1;
    }

    if let Some(pb) = pb {
        pb.finish_and_clear();
    }
    info!(
        "Decoded {count} part(s) in {:.3}s",
        started.elapsed().as_secs_f64()
    );
    Ok(())
}

fn write_part(
    part: &DecodedPart,
    base: &Path,
    index: usize,
    selection: StreamSelection,
) -> Result<()> {
    let streams = part.synth.stream_count();
    let selected: Vec<usize> = match selection {
        StreamSelection::All => (0..streams).collect(),
        StreamSelection::Index(stream) => vec![stream],
    };

    for stream in selected {
        let suffix = stream_suffix(selection, stream, streams, index);
        write_stream(&part.synth, stream, &output_name(base, &suffix, "mp3"))?;
    }
    Ok(())
}

fn write_stream(synth: &FrameSynthesizer, stream: usize, path: &Path) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("Could not open output file '{}'", path.display()))?;
    let mut writer = BufWriter::new(file);

    let mut bytes = 0;
    for frame in synth.mpeg_stream(stream)? {
        writer.write_all(&frame)?;
        bytes += frame.len();
    }
    writer.flush()?;

    info!(
        "Output file: {} ({} frames, {bytes} bytes, {} at {} Hz)",
        path.display(),
        synth.frame_count(stream)?,
        duration_str(synth.sample_frames(), synth.sample_rate(stream)?),
        synth.sample_rate(stream)?
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::BlockWriter;
    use crate::container::headerless::HeaderlessWriter;
    use eal3::process::assemble::BlockAssembler;
    use eal3::structs::granule::{ChannelInfo, Frame, Granule};
    use eal3::structs::mpeg::{ChannelMode, MpegVersion};

    fn frame(size: u16) -> Frame {
        let mut frame = Frame::default();
        for (index, gr) in frame.gr.iter_mut().enumerate() {
            *gr = Granule {
                used: true,
                version: MpegVersion::V1,
                sample_rate_index: 0,
                channel_mode: ChannelMode::Mono,
                index: index as u8,
                channel_info: vec![ChannelInfo {
                    size,
                    ..Default::default()
                }],
                data: vec![0x5A; usize::from(size) / 8],
                ..Default::default()
            };
        }
        frame
    }

    /// Two headerless parts of three Version6 blocks each.
    fn two_parts() -> Result<Vec<u8>> {
        let mut out = Vec::new();
        for _ in 0..2 {
            let mut assembler = BlockAssembler::new(CodecKind::Version6.create());
            let mut writer = HeaderlessWriter;
            for i in 0..3 {
                assembler.add_frame(frame(64));
                let block = assembler.assemble(i == 0)?.context("no block")?;
                writer.write_block(&mut out, &block, i == 2)?;
            }
        }
        Ok(out)
    }

    #[test]
    fn parts_follow_each_other() -> Result<()> {
        let data = two_parts()?;
        let first = decode_part(&data, 0, ParserChoice::Auto, Level::Error, None)?;
        assert_eq!(first.container, "Headerless");
        assert_eq!(first.codec, CodecKind::Version6);
        assert_eq!(first.blocks, 3);
        assert_eq!(first.synth.stream_count(), 1);
        // Xing frame plus one per block
        assert_eq!(first.synth.frame_count(0)?, 4);
        assert_eq!(first.end * 2, data.len());

        let second = decode_part(&data, first.end, ParserChoice::V6, Level::Error, None)?;
        assert_eq!(second.end, data.len());
        Ok(())
    }

    #[test]
    fn parts_iterate_to_the_end() -> Result<()> {
        let mut data = two_parts()?;
        // trailing bytes that are no container
        data.extend_from_slice(&[0x12, 0x34, 0x56, 0x78, 0x9A, 0xBC]);

        let parts = Parts::new(&data, 0, ParserChoice::Auto, Level::Error, None)?
            .collect::<Result<Vec<_>>>()?;
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[1].start, parts[0].end);
        assert!(Parts::new(&data, data.len(), ParserChoice::Auto, Level::Error, None).is_err());
        Ok(())
    }

    #[test]
    fn stream_selection_is_checked() -> Result<()> {
        let data = two_parts()?;
        let part = decode_part(&data, 0, ParserChoice::Auto, Level::Error, None)?;
        assert!(check_selection(&part, StreamSelection::Index(0)).is_ok());
        assert!(check_selection(&part, StreamSelection::Index(1)).is_err());
        Ok(())
    }

    #[test]
    fn suffixes() {
        let all = StreamSelection::All;
        let one = StreamSelection::Index(2);
        assert_eq!(stream_suffix(all, 0, 1, 0), "");
        assert_eq!(stream_suffix(all, 1, 2, 0), "_2");
        assert_eq!(stream_suffix(all, 0, 1, 2), "_part3");
        assert_eq!(stream_suffix(all, 1, 3, 1), "_2part2");
        assert_eq!(stream_suffix(one, 2, 3, 0), "");
        assert_eq!(stream_suffix(one, 2, 3, 1), "_part2");
    }

    #[test]
    fn garbage_is_rejected() {
        let data = [0x12, 0x34, 0x00, 0x09, 0, 0, 0, 0, 0];
        assert!(decode_part(&data, 0, ParserChoice::Auto, Level::Error, None).is_err());
    }
}
