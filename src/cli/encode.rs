use std::ffi::OsString;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result, bail};
use indicatif::{MultiProgress, ProgressBar};
use log::{info, warn};

use super::command::{Cli, ContainerFormat, EncodeArgs};
use super::fail_level;
use super::progress::create_progress_bar;
use crate::container::BlockWriter;
use crate::container::header_b::HeaderBWriter;
use crate::container::headerless::HeaderlessWriter;
use crate::container::single_block::SingleBlockWriter;
use crate::input::InputReader;
use crate::timestamp::duration_str;
use eal3::process::decompose::FrameDecomposer;
use eal3::process::encode::EncodeSession;
use eal3::structs::block::Block;

/// Totals of the blocks written so far. The stream parameters come from the
/// first block.
#[derive(Debug, Default)]
struct EncodeSummary {
    blocks: usize,
    bytes: usize,
    samples: u32,
    sample_rate: u32,
    channels: u32,
}

impl EncodeSummary {
    fn add(&mut self, block: &Block) -> Result<()> {
        if self.blocks == 0 {
            self.sample_rate = block.sample_rate;
            self.channels = block.channels;
        }
        self.blocks += 1;
        self.bytes += block.size();
        self.samples = self
            .samples
            .checked_add(block.sample_count)
            .context("Too many samples for one EAL3 stream")?;
        Ok(())
    }

    /// A header-only block describing the whole stream.
    fn stream_block(&self) -> Block {
        Block {
            sample_count: self.samples,
            sample_rate: self.sample_rate,
            channels: self.channels,
            ..Default::default()
        }
    }
}

fn header_path(output: &Path) -> PathBuf {
    let mut name = OsString::from(output.as_os_str());
    name.push(".header");
    PathBuf::from(name)
}

fn create_output(path: &Path) -> Result<BufWriter<File>> {
    let file = File::create(path)
        .with_context(|| format!("Could not open output file '{}'", path.display()))?;
    Ok(BufWriter::new(file))
}

/// Writes every block of the session through `writer`.
fn write_blocks(
    session: &mut EncodeSession,
    writer: &mut dyn BlockWriter,
    out: &mut dyn Write,
    pb: Option<&ProgressBar>,
) -> Result<EncodeSummary> {
    let mut summary = EncodeSummary::default();
    while let Some(encoded) = session.next_block()? {
        writer.write_block(out, &encoded.block, encoded.last)?;
        summary.add(&encoded.block)?;

        if let Some(pb) = pb {
            pb.set_position(session.bytes_consumed().iter().sum::<usize>() as u64);
        }
    }
    Ok(summary)
}

/// Joins all blocks of the session into a single block.
fn concatenate(session: &mut EncodeSession, pb: Option<&ProgressBar>) -> Result<(Block, EncodeSummary)> {
    let mut summary = EncodeSummary::default();
    let mut data = Vec::new();
    while let Some(encoded) = session.next_block()? {
        data.extend_from_slice(&encoded.block.data);
        summary.add(&encoded.block)?;

        if let Some(pb) = pb {
            pb.set_position(session.bytes_consumed().iter().sum::<usize>() as u64);
        }
    }

    let block = Block {
        data,
        ..summary.stream_block()
    };
    Ok((block, summary))
}

pub fn cmd_encode(args: &EncodeArgs, cli: &Cli, multi: Option<&MultiProgress>) -> Result<()> {
    let codec = args.codec.codec();
    info!(
        "Encoding {} MP3 stream(s) (strict mode: {}, container: {:?}, {})",
        args.inputs.len(),
        cli.strict,
        args.container,
        codec.name()
    );
    if args.looped && matches!(args.container, ContainerFormat::Headerless | ContainerFormat::HeaderB) {
        warn!("--loop only applies to the single-block and split layouts");
    }

    let level = fail_level(cli);
    let mut decomposers = Vec::with_capacity(args.inputs.len());
    let mut total_bytes = 0;
    for path in &args.inputs {
        let mut input = InputReader::new(path)?;
        if input.is_pipe() && args.output_path.is_none() {
            bail!("An output path is required when reading from stdin");
        }
        let data = input.read_all()?;
        total_bytes += data.len();

        let mut decomposer = FrameDecomposer::new(data);
        decomposer.set_fail_level(level);
        decomposers.push(decomposer);
    }

    let output = match &args.output_path {
        Some(path) => path.clone(),
        None => args.inputs[0].with_extension("ealayer3"),
    };

    let mut session = EncodeSession::new(decomposers, codec.create());
    session.set_fail_level(level);

    let pb = multi
        .map(|m| create_progress_bar(m, total_bytes as u64, "encoding"))
        .transpose()?;
    let started = Instant::now();

    let mut out = create_output(&output)?;
    let summary = match args.container {
        ContainerFormat::Headerless => {
            write_blocks(&mut session, &mut HeaderlessWriter, &mut out, pb.as_ref())?
        }
        ContainerFormat::HeaderB => {
            let mut writer = HeaderBWriter::new(codec)?;
            write_blocks(&mut session, &mut writer, &mut out, pb.as_ref())?
        }
        ContainerFormat::SingleBlock => {
            let (block, summary) = concatenate(&mut session, pb.as_ref())?;
            if summary.blocks > 0 {
                SingleBlockWriter::new(codec, args.looped)?.write_block(&mut out, &block, true)?;
            }
            summary
        }
        ContainerFormat::Split => {
            let summary = write_blocks(&mut session, &mut HeaderlessWriter, &mut out, pb.as_ref())?;
            if summary.blocks > 0 {
                let path = header_path(&output);
                let mut header = create_output(&path)?;
                SingleBlockWriter::new(codec, args.looped)?
                    .write_header(&mut header, &summary.stream_block())?;
                header.flush()?;
                info!("Header file: {}", path.display());
            }
            summary
        }
    };
    out.flush()?;

    if let Some(pb) = pb {
        pb.finish_and_clear();
    }
    if summary.blocks == 0 {
        bail!("No MPEG Layer III frames were found in the input");
    }

    info!(
        "Output file: {} ({} blocks, {} bytes, {} channel(s) at {} Hz, {})",
        output.display(),
        summary.blocks,
        summary.bytes,
        summary.channels,
        summary.sample_rate,
        duration_str(u64::from(summary.samples), summary.sample_rate)
    );
    info!(
        "Encoded in {:.3}s",
        started.elapsed().as_secs_f64()
    );
    Ok(())
}
