use anyhow::Result;
use indicatif::MultiProgress;
use serde::Serialize;

use super::command::{Cli, InfoArgs};
use super::decode::{DecodedPart, Parts};
use super::fail_level;
use super::progress::create_spinner;
use crate::input::InputReader;
use crate::timestamp::duration_str;
use eal3::structs::mpeg::bitrate_kbps;

#[derive(Debug, Serialize)]
struct InfoReport {
    input: String,
    size: usize,
    parts: Vec<PartInfo>,
}

#[derive(Debug, Serialize)]
struct PartInfo {
    offset: usize,
    size: usize,
    container: &'static str,
    codec: &'static str,
    blocks: usize,
    samples: u64,
    duration: String,
    uncompressed_samples: u64,
    streams: Vec<StreamInfo>,
}

#[derive(Debug, Serialize)]
struct StreamInfo {
    index: usize,
    mpeg_version: &'static str,
    sample_rate: u32,
    channels: usize,
    /// The Xing frame included.
    frames: usize,
    mp3_size: usize,
    min_bitrate_kbps: u32,
    max_bitrate_kbps: u32,
    /// Frames whose main data starts in the previous frame.
    reservoir_frames: usize,
}

impl PartInfo {
    fn from_part(part: &DecodedPart) -> Result<Self> {
        let synth = &part.synth;
        let mut streams = Vec::with_capacity(synth.stream_count());
        for index in 0..synth.stream_count() {
            let version = synth.version(index)?;
            let frames = synth.frames(index)?;
            let bitrates = frames
                .iter()
                .skip(1)
                .map(|frame| bitrate_kbps(version, frame.bitrate_index()));

            streams.push(StreamInfo {
                index: index + 1,
                mpeg_version: version.label(),
                sample_rate: synth.sample_rate(index)?,
                channels: synth.channels(index)?,
                frames: frames.len(),
                mp3_size: frames.iter().map(|frame| frame.size()).sum(),
                min_bitrate_kbps: bitrates.clone().min().unwrap_or_default(),
                max_bitrate_kbps: bitrates.max().unwrap_or_default(),
                reservoir_frames: frames
                    .iter()
                    .filter(|frame| frame.used_from_previous() > 0)
                    .count(),
            });
        }

        let sample_rate = streams.first().map_or(0, |s| s.sample_rate);
        Ok(Self {
            offset: part.start,
            size: part.end - part.start,
            container: part.container,
            codec: part.codec.name(),
            blocks: part.blocks,
            samples: synth.sample_frames(),
            duration: duration_str(synth.sample_frames(), sample_rate),
            uncompressed_samples: synth.uncompressed_sample_frames(),
            streams,
        })
    }
}

pub fn cmd_info(args: &InfoArgs, cli: &Cli, multi: Option<&MultiProgress>) -> Result<()> {
    log::info!("Analyzing EAL3 stream: {}", args.input.display());

    let data = InputReader::new(&args.input)?.read_all()?;
    let pb = multi
        .map(|m| create_spinner(m, "Analyzing blocks..."))
        .transpose()?;

    let mut report = InfoReport {
        input: args.input.display().to_string(),
        size: data.len(),
        parts: Vec::new(),
    };
    for part in Parts::new(&data, args.offset, args.parser, fail_level(cli), None)? {
        let part = part?;
        report.parts.push(PartInfo::from_part(&part)?);

        if let Some(ref pb) = pb {
            pb.set_message(format!("Analyzing blocks...       part {}", report.parts.len()));
        }
    }

    if let Some(pb) = pb {
        pb.finish_and_clear();
    }
    print!("{}", serde_yaml_ng::to_string(&report)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_is_yaml() -> Result<()> {
        let report = InfoReport {
            input: "music.sph".to_string(),
            size: 100,
            parts: vec![PartInfo {
                offset: 0,
                size: 100,
                container: "Headerless",
                codec: "EAL3 ver. 5",
                blocks: 2,
                samples: 1199,
                duration: duration_str(1199, 44100),
                uncompressed_samples: 47,
                streams: Vec::new(),
            }],
        };

        let yaml = serde_yaml_ng::to_string(&report)?;
        assert!(yaml.contains("container: Headerless"));
        assert!(yaml.contains("00:00:00.027"));
        Ok(())
    }
}
