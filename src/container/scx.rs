//! Chunked layout of the SCx family: `SCHl` stream header, `SCCl` block
//! count, `SCDl` data blocks, `SCEl` end marker. Chunk ids are ASCII and the
//! chunk size is a little-endian word counting the 8 header bytes; the
//! fields inside the chunks are big-endian.
//!
//! The stream header opens with a layout tag (see [`super::asf_gstr`] and
//! [`super::asf_pt`]) followed by a variable field list. Only split SCx
//! streams (`split` set, split compression `0x17`) are accepted.

use anyhow::Result;
use log::debug;

use super::BlockLoader;
use crate::byteorder::ReadBytesBe;
use eal3::process::codec::CodecKind;
use eal3::structs::block::Block;

pub const CHUNK_HEADER_SIZE: usize = 8;

pub const HEADER_CHUNK: &[u8; 4] = b"SCHl";
pub const COUNT_CHUNK: &[u8; 4] = b"SCCl";
pub const DATA_CHUNK: &[u8; 4] = b"SCDl";
pub const END_CHUNK: &[u8; 4] = b"SCEl";

/// Sample frames, a null word and an unknown word.
const DATA_CHUNK_FIELDS: usize = 12;
const SPLIT_COMPRESSION_SCX: u32 = 0x17;

// Field list codes
const END_OF_HEADER: u8 = 0xFF;
const SUBHEADER: u8 = 0xFD;
const END_OF_SUBHEADER: u8 = 0x8A;
const SPLIT: u8 = 0x80;
const CHANNELS: u8 = 0x82;
const SAMPLE_RATE: u8 = 0x84;
const SAMPLE_COUNT: u8 = 0x85;
const LOOP_OFFSET: u8 = 0x86;
const LOOP_LENGTH: u8 = 0x87;
const SPLIT_COMPRESSION: u8 = 0xA0;

/// How a stream header chunk starts before its field list.
#[derive(Debug, Clone, Copy)]
pub struct HeaderLayout {
    pub name: &'static str,
    pub tag: &'static [u8],
    /// Bytes from the start of the payload to the field list.
    pub fields_at: usize,
}

/// The stream header fields this reader cares about.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScxHeader {
    pub split: u32,
    pub split_compression: u32,
    pub channels: u32,
    pub sample_rate: u32,
    pub sample_count: u32,
    pub loop_offset: u32,
    pub loop_length: u32,
}

/// Reads the chunk at `offset`, returning its id and payload. `None` when
/// the header is cut off, the size is below the header size or the payload
/// runs past the end of `data`.
pub fn read_chunk(data: &[u8], offset: usize) -> Option<([u8; 4], &[u8])> {
    let src = data.get(offset..)?;
    let (id, rest) = src.split_first_chunk::<4>()?;
    let (size, rest) = rest.split_first_chunk::<4>()?;
    let len = (u32::from_le_bytes(*size) as usize).checked_sub(CHUNK_HEADER_SIZE)?;
    Some((*id, rest.get(..len)?))
}

/// Big-endian value of `len` bytes, keeping the low 32 bits.
fn read_value(src: &mut &[u8]) -> Option<u32> {
    let len = usize::from(u8::read_be(src)?);
    let bytes = src.get(..len)?;
    *src = &src[len..];
    Some(bytes.iter().fold(0u32, |acc, &b| acc << 8 | u32::from(b)))
}

fn skip_field(src: &mut &[u8]) -> Option<()> {
    let len = usize::from(u8::read_be(src)?);
    *src = src.get(len..)?;
    Some(())
}

/// Parses a field list. A list cut short keeps the fields read so far.
pub fn parse_fields(fields: &[u8]) -> ScxHeader {
    let mut header = ScxHeader::default();
    let mut src = fields;
    let _ = parse_fields_into(&mut src, &mut header);
    header
}

fn parse_fields_into(src: &mut &[u8], header: &mut ScxHeader) -> Option<()> {
    loop {
        match u8::read_be(src)? {
            END_OF_HEADER => return Some(()),
            0xFE | 0xFC => {}
            SUBHEADER => loop {
                let code = u8::read_be(src)?;
                let target = match code {
                    SPLIT => &mut header.split,
                    CHANNELS => &mut header.channels,
                    SAMPLE_RATE => &mut header.sample_rate,
                    SAMPLE_COUNT => &mut header.sample_count,
                    LOOP_OFFSET => &mut header.loop_offset,
                    LOOP_LENGTH => &mut header.loop_length,
                    SPLIT_COMPRESSION => &mut header.split_compression,
                    END_OF_HEADER => return Some(()),
                    END_OF_SUBHEADER => {
                        skip_field(src)?;
                        break;
                    }
                    _ => {
                        skip_field(src)?;
                        continue;
                    }
                };
                *target = read_value(src)?;
            },
            _ => {
                let len = usize::from(u8::read_be(src)?);
                // 0xFF lengths carry 4 extra bytes
                let len = if len == 0xFF { len + 4 } else { len };
                *src = src.get(len..)?;
            }
        }
    }
}

#[derive(Debug)]
pub struct ScxLoader<'a> {
    name: &'static str,
    data: &'a [u8],
    pos: usize,
    header: ScxHeader,
    block_count: u32,
    blocks: u32,
    done: bool,
}

impl<'a> ScxLoader<'a> {
    /// Reads the stream header and block count chunks at `start`.
    pub fn probe(data: &'a [u8], start: usize, layout: &HeaderLayout) -> Option<Self> {
        let (id, payload) = read_chunk(data, start)?;
        if &id != HEADER_CHUNK || !payload.starts_with(layout.tag) {
            return None;
        }

        let header = parse_fields(payload.get(layout.fields_at..)?);
        if header.split == 0 || header.split_compression != SPLIT_COMPRESSION_SCX {
            debug!(
                "Not {}: split {}, split compression {:#04x}",
                layout.name, header.split, header.split_compression
            );
            return None;
        }

        let count_at = start + CHUNK_HEADER_SIZE + payload.len();
        let (id, count) = read_chunk(data, count_at)?;
        if &id != COUNT_CHUNK {
            debug!("Not {}: no block count chunk at offset {count_at}", layout.name);
            return None;
        }
        let mut src = count;
        let block_count = u32::read_be(&mut src)?;

        debug!(
            "{}: {} channel(s), {} Hz, {} samples, loop {}+{}, {block_count} blocks",
            layout.name,
            header.channels,
            header.sample_rate,
            header.sample_count,
            header.loop_offset,
            header.loop_length
        );

        Some(Self {
            name: layout.name,
            data,
            pos: count_at + CHUNK_HEADER_SIZE + count.len(),
            header,
            block_count,
            blocks: 0,
            done: false,
        })
    }

    fn finish(&mut self) -> Result<Option<Block>> {
        if self.blocks != self.block_count {
            debug!(
                "{}: {} blocks read, the count chunk announced {}",
                self.name, self.blocks, self.block_count
            );
        }
        self.done = true;
        Ok(None)
    }
}

impl BlockLoader for ScxLoader<'_> {
    fn name(&self) -> &'static str {
        self.name
    }

    fn codec(&self) -> Option<CodecKind> {
        Some(CodecKind::Scx)
    }

    fn next_block(&mut self) -> Result<Option<Block>> {
        if self.done {
            return Ok(None);
        }

        loop {
            let offset = self.pos;
            let Some((id, payload)) = read_chunk(self.data, offset) else {
                debug!("{}: no complete chunk at offset {offset}", self.name);
                return self.finish();
            };
            self.pos += CHUNK_HEADER_SIZE + payload.len();

            if &id == END_CHUNK {
                return self.finish();
            }
            if &id != DATA_CHUNK {
                debug!(
                    "{}: skipping chunk {} at offset {offset}",
                    self.name,
                    String::from_utf8_lossy(&id)
                );
                continue;
            }
            if payload.len() < DATA_CHUNK_FIELDS {
                debug!("{}: data chunk at offset {offset} is too short", self.name);
                return self.finish();
            }

            let mut src = payload;
            let Some(sample_count) = u32::read_be(&mut src) else {
                return self.finish();
            };
            self.blocks += 1;

            return Ok(Some(Block {
                data: payload[DATA_CHUNK_FIELDS..].to_vec(),
                sample_count,
                offset: offset as u64,
                sample_rate: self.header.sample_rate,
                channels: self.header.channels,
                ..Default::default()
            }));
        }
    }

    fn position(&self) -> usize {
        self.pos
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn chunk(id: &[u8; 4], payload: &[u8]) -> Vec<u8> {
        let mut bytes = id.to_vec();
        bytes.extend_from_slice(&((CHUNK_HEADER_SIZE + payload.len()) as u32).to_le_bytes());
        bytes.extend_from_slice(payload);
        bytes
    }

    /// Split SCx fields: stereo, 32000 Hz, 2304 samples.
    pub(crate) fn split_fields() -> Vec<u8> {
        vec![
            0x06, 0x01, 0x65, // skipped top level field
            0xFD, // subheader
            0x80, 0x01, 0x01, // split
            0x82, 0x01, 0x02, // channels
            0x84, 0x02, 0x7D, 0x00, // sample rate
            0x85, 0x04, 0x00, 0x00, 0x09, 0x00, // sample count
            0x99, 0x01, 0x00, // unknown field
            0xA0, 0x01, 0x17, // split compression
            0xFF,
        ]
    }

    /// A stream with `tag` ahead of the field list and blocks of the given
    /// payloads, 1152 samples each.
    pub(crate) fn stream(tag: &[u8], fields: &[u8], blocks: &[&[u8]]) -> Vec<u8> {
        let mut header = tag.to_vec();
        header.extend_from_slice(fields);

        let mut out = chunk(HEADER_CHUNK, &header);
        out.extend(chunk(COUNT_CHUNK, &(blocks.len() as u32).to_be_bytes()));
        for data in blocks {
            let mut payload = 1152u32.to_be_bytes().to_vec();
            payload.extend_from_slice(&[0; 8]);
            payload.extend_from_slice(data);
            out.extend(chunk(DATA_CHUNK, &payload));
        }
        out.extend(chunk(END_CHUNK, &[]));
        out
    }

    const LAYOUT: HeaderLayout = HeaderLayout {
        name: "Test",
        tag: b"TG",
        fields_at: 2,
    };

    #[test]
    fn field_list() {
        let header = parse_fields(&split_fields());
        assert_eq!(
            header,
            ScxHeader {
                split: 1,
                split_compression: 0x17,
                channels: 2,
                sample_rate: 32000,
                sample_count: 2304,
                ..Default::default()
            }
        );

        // a list cut inside a value keeps what came before
        let fields = split_fields();
        let header = parse_fields(&fields[..12]);
        assert_eq!(header.channels, 2);
        assert_eq!(header.sample_rate, 0);

        // the end of subheader code skips one field and returns to the top level
        let header = parse_fields(&[0xFD, 0x8A, 0x00, 0xFD, 0x82, 0x01, 0x01, 0xFF]);
        assert_eq!(header.channels, 1);
    }

    #[test]
    fn blocks_until_end_chunk() -> Result<()> {
        let mut data = stream(b"TG", &split_fields(), &[&[1, 2, 3], &[4, 5]]);
        let end = data.len();
        data.extend_from_slice(&[0xAA; 6]);

        let mut loader = ScxLoader::probe(&data, 0, &LAYOUT).unwrap();
        assert_eq!(loader.name(), "Test");
        assert_eq!(loader.codec(), Some(CodecKind::Scx));
        assert_eq!(loader.header.sample_rate, 32000);

        let first = loader.next_block()?.unwrap();
        assert_eq!(first.data, [1, 2, 3]);
        assert_eq!(first.sample_count, 1152);
        assert_eq!(first.channels, 2);
        assert_eq!(loader.next_block()?.unwrap().data, [4, 5]);
        assert!(loader.next_block()?.is_none());
        assert!(loader.next_block()?.is_none());
        assert_eq!(loader.position(), end);
        Ok(())
    }

    #[test]
    fn unknown_chunks_are_skipped() -> Result<()> {
        let full = stream(b"TG", &split_fields(), &[&[7, 7]]);
        let (head, rest) = full.split_at(full.len() - 2 * CHUNK_HEADER_SIZE - 14);

        let mut data = head.to_vec();
        data.extend(chunk(b"SCPl", &[0; 4]));
        data.extend_from_slice(rest);

        let mut loader = ScxLoader::probe(&data, 0, &LAYOUT).unwrap();
        assert_eq!(loader.next_block()?.unwrap().data, [7, 7]);
        assert!(loader.next_block()?.is_none());
        Ok(())
    }

    #[test]
    fn short_data_chunk_ends_the_stream() -> Result<()> {
        let mut data = stream(b"TG", &split_fields(), &[]);
        data.truncate(data.len() - CHUNK_HEADER_SIZE);
        data.extend(chunk(DATA_CHUNK, &[0; 8]));

        let mut loader = ScxLoader::probe(&data, 0, &LAYOUT).unwrap();
        assert!(loader.next_block()?.is_none());
        Ok(())
    }

    #[test]
    fn probe_requires_split_scx() {
        let data = stream(b"TG", &split_fields(), &[&[1]]);
        assert!(ScxLoader::probe(&data, 0, &LAYOUT).is_some());
        assert!(ScxLoader::probe(&data[..20], 0, &LAYOUT).is_none());

        let mut fields = split_fields();
        let at = fields.len() - 2;
        fields[at] = 0x16;
        assert!(ScxLoader::probe(&stream(b"TG", &fields, &[&[1]]), 0, &LAYOUT).is_none());

        let unsplit: Vec<u8> = split_fields()
            .into_iter()
            .enumerate()
            .filter(|&(i, _)| !(4..7).contains(&i))
            .map(|(_, b)| b)
            .collect();
        assert!(ScxLoader::probe(&stream(b"TG", &unsplit, &[&[1]]), 0, &LAYOUT).is_none());

        assert!(ScxLoader::probe(&stream(b"XX", &split_fields(), &[&[1]]), 0, &LAYOUT).is_none());
    }
}
