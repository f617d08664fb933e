//! SCx stream whose header chunk opens with `PT` and two more bytes before
//! the field list.

use super::scx::{HeaderLayout, ScxLoader};

const LAYOUT: HeaderLayout = HeaderLayout {
    name: "ASF PT Header",
    tag: b"PT",
    fields_at: 4,
};

pub fn probe(data: &[u8], start: usize) -> Option<ScxLoader<'_>> {
    ScxLoader::probe(data, start, &LAYOUT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::BlockLoader;
    use crate::container::scx::tests::{split_fields, stream};
    use anyhow::Result;

    #[test]
    fn pt_stream_at_offset() -> Result<()> {
        let mut data = vec![0u8; 5];
        data.extend(stream(b"PT\0\0", &split_fields(), &[&[1, 2], &[3]]));

        assert!(probe(&data, 0).is_none());
        let mut loader = probe(&data, 5).unwrap();
        assert_eq!(loader.name(), "ASF PT Header");

        let first = loader.next_block()?.unwrap();
        assert_eq!(first.offset, 5 + 8 + 31 + 12);
        assert_eq!(first.channels, 2);
        assert_eq!(loader.next_block()?.unwrap().data, [3]);
        assert!(loader.next_block()?.is_none());
        assert_eq!(loader.position(), data.len());
        Ok(())
    }
}
