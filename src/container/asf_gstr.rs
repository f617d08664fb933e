//! SCx stream whose header chunk opens with `GSTR` and a 4-byte word before
//! the field list.

use super::scx::{HeaderLayout, ScxLoader};

const LAYOUT: HeaderLayout = HeaderLayout {
    name: "ASF GSTR Header",
    tag: b"GSTR",
    fields_at: 8,
};

pub fn probe(data: &[u8], start: usize) -> Option<ScxLoader<'_>> {
    ScxLoader::probe(data, start, &LAYOUT)
}
