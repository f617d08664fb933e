pub mod command;
pub mod decode;
pub mod encode;
pub mod info;
pub mod progress;

use std::path::{Path, PathBuf};

use log::Level;

use command::Cli;

/// Strict mode fails on the first warning.
pub(crate) fn fail_level(cli: &Cli) -> Level {
    if cli.strict { Level::Warn } else { Level::Error }
}

/// `base` with `suffix` appended to the file stem and `ext` as extension.
/// A `base` without extension gets `ext`; an existing extension is kept.
pub(crate) fn output_name(base: &Path, suffix: &str, ext: &str) -> PathBuf {
    let stem = base
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = base
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_else(|| ext.to_string());

    base.with_file_name(format!("{stem}{suffix}.{ext}"))
}
