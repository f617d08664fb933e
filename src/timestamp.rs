/// Formats a sample count as `hh:mm:ss.mmm`. Hours grow past two digits
/// instead of wrapping.
pub fn duration_str(samples: u64, sample_rate: u32) -> String {
    if sample_rate == 0 {
        return "--:--:--.---".to_string();
    }

    let ms = samples * 1000 / u64::from(sample_rate);
    let hours = ms / 3_600_000;
    let minutes = ms % 3_600_000 / 60_000;
    let seconds = ms % 60_000 / 1000;
    let milliseconds = ms % 1000;

    format!("{hours:02}:{minutes:02}:{seconds:02}.{milliseconds:03}")
}
