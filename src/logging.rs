use std::str::FromStr;
use std::time::SystemTime;

use log::LevelFilter;

/// Sends every log record at or above `level` to stdout, prefixed with a timestamp, the level and the target.
/// Unknown levels fall back to `info`
pub fn setup_logger(level: &str) -> Result<(), fern::InitError> {
    let level = LevelFilter::from_str(level).unwrap_or(LevelFilter::Info);
    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{} {} {}] {}",
                humantime::format_rfc3339_seconds(SystemTime::now()),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(level)
        .chain(std::io::stdout())
        .apply()?;
    Ok(())
}
