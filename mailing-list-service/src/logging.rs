//! Structured logging init (Ambient §9a): a `fern` dispatcher keyed off
//! `LOG_LEVEL`, colored on a terminal, installed alongside `log-panics` so a
//! panic is captured through the same sink instead of going straight to
//! stderr. Grounded on the `fern`/`log`/`log-panics` dependency stack
//! carried in the teacher's `common` crate.

use fern::colors::{Color, ColoredLevelConfig};
use log::LevelFilter;

pub fn init(level: &str) {
    let level_filter = level.parse::<LevelFilter>().unwrap_or(LevelFilter::Info);
    let colors = ColoredLevelConfig::new()
        .info(Color::Green)
        .warn(Color::Yellow)
        .error(Color::Red)
        .debug(Color::Blue)
        .trace(Color::Magenta);

    let dispatch = fern::Dispatch::new()
        .format(move |out, message, record| {
            out.finish(format_args!(
                "[{} {} {}] {}",
                chrono::Utc::now().to_rfc3339(),
                colors.color(record.level()),
                record.target(),
                message
            ))
        })
        .level(level_filter)
        .chain(std::io::stdout());

    if let Err(err) = dispatch.apply() {
        eprintln!("logger already initialized: {err}");
    }
    log_panics::init();
}
