//! Log setup: `log` facade over env_logger, routed around indicatif bars on a TTY.

use std::io::Write;

use indicatif::MultiProgress;
use log::Level;

/// Fixed-width level tag, optionally wrapped in an ANSI color.
fn level_tag(level: Level, color: bool) -> String {
    let (name, ansi) = match level {
        Level::Error => ("ERROR", "31"),
        Level::Warn => ("WARN", "33"),
        Level::Info => ("INFO", "32"),
        Level::Debug => ("DEBUG", "36"),
        Level::Trace => ("TRACE", "35"),
    };
    if color {
        format!("\x1b[{ansi}m{name:<5}\x1b[0m")
    } else {
        name.to_string()
    }
}

/// `paperflow_pipeline::executor` → `executor`
fn module_of(target: &str) -> &str {
    target.rsplit("::").next().unwrap_or(target)
}

/// Prints records above the progress bars instead of through them.
pub struct IndicatifLogger {
    filter: env_logger::Logger,
    multi: MultiProgress,
}

impl IndicatifLogger {
    pub fn new(filter: env_logger::Logger, multi: MultiProgress) -> Self {
        Self { filter, multi }
    }
}

impl log::Log for IndicatifLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        self.filter.enabled(metadata)
    }

    fn log(&self, record: &log::Record) {
        if !self.filter.matches(record) {
            return;
        }
        let line = format!(
            "{} {:>9} | {}",
            level_tag(record.level(), true),
            module_of(record.target()),
            record.args()
        );
        self.multi.suspend(|| eprintln!("{line}"));
    }

    fn flush(&self) {}
}

/// Install the global logger.
///
/// The level comes from `quiet`/`debug` unless `RUST_LOG` is set. With a
/// `MultiProgress` (TTY) records are colored and printed around the bars.
/// Otherwise each record is one `timestamp - target - LEVEL - message` line.
/// Calling this twice keeps the first logger.
pub fn init_logging(quiet: bool, debug: bool, multi: Option<&MultiProgress>) {
    let level = match (debug, quiet) {
        (true, _) => "debug",
        (false, true) => "warn",
        (false, false) => "info",
    };
    let mut builder = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level));

    match multi {
        Some(multi) => {
            let filter = builder.build();
            let max_level = filter.filter();
            if log::set_boxed_logger(Box::new(IndicatifLogger::new(filter, multi.clone()))).is_ok() {
                log::set_max_level(max_level);
            }
        }
        None => {
            let _ = builder
                .format(|buf, record| {
                    writeln!(
                        buf,
                        "{} - {} - {} - {}",
                        buf.timestamp_millis(),
                        record.target(),
                        level_tag(record.level(), false),
                        record.args()
                    )
                })
                .try_init();
        }
    }
}
