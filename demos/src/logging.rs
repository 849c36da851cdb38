use log::{Level, LevelFilter, Log, Metadata, Record};

/// Prints every record to stderr, one line each.
struct StderrLogger;

impl Log for StderrLogger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        eprintln!(
            "\u{1b}[{}m[{:>5} {}] {}\u{1b}[0m",
            color_code_for_level(record.level()),
            record.level(),
            record.target(),
            record.args()
        );
    }

    fn flush(&self) {}
}

fn color_code_for_level(lvl: Level) -> u8 {
    match lvl {
        Level::Error => 31,
        Level::Warn => 93,
        Level::Info => 34,
        Level::Debug => 32,
        Level::Trace => 90,
    }
}

/// Installs the logger, filtered by the `LOG` environment variable.
pub fn init() {
    static LOGGER: StderrLogger = StderrLogger;
    if log::set_logger(&LOGGER).is_err() {
        return;
    }
    let level = std::env::var("LOG").unwrap_or_default();
    log::set_max_level(match level.to_ascii_lowercase().as_str() {
        "error" => LevelFilter::Error,
        "warn" => LevelFilter::Warn,
        "debug" => LevelFilter::Debug,
        "trace" => LevelFilter::Trace,
        "off" => LevelFilter::Off,
        _ => LevelFilter::Info,
    });
}
