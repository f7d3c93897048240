use log::{LevelFilter, Log, Metadata, Record};

use crate::kprintln;

#[cfg(feature = "log_trace")]
const MAX_LEVEL: LevelFilter = LevelFilter::Trace;
#[cfg(all(feature = "log_debug", not(feature = "log_trace")))]
const MAX_LEVEL: LevelFilter = LevelFilter::Debug;
#[cfg(all(
    feature = "log_info",
    not(any(feature = "log_debug", feature = "log_trace"))
))]
const MAX_LEVEL: LevelFilter = LevelFilter::Info;
#[cfg(not(any(feature = "log_info", feature = "log_debug", feature = "log_trace")))]
const MAX_LEVEL: LevelFilter = LevelFilter::Warn;

/// `log` backend writing every record to the serial console.
struct SerialLogger;

static LOGGER: SerialLogger = SerialLogger;

impl Log for SerialLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= MAX_LEVEL
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        kprintln!("[{:<5}] {}", record.level(), record.args());
    }

    fn flush(&self) {}
}

/// Installs the serial logger. A second call keeps the first logger.
pub fn init() {
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(MAX_LEVEL);
    }
}

/// The level chosen by the `log_*` features.
pub fn max_level() -> LevelFilter {
    MAX_LEVEL
}
