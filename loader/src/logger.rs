use log::{Level, LevelFilter, Log, Metadata, Record, SetLoggerError};

struct StderrLogger;

static LOGGER: StderrLogger = StderrLogger;

impl Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let letter = match record.level() {
            Level::Error => 'E',
            Level::Warn => 'W',
            Level::Info => 'I',
            Level::Debug => 'D',
            Level::Trace => 'T',
        };
        eprintln!(
            "{} {:<16} {}",
            letter,
            short_module(record.module_path().unwrap_or("")),
            record.args()
        );
    }

    fn flush(&self) {}
}

/// Last path segment of a module path: `elfload::session` -> `session`.
fn short_module(path: &str) -> &str {
    match path.rfind("::") {
        Some(i) => &path[i + 2..],
        None => path,
    }
}

/// Install the stderr logger at `level`.
pub fn init(level: LevelFilter) -> Result<(), SetLoggerError> {
    log::set_logger(&LOGGER)?;
    log::set_max_level(level);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_module_strips_crate_path() {
        assert_eq!(short_module("elfload::segment_loader"), "segment_loader");
        assert_eq!(short_module("elfload"), "elfload");
        assert_eq!(short_module(""), "");
    }
}
