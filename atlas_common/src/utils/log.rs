use anyhow::Result;
use chrono::{Local, NaiveDate};
use fern::colors::{Color, ColoredLevelConfig};
use log::{Level, LevelFilter};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use super::file_system::{ensure_dir, parent_dir_of_cur_exe};

static LOGGER_SET: OnceLock<bool> = OnceLock::new();

/// Console and file logging for one installer process.
///
/// The console shows what the user asked for, the file always receives everything,
/// including the `trace!` lines that mirror the pipeline's own log.
#[derive(Debug)]
pub struct Logger {
    console: LevelFilter,
}

impl Default for Logger {
    fn default() -> Self {
        Self::new()
    }
}

impl Logger {
    pub fn new() -> Self {
        let console = if cfg!(debug_assertions) {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        };
        Self { console }
    }

    crate::setter!(verbose(self.console, v: bool) {
        if v { LevelFilter::Trace } else { self.console }
    });
    crate::setter!(quiet(self.console, q: bool) {
        if q { LevelFilter::Error } else { self.console }
    });

    /// Install the global logger, later calls have no effect.
    ///
    /// Warnings and errors go to `stderr` so they stay apart from the progress output.
    pub fn setup(self) -> Result<()> {
        let console = self.console;
        let log_file = log_file_in(&default_log_dir()?, Local::now().date_naive());

        let colors = ColoredLevelConfig::new()
            .info(Color::BrightBlue)
            .debug(Color::Magenta);
        let label = move |level: Level| colors.color(level).to_string().to_lowercase();

        let stdout = fern::Dispatch::new()
            .filter(move |md| shown_on_console(md.level(), console) && md.level() > Level::Warn)
            .format(move |out, msg, rec| out.finish(format_args!("{}: {msg}", label(rec.level()))))
            .chain(std::io::stdout());
        let stderr = fern::Dispatch::new()
            .filter(move |md| shown_on_console(md.level(), console) && md.level() <= Level::Warn)
            .format(move |out, msg, rec| out.finish(format_args!("{}: {msg}", label(rec.level()))))
            .chain(std::io::stderr());
        let file = fern::Dispatch::new()
            .format(|out, msg, rec| {
                out.finish(format_args!(
                    "[{} {:<5} {}] {msg}",
                    Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                    rec.level(),
                    rec.target(),
                ))
            })
            .chain(fern::log_file(&log_file)?);

        let applied = fern::Dispatch::new()
            .level(LevelFilter::Trace)
            .chain(stdout)
            .chain(stderr)
            .chain(file)
            .apply();
        if applied.is_ok() {
            _ = LOGGER_SET.set(true);
            debug!("logging to '{}'", log_file.display());
        }
        Ok(())
    }
}

/// `trace!` is reserved for the log file, everything else follows the console level.
fn shown_on_console(level: Level, console: LevelFilter) -> bool {
    level <= console && level != Level::Trace
}

/// The `log` directory next to the installer binary, so users find it after a failed run.
///
/// Falls back to the working directory when the binary location is unknown, and to the
/// system temp directory when that one is read-only.
pub fn default_log_dir() -> Result<PathBuf> {
    let beside_exe = parent_dir_of_cur_exe()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join("log");
    if ensure_dir(&beside_exe).is_ok() {
        return Ok(beside_exe);
    }
    let fallback = std::env::temp_dir().join("atlas-installer-log");
    ensure_dir(&fallback)?;
    Ok(fallback)
}

/// One log file per program and day, e.g. `atlas-installer-2026-10-18.log`.
pub fn log_file_in(dir: &Path, date: NaiveDate) -> PathBuf {
    let program = super::lowercase_program_name().unwrap_or(env!("CARGO_PKG_NAME").to_string());
    dir.join(format!("{program}-{date}.log"))
}

/// Return `true` if the logger was already initialized.
pub fn logger_is_set() -> bool {
    LOGGER_SET.get().copied().unwrap_or_default()
}
