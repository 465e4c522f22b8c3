//! Debug logging for vmdeck.
//!
//! Controlled by the DEBUG_LEVEL environment variable (or `--log-level`):
//! - 0 or unset: No debugging
//! - 1: Errors only
//! - 2: Info level (selection changes, watcher state)
//! - 3: Debug level (dispatched jobs, throttle decisions)
//! - 4: Trace level (every filesystem notification)
//!
//! All output goes to /tmp/vmdeck_debug.log on Unix/macOS,
//! or %TEMP%\vmdeck_debug.log on Windows, so a hosting UI's stdout is left alone.
//! When RUST_LOG is set, records are mirrored to stderr as well.

use parking_lot::Mutex;
use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};

/// Debug level configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DebugLevel {
    Off = 0,
    Error = 1,
    Info = 2,
    Debug = 3,
    Trace = 4,
}

impl DebugLevel {
    fn from_env() -> Self {
        match std::env::var("DEBUG_LEVEL") {
            Ok(val) => val.parse().unwrap_or(DebugLevel::Off),
            Err(_) => DebugLevel::Off,
        }
    }

    fn from_log(level: log::Level) -> Self {
        match level {
            log::Level::Error | log::Level::Warn => DebugLevel::Error,
            log::Level::Info => DebugLevel::Info,
            log::Level::Debug => DebugLevel::Debug,
            log::Level::Trace => DebugLevel::Trace,
        }
    }

    fn level_filter(self) -> log::LevelFilter {
        match self {
            DebugLevel::Off => log::LevelFilter::Off,
            DebugLevel::Error => log::LevelFilter::Warn,
            DebugLevel::Info => log::LevelFilter::Info,
            DebugLevel::Debug => log::LevelFilter::Debug,
            DebugLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

impl FromStr for DebugLevel {
    type Err = String;

    /// Accepts the numeric DEBUG_LEVEL values and the usual level names.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "0" | "off" => Ok(DebugLevel::Off),
            "1" | "error" | "warn" => Ok(DebugLevel::Error),
            "2" | "info" => Ok(DebugLevel::Info),
            "3" | "debug" => Ok(DebugLevel::Debug),
            "4" | "trace" => Ok(DebugLevel::Trace),
            other => Err(format!("unknown log level '{other}'")),
        }
    }
}

/// Global debug logger
struct DebugLogger {
    level: DebugLevel,
    file: Option<std::fs::File>,
    mirror_stderr: bool,
}

impl DebugLogger {
    fn new(level: DebugLevel) -> Self {
        let mirror_stderr = std::env::var_os("RUST_LOG").is_some();

        if level == DebugLevel::Off {
            return DebugLogger {
                level,
                file: None,
                mirror_stderr,
            };
        }

        let log_path = std::env::temp_dir().join("vmdeck_debug.log");
        let file = OpenOptions::new()
            .write(true)
            .truncate(true)
            .create(true)
            .open(&log_path)
            // Silently run without a file; logging must never take the engine down.
            .ok();

        let mut logger = DebugLogger {
            level,
            file,
            mirror_stderr,
        };
        logger.write_raw(&format!(
            "\n{}\nvmdeck debug session started at {} (level={:?})\n{}\n",
            "=".repeat(80),
            get_timestamp(),
            level,
            "=".repeat(80)
        ));
        logger
    }

    fn write_raw(&mut self, msg: &str) {
        if let Some(ref mut file) = self.file {
            let _ = file.write_all(msg.as_bytes());
            let _ = file.flush();
        }
    }

    fn log(&mut self, level: DebugLevel, category: &str, msg: &str) {
        if level > self.level {
            return;
        }
        let level_str = match level {
            DebugLevel::Error => "ERROR",
            DebugLevel::Info => "INFO ",
            DebugLevel::Debug => "DEBUG",
            DebugLevel::Trace => "TRACE",
            DebugLevel::Off => return,
        };
        let line = format!(
            "[{}] [{}] [{}] {}\n",
            get_timestamp(),
            level_str,
            category,
            msg
        );
        if self.mirror_stderr {
            eprint!("{line}");
        }
        self.write_raw(&line);
    }
}

static LOGGER: OnceLock<Mutex<DebugLogger>> = OnceLock::new();

fn get_logger() -> &'static Mutex<DebugLogger> {
    LOGGER.get_or_init(|| Mutex::new(DebugLogger::new(DebugLevel::from_env())))
}

fn get_timestamp() -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    format!("{}.{:06}", now.as_secs(), now.subsec_micros())
}

/// Check if debugging is enabled at given level
pub fn is_enabled(level: DebugLevel) -> bool {
    let logger = get_logger().lock();
    level <= logger.level
}

/// Log a message at specified level
pub fn log(level: DebugLevel, category: &str, msg: &str) {
    let mut logger = get_logger().lock();
    logger.log(level, category, msg);
}

/// Log formatted message
pub fn logf(level: DebugLevel, category: &str, args: fmt::Arguments) {
    if is_enabled(level) {
        log(level, category, &format!("{}", args));
    }
}

/// Routes `log::*!` records into the debug log file.
struct LogBridge;

impl log::Log for LogBridge {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        is_enabled(DebugLevel::from_log(metadata.level()))
    }

    fn log(&self, record: &log::Record) {
        let level = DebugLevel::from_log(record.level());
        if !is_enabled(level) {
            return;
        }
        let msg = if record.level() == log::Level::Warn {
            format!("WARN: {}", record.args())
        } else {
            format!("{}", record.args())
        };
        log(level, record.target(), &msg);
    }

    fn flush(&self) {}
}

static LOG_BRIDGE: LogBridge = LogBridge;

/// Install the `log` facade bridge.
///
/// Precedence: `cli_level`, then RUST_LOG, then DEBUG_LEVEL. Calling this
/// more than once keeps the first installation.
pub fn init_log_bridge(cli_level: Option<DebugLevel>) {
    let level = cli_level
        .or_else(|| {
            std::env::var("RUST_LOG")
                .ok()
                .and_then(|v| v.parse::<DebugLevel>().ok())
        })
        .unwrap_or_else(DebugLevel::from_env);

    // The first caller decides the level; later callers reuse it.
    let installed = get_or_init_with(level);

    if log::set_logger(&LOG_BRIDGE).is_ok() {
        log::set_max_level(installed.level_filter());
    }
}

fn get_or_init_with(level: DebugLevel) -> DebugLevel {
    LOGGER
        .get_or_init(|| Mutex::new(DebugLogger::new(level)))
        .lock()
        .level
}

// Convenience macros for logging
#[macro_export]
macro_rules! debug_error {
    ($category:expr, $($arg:tt)*) => {
        $crate::debug::logf($crate::debug::DebugLevel::Error, $category, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! debug_info {
    ($category:expr, $($arg:tt)*) => {
        $crate::debug::logf($crate::debug::DebugLevel::Info, $category, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! debug_log {
    ($category:expr, $($arg:tt)*) => {
        $crate::debug::logf($crate::debug::DebugLevel::Debug, $category, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! debug_trace {
    ($category:expr, $($arg:tt)*) => {
        $crate::debug::logf($crate::debug::DebugLevel::Trace, $category, format_args!($($arg)*))
    };
}
