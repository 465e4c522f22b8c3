//! Command-line interface for vmdeck.
//!
//! `watch` runs the engine against VM folders on disk and prints every view
//! property change; `inspect` runs a single full recomputation and exits.

use crate::debug::DebugLevel;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// vmdeck - Watch emulator VM folders and keep their details current
#[derive(Parser, Debug)]
#[command(name = "vmdeck")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Engine config file (default: platform config dir)
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Set debug log level (overrides RUST_LOG and DEBUG_LEVEL)
    #[arg(long, value_enum, value_name = "LEVEL", global = true)]
    pub log_level: Option<LogLevelArg>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Watch VM folders and print changes as they are applied
    Watch {
        /// VM folders; the first one is selected at start
        #[arg(required = true, value_name = "DIR")]
        dirs: Vec<PathBuf>,

        /// Move the selection to the next folder every N seconds
        #[arg(long, value_name = "SECONDS")]
        select_every: Option<f64>,

        /// Exit after the specified number of seconds
        #[arg(long, value_name = "SECONDS")]
        exit_after: Option<f64>,
    },

    /// Print the config, size and attachments of one VM folder
    Inspect {
        #[arg(value_name = "DIR")]
        dir: PathBuf,
    },
}

/// Log level argument for CLI
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum LogLevelArg {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevelArg {
    pub fn to_debug_level(self) -> DebugLevel {
        match self {
            LogLevelArg::Off => DebugLevel::Off,
            LogLevelArg::Error | LogLevelArg::Warn => DebugLevel::Error,
            LogLevelArg::Info => DebugLevel::Info,
            LogLevelArg::Debug => DebugLevel::Debug,
            LogLevelArg::Trace => DebugLevel::Trace,
        }
    }
}

/// Convert a seconds argument, ignoring non-positive and non-finite values.
pub fn seconds(value: Option<f64>) -> Option<std::time::Duration> {
    value
        .filter(|s| s.is_finite() && *s > 0.0)
        .map(std::time::Duration::from_secs_f64)
}
