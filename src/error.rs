//! Typed error types for the vmdeck engine.
//!
//! Errors only surface while wiring the engine up (spawning its threads,
//! pointing watchers). Once running, background failures degrade to stale
//! or default view state instead of propagating.

use std::path::PathBuf;
use thiserror::Error;

/// Failure to hand work to the UI thread.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    /// The UI loop has been dropped; nothing will ever run the message.
    #[error("UI loop is gone")]
    Closed,

    /// The UI loop dropped the message before producing a reply.
    #[error("UI loop dropped the request before replying")]
    NoReply,

    /// `invoke` was called on the UI thread itself and would block forever.
    #[error("blocking invoke called from the UI thread")]
    WouldDeadlock,
}

/// Failure to create or point a filesystem watcher.
#[derive(Debug, Error)]
pub enum WatchError {
    /// Neither the native nor the polling backend could be created.
    #[error("Failed to create watcher: {0}")]
    Create(#[source] notify::Error),

    /// The path could not be watched.
    #[error("Failed to watch path {path}: {source}")]
    WatchPath {
        /// Path that was being watched.
        path: PathBuf,
        /// Underlying notify error.
        #[source]
        source: notify::Error,
    },
}

/// Top-level error type for engine construction.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A timer or worker thread could not be spawned.
    #[error("Failed to spawn {name} thread: {source}")]
    Spawn {
        /// Thread name.
        name: String,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// Watcher setup failed.
    #[error(transparent)]
    Watch(#[from] WatchError),

    /// Engine configuration was rejected.
    #[error(transparent)]
    Config(#[from] vmdeck_config::ConfigError),
}
