// Library exports for testing and potential library use
//
// # Threading Model
//
// vmdeck runs on three kinds of threads. New code should follow these rules:
//
//   - UI thread            owns every `VmView` and the `Machine`. All view
//                          mutation happens here, reached through
//                          `Dispatcher::post` from other threads.
//
//   - Executor thread      runs recomputation jobs one at a time. It never
//                          touches views; results are applied by a closure
//                          posted back to the UI thread.
//
//   - Watcher/timer threads classify notifications and fire timers. They only
//                          touch `Send + Sync` state (`parking_lot::Mutex`,
//                          atomics, `arc_swap`) and never block on the UI.
//
// `Dispatcher::invoke` is the one blocking UI round-trip and is only called
// from the executor thread; calling it on the UI thread returns
// `DispatchError::WouldDeadlock`.

/// Application version (root crate version, for use by sub-crates).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[macro_use]
pub mod debug;

pub mod app;
pub mod cli;
pub mod coalescer;
pub mod dispatcher;
pub mod error;
pub mod executor;
pub mod folder_size;
pub mod folders;
pub mod job;
pub mod machine;
pub mod status;
pub mod throttle;
pub mod time_format;
pub mod timer;
pub mod view;
pub mod vm_config;
pub mod watch;

pub use coalescer::{ChangeKind, FsNotification, UpdateEvent};
pub use dispatcher::{Dispatcher, UiLoop};
pub use error::{DispatchError, EngineError, WatchError};
pub use machine::{EngineStats, Machine, MachineHost};
pub use status::MachineStatus;
pub use view::{ViewProperty, VmView, VmViewRef};
pub use vmdeck_config::EngineConfig;
