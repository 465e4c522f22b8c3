//! Shared integration test helpers for vmdeck.
//!
//! ```ignore
//! mod common;
//! use common::{TestHost, fast_config, make_vm_dir};
//! ```
//!
//! The `#[allow(dead_code)]` attribute suppresses warnings when only a subset
//! of helpers are used per file.

#![allow(dead_code)]

use std::fs;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;
use vmdeck::{Dispatcher, EngineConfig, Machine, MachineHost, UiLoop};

/// Generous upper bound for anything that waits on background threads.
pub const WAIT: Duration = Duration::from_secs(10);

/// Debounce interval used by [`fast_config`].
pub const DEBOUNCE: Duration = Duration::from_millis(150);

/// UI state owning just the engine.
pub struct TestHost {
    pub machine: Machine<TestHost>,
}

impl MachineHost for TestHost {
    fn machine(&mut self) -> &mut Machine<TestHost> {
        &mut self.machine
    }
}

/// Engine config with a short debounce and a long running size interval.
pub fn fast_config() -> EngineConfig {
    EngineConfig {
        debounce_ms: Some(DEBOUNCE.as_millis() as u64),
        running_size_check_ms: 60_000,
        ..EngineConfig::default()
    }
}

/// Build a UI loop and a host with `config`.
pub fn start(config: EngineConfig) -> (UiLoop<TestHost>, TestHost, Dispatcher<TestHost>) {
    let (ui, dispatcher) = UiLoop::new();
    let machine = Machine::new(config, dispatcher.clone()).expect("Failed to start engine");
    (ui, TestHost { machine }, dispatcher)
}

/// Creates a VM folder:
/// ```text
/// <tmp>/
///   86box.cfg     # [General] + [Machine] sections
///   disk.img      # 1 KiB
/// ```
pub fn make_vm_dir() -> TempDir {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    fs::write(
        temp_dir.path().join("86box.cfg"),
        "[General]\nvid_renderer = qt_software\n\n[Machine]\nmachine = ibmpc\n",
    )
    .expect("Failed to write config");
    fs::write(temp_dir.path().join("disk.img"), vec![0u8; 1024]).expect("Failed to write disk");
    temp_dir
}

/// Adds `screenshots/<name>` with a few bytes of content.
pub fn add_screenshot(dir: &Path, name: &str) {
    let shots = dir.join("screenshots");
    fs::create_dir_all(&shots).expect("Failed to create screenshots dir");
    fs::write(shots.join(name), b"png").expect("Failed to write screenshot");
}
