//! Recomputation jobs.
//!
//! A job captures the selection generation and the VM's paths when it is
//! created on the UI thread, runs its filesystem work on the executor thread
//! and carries the results back to be applied.

use crate::coalescer::{UpdateEvent, WatchedTarget};
use crate::folders::{FolderScan, scan_folders};
use crate::throttle::{SizeCheck, SizeThrottle};
use crate::vm_config::RawConfig;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Categories with a dispatched but not yet applied job. UI thread only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PendingFlags {
    pub config: bool,
    pub size: bool,
    pub folders: bool,
}

impl PendingFlags {
    /// Drop the categories already covered by an outstanding job.
    pub fn mask(&self, event: UpdateEvent) -> UpdateEvent {
        UpdateEvent {
            parse_config: event.parse_config && !self.config,
            check_folders: event.check_folders && !self.folders,
            check_size: event.check_size && !self.size,
        }
    }

    pub fn mark(&mut self, event: UpdateEvent) {
        self.config |= event.parse_config;
        self.folders |= event.check_folders;
        self.size |= event.check_size;
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn any(&self) -> bool {
        self.config || self.size || self.folders
    }
}

/// Read-only inputs of a job.
#[derive(Debug, Clone)]
pub struct JobSnapshot {
    id: u64,
    root: PathBuf,
    config_file: PathBuf,
    max_config_bytes: u64,
}

/// What a job computed. `computed` lists the categories whose results are
/// present; a deferred size check is not part of it.
#[derive(Debug, Clone, Default)]
pub struct JobResult {
    pub id: u64,
    pub root: PathBuf,
    pub computed: UpdateEvent,
    pub config: Option<RawConfig>,
    pub size: Option<String>,
    pub folders: Option<FolderScan>,
}

impl JobSnapshot {
    pub fn new(target: &WatchedTarget, max_config_bytes: u64) -> Self {
        Self {
            id: target.id(),
            root: target.root().to_path_buf(),
            config_file: target.config_file().to_path_buf(),
            max_config_bytes,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn result(&self) -> JobResult {
        JobResult {
            id: self.id,
            root: self.root.clone(),
            ..JobResult::default()
        }
    }

    /// Everything, unthrottled. Run after a selection change.
    pub fn run_full(&self, throttle: &SizeThrottle) -> JobResult {
        let mut result = self.result();
        result.config = Some(RawConfig::read(&self.config_file, self.max_config_bytes));
        result.size = Some(throttle.compute(&self.root));
        result.folders = Some(scan_folders(&self.root));
        result.computed = UpdateEvent::ALL;
        throttle.mark_checked(self.id);
        result
    }

    /// The categories in `flags`, with the size check going through the
    /// throttle. A deferred size result is handed to `deliver` later.
    pub fn run_partial<Q, D>(
        &self,
        flags: UpdateEvent,
        throttle: &Arc<SizeThrottle>,
        query_running: Q,
        deliver: D,
    ) -> JobResult
    where
        Q: FnOnce() -> bool,
        D: FnOnce(String) + Send + 'static,
    {
        let mut result = self.result();

        if flags.parse_config {
            result.config = Some(RawConfig::read(&self.config_file, self.max_config_bytes));
            result.computed.parse_config = true;
        }

        if flags.check_size {
            match throttle.request(self.id, &self.root, query_running, deliver) {
                SizeCheck::Computed(size) => {
                    result.size = Some(size);
                    result.computed.check_size = true;
                }
                outcome => log::debug!("Job {}: size check {:?}", self.id, outcome),
            }
        }

        if flags.check_folders {
            result.folders = Some(scan_folders(&self.root));
            result.computed.check_folders = true;
        }

        result
    }
}
