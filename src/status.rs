//! Emulator status and the config-parse gate.
//!
//! The status is written by whoever receives the emulator's window messages
//! (the UI thread) and read by watcher threads while classifying
//! notifications, so it lives in atomics rather than behind the UI's `&mut`.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

/// Emulator window state of a VM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MachineStatus {
    #[default]
    Stopped,
    Running,
    /// Blocked on a modal dialog inside the emulator.
    Waiting,
    Paused,
}

impl MachineStatus {
    /// Display text, as shown in a VM list.
    pub fn text(self) -> &'static str {
        match self {
            MachineStatus::Stopped => "Stopped",
            MachineStatus::Running => "Running",
            MachineStatus::Waiting => "Waiting",
            MachineStatus::Paused => "Paused",
        }
    }

    /// Whether an emulator process is attached, in any sub-state.
    pub fn is_running(self) -> bool {
        !matches!(self, MachineStatus::Stopped)
    }

    fn to_u8(self) -> u8 {
        match self {
            MachineStatus::Stopped => 0,
            MachineStatus::Running => 1,
            MachineStatus::Waiting => 2,
            MachineStatus::Paused => 3,
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            1 => MachineStatus::Running,
            2 => MachineStatus::Waiting,
            3 => MachineStatus::Paused,
            _ => MachineStatus::Stopped,
        }
    }
}

impl fmt::Display for MachineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.text())
    }
}

impl std::str::FromStr for MachineStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stopped" => Ok(MachineStatus::Stopped),
            "running" => Ok(MachineStatus::Running),
            "waiting" => Ok(MachineStatus::Waiting),
            "paused" => Ok(MachineStatus::Paused),
            other => Err(format!("unknown machine status '{other}'")),
        }
    }
}

/// Thread-shared status of one VM.
#[derive(Debug, Default)]
pub struct StatusCell {
    status: AtomicU8,
    /// Latched when the VM enters `Waiting`; consumed by the config gate.
    has_waited: AtomicBool,
    /// The emulator is about to show its settings dialog.
    is_config: AtomicBool,
}

impl StatusCell {
    pub fn new(status: MachineStatus) -> Self {
        let cell = Self::default();
        cell.set_status(status);
        cell
    }

    pub fn status(&self) -> MachineStatus {
        MachineStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    /// Store a new status. Entering `Waiting` latches the "has waited" flag.
    pub fn set_status(&self, status: MachineStatus) {
        self.status.store(status.to_u8(), Ordering::Release);
        if status == MachineStatus::Waiting {
            self.has_waited.store(true, Ordering::Release);
        }
    }

    pub fn is_running(&self) -> bool {
        self.status().is_running()
    }

    /// Read and clear the "has waited" latch.
    pub fn take_waited(&self) -> bool {
        self.has_waited.swap(false, Ordering::AcqRel)
    }

    pub fn set_configuring(&self, is_config: bool) {
        self.is_config.store(is_config, Ordering::Release);
    }

    pub fn is_configuring(&self) -> bool {
        self.is_config.load(Ordering::Acquire)
    }

    /// Decide whether a config-file change should be parsed now.
    ///
    /// While the emulator runs it rewrites its config in ways that do not
    /// reflect committed settings. A stopped VM always parses. A running VM
    /// parses once after it leaves `Waiting`. Otherwise parsing is allowed
    /// when the platform cannot report pause edges or the VM is about to be
    /// reconfigured.
    pub fn should_parse_config(&self, pause_events: bool) -> bool {
        match self.status() {
            MachineStatus::Stopped => true,
            MachineStatus::Running if self.take_waited() => true,
            _ => !pause_events || self.is_configuring(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stopped_always_parses() {
        let cell = StatusCell::new(MachineStatus::Stopped);
        assert!(cell.should_parse_config(true));
        assert!(cell.should_parse_config(false));
    }

    #[test]
    fn test_running_with_pause_events_skips() {
        let cell = StatusCell::new(MachineStatus::Running);
        assert!(!cell.should_parse_config(true));
        assert!(cell.should_parse_config(false));
    }

    #[test]
    fn test_leaving_waiting_parses_once() {
        let cell = StatusCell::new(MachineStatus::Running);
        cell.set_status(MachineStatus::Waiting);
        // Still waiting: the latch is not consumed.
        assert!(!cell.should_parse_config(true));

        cell.set_status(MachineStatus::Running);
        assert!(cell.should_parse_config(true));
        assert!(!cell.should_parse_config(true));
    }

    #[test]
    fn test_configuring_allows_parse_while_paused() {
        let cell = StatusCell::new(MachineStatus::Paused);
        assert!(!cell.should_parse_config(true));
        cell.set_configuring(true);
        assert!(cell.should_parse_config(true));
    }

    #[test]
    fn test_status_round_trips_through_text() {
        for status in [
            MachineStatus::Stopped,
            MachineStatus::Running,
            MachineStatus::Waiting,
            MachineStatus::Paused,
        ] {
            assert_eq!(status.text().parse::<MachineStatus>(), Ok(status));
        }
        assert!(!MachineStatus::Stopped.is_running());
        assert!(MachineStatus::Paused.is_running());
    }
}
