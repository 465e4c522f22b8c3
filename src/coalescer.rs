//! Change event classification and debouncing.
//!
//! Watcher threads feed raw notifications into [`Coalescer::on_notification`].
//! Each one is classified against the live [`WatchedTarget`] into an
//! [`UpdateEvent`] and pushed onto the debounce buffer; the first event of a
//! quiet period arms the debounce timer. When the timer fires, the UI thread
//! drains the buffer into one merged event.

use crate::error::EngineError;
use crate::status::StatusCell;
use crate::timer::OneShotTimer;
use arc_swap::ArcSwapOption;
use parking_lot::Mutex;
use std::ops::{BitOr, BitOrAssign};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Emulator config file name inside a VM folder.
pub const CONFIG_FILE_NAME: &str = "86box.cfg";
/// Screenshot folder name inside a VM folder.
pub const SCREENSHOTS_DIR_NAME: &str = "screenshots";
/// Printer tray folder name inside a VM folder.
pub const PRINTER_DIR_NAME: &str = "printer";

/// What needs recomputing after a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UpdateEvent {
    pub parse_config: bool,
    pub check_folders: bool,
    pub check_size: bool,
}

impl UpdateEvent {
    pub const NONE: UpdateEvent = UpdateEvent {
        parse_config: false,
        check_folders: false,
        check_size: false,
    };

    pub const ALL: UpdateEvent = UpdateEvent {
        parse_config: true,
        check_folders: true,
        check_size: true,
    };

    pub fn is_empty(&self) -> bool {
        !(self.parse_config || self.check_folders || self.check_size)
    }
}

impl BitOr for UpdateEvent {
    type Output = UpdateEvent;

    fn bitor(self, rhs: UpdateEvent) -> UpdateEvent {
        UpdateEvent {
            parse_config: self.parse_config || rhs.parse_config,
            check_folders: self.check_folders || rhs.check_folders,
            check_size: self.check_size || rhs.check_size,
        }
    }
}

impl BitOrAssign for UpdateEvent {
    fn bitor_assign(&mut self, rhs: UpdateEvent) {
        *self = *self | rhs;
    }
}

/// Kind of a raw filesystem notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Changed,
    Deleted,
    Renamed,
}

/// A raw filesystem notification with the full path it concerns.
///
/// For renames the path is the new name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsNotification {
    pub kind: ChangeKind,
    pub path: PathBuf,
}

impl FsNotification {
    pub fn new(kind: ChangeKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
        }
    }
}

/// The VM currently being observed, with its derived subpaths.
#[derive(Debug)]
pub struct WatchedTarget {
    id: u64,
    root: PathBuf,
    config_file: PathBuf,
    screenshots: PathBuf,
    printer: PathBuf,
    // Lowercased copies for case-insensitive matching.
    config_key: String,
    screenshots_key: String,
    printer_key: String,
    status: Arc<StatusCell>,
    pause_events: bool,
}

impl WatchedTarget {
    /// Derive the target for the VM folder `root` (made absolute).
    pub fn new(id: u64, root: &Path, status: Arc<StatusCell>, pause_events: bool) -> Self {
        let root = absolute(root);
        let config_file = root.join(CONFIG_FILE_NAME);
        let screenshots = root.join(SCREENSHOTS_DIR_NAME);
        let printer = root.join(PRINTER_DIR_NAME);
        Self {
            id,
            config_key: path_key(&config_file),
            screenshots_key: path_key(&screenshots),
            printer_key: path_key(&printer),
            root,
            config_file,
            screenshots,
            printer,
            status,
            pause_events,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_file(&self) -> &Path {
        &self.config_file
    }

    pub fn screenshots(&self) -> &Path {
        &self.screenshots
    }

    pub fn printer(&self) -> &Path {
        &self.printer
    }

    /// Status of the VM, shared with its view.
    pub fn status(&self) -> Arc<StatusCell> {
        Arc::clone(&self.status)
    }

    /// Classify one notification.
    ///
    /// The screenshot folder uses a prefix match because some platforms
    /// report a single notification for several new files.
    pub fn classify(&self, notification: &FsNotification) -> UpdateEvent {
        let key = path_key(&notification.path);

        if key == self.config_key {
            UpdateEvent {
                parse_config: self.status.should_parse_config(self.pause_events),
                check_folders: false,
                check_size: true,
            }
        } else if key == self.printer_key || key.starts_with(&self.screenshots_key) {
            UpdateEvent {
                parse_config: false,
                check_folders: true,
                check_size: true,
            }
        } else if notification.kind == ChangeKind::Renamed {
            UpdateEvent {
                parse_config: false,
                check_folders: true,
                check_size: false,
            }
        } else {
            UpdateEvent {
                parse_config: false,
                check_folders: false,
                check_size: true,
            }
        }
    }
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

fn path_key(path: &Path) -> String {
    path.to_string_lossy().to_lowercase()
}

/// Thread-safe queue of classified events.
#[derive(Debug, Default)]
pub struct DebounceBuffer {
    events: Mutex<Vec<UpdateEvent>>,
}

impl DebounceBuffer {
    pub fn push(&self, event: UpdateEvent) {
        self.events.lock().push(event);
    }

    /// Remove every queued event and return their union.
    pub fn drain(&self) -> UpdateEvent {
        self.events
            .lock()
            .drain(..)
            .fold(UpdateEvent::NONE, |acc, e| acc | e)
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

/// Classifies notifications for the live target and debounces them.
pub struct Coalescer {
    target: ArcSwapOption<WatchedTarget>,
    buffer: DebounceBuffer,
    timer: ArcSwapOption<OneShotTimer>,
}

impl std::fmt::Debug for Coalescer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coalescer")
            .field("target", &self.target.load().as_ref().map(|t| t.id()))
            .field("buffered", &self.buffer.len())
            .finish_non_exhaustive()
    }
}

impl Coalescer {
    /// `on_elapsed` runs on the timer thread once a quiet period ends.
    pub fn new<F>(interval: Duration, on_elapsed: F) -> Result<Self, EngineError>
    where
        F: FnMut() + Send + 'static,
    {
        let timer = OneShotTimer::new("vmdeck-debounce", interval, on_elapsed)?;
        Ok(Self {
            target: ArcSwapOption::empty(),
            buffer: DebounceBuffer::default(),
            timer: ArcSwapOption::from_pointee(timer),
        })
    }

    /// Classify and buffer `notification`. Dropped when nothing is watched.
    pub fn on_notification(&self, notification: &FsNotification) -> Option<UpdateEvent> {
        let guard = self.target.load();
        let target = guard.as_ref()?;
        let event = target.classify(notification);
        log::trace!(
            "{:?} {} -> {:?}",
            notification.kind,
            notification.path.display(),
            event
        );

        self.buffer.push(event);
        if let Some(timer) = self.timer.load().as_ref() {
            // No-op while armed: a burst never extends the quiet period.
            timer.start();
        }
        Some(event)
    }

    pub fn set_target(&self, target: Option<WatchedTarget>) {
        self.target.store(target.map(Arc::new));
    }

    pub fn target(&self) -> Option<Arc<WatchedTarget>> {
        self.target.load_full()
    }

    /// Drop buffered events and disarm the debounce timer.
    pub fn reset(&self) {
        self.buffer.clear();
        if let Some(timer) = self.timer.load().as_ref() {
            timer.stop();
        }
    }

    /// Take the union of all buffered events.
    pub fn drain(&self) -> UpdateEvent {
        self.buffer.drain()
    }

    pub fn is_armed(&self) -> bool {
        self.timer
            .load()
            .as_ref()
            .is_some_and(|timer| timer.is_enabled())
    }

    /// Dispose the debounce timer. Later notifications are still buffered but
    /// never dispatched.
    pub fn dispose(&self) {
        self.reset();
        self.timer.store(None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::MachineStatus;

    fn target(status: MachineStatus, pause_events: bool) -> WatchedTarget {
        WatchedTarget::new(
            1,
            Path::new("/vms/Win98"),
            Arc::new(StatusCell::new(status)),
            pause_events,
        )
    }

    fn event(kind: ChangeKind, path: &str) -> FsNotification {
        FsNotification::new(kind, path)
    }

    #[test]
    fn test_config_change_on_stopped_vm_parses() {
        let t = target(MachineStatus::Stopped, true);
        let e = t.classify(&event(ChangeKind::Changed, "/vms/Win98/86box.cfg"));
        assert_eq!(
            e,
            UpdateEvent {
                parse_config: true,
                check_folders: false,
                check_size: true,
            }
        );
    }

    #[test]
    fn test_config_match_is_case_insensitive() {
        let t = target(MachineStatus::Stopped, true);
        let e = t.classify(&event(ChangeKind::Changed, "/VMS/win98/86Box.CFG"));
        assert!(e.parse_config);
    }

    #[test]
    fn test_config_change_while_running_skips_parse() {
        let t = target(MachineStatus::Running, true);
        let e = t.classify(&event(ChangeKind::Changed, "/vms/Win98/86box.cfg"));
        assert!(!e.parse_config);
        assert!(e.check_size);
        assert!(!e.check_folders);
    }

    #[test]
    fn test_screenshot_prefix_and_printer_check_folders() {
        let t = target(MachineStatus::Stopped, true);
        for path in [
            "/vms/Win98/screenshots/Monitor_1_20240101.png",
            "/vms/Win98/Screenshots",
            "/vms/Win98/printer",
        ] {
            let e = t.classify(&event(ChangeKind::Created, path));
            assert!(e.check_folders, "{path}");
            assert!(e.check_size, "{path}");
            assert!(!e.parse_config, "{path}");
        }
    }

    #[test]
    fn test_rename_elsewhere_checks_folders_only() {
        let t = target(MachineStatus::Stopped, true);
        let e = t.classify(&event(ChangeKind::Renamed, "/vms/Win98/shots"));
        assert_eq!(
            e,
            UpdateEvent {
                parse_config: false,
                check_folders: true,
                check_size: false,
            }
        );
    }

    #[test]
    fn test_other_change_checks_size_only() {
        let t = target(MachineStatus::Stopped, true);
        let e = t.classify(&event(ChangeKind::Changed, "/vms/Win98/disk.img"));
        assert_eq!(
            e,
            UpdateEvent {
                parse_config: false,
                check_folders: false,
                check_size: true,
            }
        );
    }

    #[test]
    fn test_buffer_drain_is_union() {
        let buffer = DebounceBuffer::default();
        buffer.push(UpdateEvent {
            check_size: true,
            ..UpdateEvent::NONE
        });
        buffer.push(UpdateEvent {
            check_folders: true,
            ..UpdateEvent::NONE
        });
        assert_eq!(buffer.len(), 2);

        let merged = buffer.drain();
        assert!(merged.check_size && merged.check_folders && !merged.parse_config);
        assert!(buffer.is_empty());
        assert!(buffer.drain().is_empty());
    }

    #[test]
    fn test_no_target_drops_notifications() {
        let coalescer = Coalescer::new(Duration::from_secs(60), || {}).expect("coalescer");
        assert!(
            coalescer
                .on_notification(&event(ChangeKind::Changed, "/vms/Win98/disk.img"))
                .is_none()
        );
        assert!(!coalescer.is_armed());
        assert!(coalescer.drain().is_empty());
    }

    #[test]
    fn test_first_event_arms_timer_and_reset_disarms() {
        let coalescer = Coalescer::new(Duration::from_secs(60), || {}).expect("coalescer");
        coalescer.set_target(Some(target(MachineStatus::Stopped, true)));

        coalescer.on_notification(&event(ChangeKind::Changed, "/vms/Win98/disk.img"));
        assert!(coalescer.is_armed());
        coalescer.on_notification(&event(ChangeKind::Created, "/vms/Win98/printer"));

        coalescer.reset();
        assert!(!coalescer.is_armed());
        assert!(coalescer.drain().is_empty());
    }

    #[test]
    fn test_dispose_drops_timer() {
        let coalescer = Coalescer::new(Duration::from_secs(60), || {}).expect("coalescer");
        coalescer.set_target(Some(target(MachineStatus::Stopped, true)));
        coalescer.dispose();
        coalescer.on_notification(&event(ChangeKind::Changed, "/vms/Win98/disk.img"));
        assert!(!coalescer.is_armed());
    }
}
