//! UI-owned view of one VM.
//!
//! A [`VmView`] is only ever touched on the UI thread; it is shared between
//! the VM list and the engine as `Rc<RefCell<_>>`. The engine writes derived
//! state (config, size, attachments) onto it, and every property that changes
//! bumps its own revision counter so observers can tell which writes happened.

use crate::status::{MachineStatus, StatusCell};
use crate::time_format::{ElapsedText, format_elapsed, format_elapsed_short};
use crate::vm_config::RawConfig;
use chrono::{DateTime, Local, TimeDelta};
use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Arc;

/// Shared handle to a view. Identity (`Rc::ptr_eq`) is what selection compares.
pub type VmViewRef = Rc<RefCell<VmView>>;

/// Observable properties of a view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViewProperty {
    Status,
    Config,
    Size,
    PrintTray,
    Images,
    SinceCreated,
    SinceRun,
    Uptime,
}

impl ViewProperty {
    pub const ALL: [ViewProperty; 8] = [
        ViewProperty::Status,
        ViewProperty::Config,
        ViewProperty::Size,
        ViewProperty::PrintTray,
        ViewProperty::Images,
        ViewProperty::SinceCreated,
        ViewProperty::SinceRun,
        ViewProperty::Uptime,
    ];

    fn index(self) -> usize {
        self as usize
    }
}

/// Clocks below a week refresh every 30 s, older ones every 30 min.
fn refresh_due(since: TimeDelta, shown: Option<TimeDelta>) -> bool {
    let Some(shown) = shown else { return true };
    let moved = since - shown;
    if since < TimeDelta::days(7) {
        moved > TimeDelta::seconds(30)
    } else {
        moved > TimeDelta::minutes(30)
    }
}

/// Stored dates of a VM plus the spans last rendered from them.
#[derive(Debug, Default)]
struct ViewClock {
    created: Option<DateTime<Local>>,
    last_run: Option<DateTime<Local>>,
    stored_uptime: Option<TimeDelta>,
    /// Cleared when the emulator only showed its settings dialog.
    commit_uptime: bool,

    duration: TimeDelta,
    shown_created: Option<TimeDelta>,
    shown_run: Option<TimeDelta>,
    shown_total: Option<TimeDelta>,
}

pub struct VmView {
    id: u64,
    name: String,
    path: PathBuf,
    status: Arc<StatusCell>,
    status_text: &'static str,
    config: Option<RawConfig>,
    size: Option<String>,
    has_print_tray: bool,
    images: Option<Vec<String>>,
    since_created: Option<String>,
    since_run: Option<String>,
    uptime: ElapsedText,
    clock: ViewClock,
    revisions: [u64; ViewProperty::ALL.len()],
    status_hook: Option<Box<dyn Fn()>>,
}

impl std::fmt::Debug for VmView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VmView")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("path", &self.path)
            .field("status", &self.status())
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

impl VmView {
    /// `path` is empty for a VM whose folder does not exist.
    pub fn new(id: u64, name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            id,
            name: name.into(),
            path: path.into(),
            status: Arc::new(StatusCell::default()),
            status_text: MachineStatus::Stopped.text(),
            config: None,
            size: None,
            has_print_tray: false,
            images: None,
            since_created: None,
            since_run: None,
            uptime: format_elapsed(TimeDelta::zero(), "None", ""),
            clock: ViewClock::default(),
            revisions: [0; ViewProperty::ALL.len()],
            status_hook: None,
        }
    }

    pub fn into_ref(self) -> VmViewRef {
        Rc::new(RefCell::new(self))
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn status(&self) -> MachineStatus {
        self.status.status()
    }

    pub fn status_cell(&self) -> Arc<StatusCell> {
        Arc::clone(&self.status)
    }

    pub fn is_running(&self) -> bool {
        self.status.is_running()
    }

    pub fn revision(&self, property: ViewProperty) -> u64 {
        self.revisions[property.index()]
    }

    fn bump(&mut self, property: ViewProperty) {
        self.revisions[property.index()] += 1;
    }

    /// Update the emulator status. A change of status text notifies the
    /// attached status hook.
    pub fn set_status(&mut self, status: MachineStatus) {
        self.status.set_status(status);
        let text = status.text();
        if text != self.status_text {
            self.status_text = text;
            self.bump(ViewProperty::Status);
            if let Some(hook) = &self.status_hook {
                hook();
            }
        }
    }

    pub fn status_text(&self) -> &'static str {
        self.status_text
    }

    /// Flag that the emulator is about to open its settings dialog.
    pub fn set_configuring(&mut self, is_config: bool) {
        self.status.set_configuring(is_config);
    }

    pub(crate) fn attach_status_hook(&mut self, hook: Box<dyn Fn()>) {
        self.status_hook = Some(hook);
    }

    pub(crate) fn detach_status_hook(&mut self) {
        self.status_hook = None;
    }

    pub fn has_status_hook(&self) -> bool {
        self.status_hook.is_some()
    }

    pub fn config(&self) -> Option<&RawConfig> {
        self.config.as_ref()
    }

    pub fn set_config(&mut self, config: RawConfig) {
        if self.config.as_ref() != Some(&config) {
            self.config = Some(config);
            self.bump(ViewProperty::Config);
        }
    }

    pub fn size(&self) -> Option<&str> {
        self.size.as_deref()
    }

    pub fn set_size(&mut self, size: String) {
        if self.size.as_deref() != Some(size.as_str()) {
            self.size = Some(size);
            self.bump(ViewProperty::Size);
        }
    }

    pub fn has_print_tray(&self) -> bool {
        self.has_print_tray
    }

    pub fn set_has_print_tray(&mut self, has_print_tray: bool) {
        if self.has_print_tray != has_print_tray {
            self.has_print_tray = has_print_tray;
            self.bump(ViewProperty::PrintTray);
        }
    }

    pub fn images(&self) -> Option<&[String]> {
        self.images.as_deref()
    }

    pub fn set_images(&mut self, images: Vec<String>) {
        if self.images.as_ref() != Some(&images) {
            self.images = Some(images);
            self.bump(ViewProperty::Images);
        }
    }

    pub fn since_created(&self) -> Option<&str> {
        self.since_created.as_deref()
    }

    pub fn since_run(&self) -> Option<&str> {
        self.since_run.as_deref()
    }

    pub fn uptime(&self) -> String {
        self.uptime.full()
    }

    /// Load the stored dates. Uptime is only committed for runs with a known start.
    pub fn set_times(
        &mut self,
        created: Option<DateTime<Local>>,
        last_run: Option<DateTime<Local>>,
        uptime: Option<TimeDelta>,
    ) {
        self.clock.created = created;
        self.clock.last_run = last_run;
        self.clock.commit_uptime = last_run.is_some();
        self.clock.stored_uptime = uptime;
    }

    /// Re-derive the clocks from the stored dates.
    pub fn calc_time(&mut self, now: DateTime<Local>) {
        self.clock.duration = self.clock.stored_uptime.unwrap_or_default();
        self.update_clocks(now);
    }

    /// Record the start of a run.
    pub fn set_last_run(&mut self, when: DateTime<Local>, now: DateTime<Local>) {
        self.clock.last_run = Some(when);
        self.clock.commit_uptime = true;
        let since = now - when;
        self.clock.shown_run = Some(since);
        self.set_since_run(format_elapsed(since, "Just now", "ago").full());

        if self.is_running() {
            self.clock.shown_total = None;
            self.update_clocks(now);
        }
    }

    /// Add the time since the last run to the stored uptime, once per run.
    pub fn commit_uptime(&mut self, now: DateTime<Local>) {
        if !self.clock.commit_uptime {
            return;
        }
        let Some(last_run) = self.clock.last_run else { return };
        self.clock.commit_uptime = false;
        let total = self.clock.stored_uptime.unwrap_or_default() + (now - last_run);
        self.clock.stored_uptime = Some(total);
        self.clock.duration = total;
    }

    /// The current run is not a real run (settings dialog only).
    pub fn cancel_uptime(&mut self) {
        self.clock.commit_uptime = false;
    }

    pub fn stored_uptime(&self) -> Option<TimeDelta> {
        self.clock.stored_uptime
    }

    /// Refresh the elapsed-time strings that moved enough since last shown.
    pub fn update_clocks(&mut self, now: DateTime<Local>) {
        if let Some(created) = self.clock.created {
            let since = now - created;
            if refresh_due(since, self.clock.shown_created) {
                self.clock.shown_created = Some(since);
                self.set_since_created(format_elapsed_short(since, "Just created"));
            }
        }

        let since_run = self.clock.last_run.map(|last_run| now - last_run);
        if let Some(since) = since_run {
            if refresh_due(since, self.clock.shown_run) {
                self.clock.shown_run = Some(since);
                self.set_since_run(format_elapsed(since, "Just now", "ago").full());
            }
        }

        if self.is_running() {
            let total = self.clock.duration + since_run.unwrap_or_default();
            if refresh_due(total, self.clock.shown_total) {
                self.clock.shown_total = Some(total);
                if self.clock.commit_uptime {
                    self.set_uptime(format_elapsed(total, "Just started", ""));
                }
            }
        } else if self.clock.shown_total.unwrap_or_default() < self.clock.duration {
            let duration = self.clock.duration;
            self.set_uptime(format_elapsed(duration, "Just started", ""));
            self.clock.shown_total = Some(duration);
        }
    }

    fn set_since_created(&mut self, text: String) {
        if self.since_created.as_deref() != Some(text.as_str()) {
            self.since_created = Some(text);
            self.bump(ViewProperty::SinceCreated);
        }
    }

    fn set_since_run(&mut self, text: String) {
        if self.since_run.as_deref() != Some(text.as_str()) {
            self.since_run = Some(text);
            self.bump(ViewProperty::SinceRun);
        }
    }

    /// Uptime never moves backwards.
    fn set_uptime(&mut self, uptime: ElapsedText) {
        if uptime.span() < self.uptime.span() {
            return;
        }
        if uptime != self.uptime {
            self.uptime = uptime;
            self.bump(ViewProperty::Uptime);
        }
    }
}
