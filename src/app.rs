//! Monitor application state.
//!
//! [`MonitorHost`] is the UI-thread state of the `vmdeck` binary: the list of
//! VM views, the selection and the engine. It reports view changes by
//! comparing property revisions against the last report.

use crate::dispatcher::Dispatcher;
use crate::error::EngineError;
use crate::machine::{Machine, MachineHost};
use crate::view::{ViewProperty, VmView, VmViewRef};
use chrono::{DateTime, Local};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use vmdeck_config::EngineConfig;

pub struct MonitorHost {
    machine: Machine<MonitorHost>,
    views: Vec<VmViewRef>,
    selected: Option<usize>,
    reported: HashMap<u64, [u64; ViewProperty::ALL.len()]>,
}

impl MachineHost for MonitorHost {
    fn machine(&mut self) -> &mut Machine<Self> {
        &mut self.machine
    }
}

impl std::fmt::Debug for MonitorHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorHost")
            .field("views", &self.views.len())
            .field("selected", &self.selected)
            .field("machine", &self.machine)
            .finish_non_exhaustive()
    }
}

/// Build a view for `dir`. A folder that does not exist gets an empty path.
///
/// The folder's creation time (or modification time where the platform has
/// none) seeds the "created" clock.
pub fn view_for_dir(id: u64, dir: &Path) -> VmViewRef {
    let name = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| dir.display().to_string());
    if !dir.is_dir() {
        return VmView::new(id, name, PathBuf::new()).into_ref();
    }

    let created = fs::metadata(dir)
        .and_then(|meta| meta.created().or_else(|_| meta.modified()))
        .ok()
        .map(DateTime::<Local>::from);
    let mut view = VmView::new(id, name, dir);
    view.set_times(created, None, None);
    view.into_ref()
}

impl MonitorHost {
    pub fn new(
        config: EngineConfig,
        dispatcher: Dispatcher<MonitorHost>,
    ) -> Result<Self, EngineError> {
        Ok(Self {
            machine: Machine::new(config, dispatcher)?,
            views: Vec::new(),
            selected: None,
            reported: HashMap::new(),
        })
    }

    /// Append a view for each folder.
    pub fn add_folders<I, P>(&mut self, dirs: I)
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        for dir in dirs {
            let id = self.views.len() as u64 + 1;
            self.views.push(view_for_dir(id, dir.as_ref()));
        }
    }

    pub fn engine(&self) -> &Machine<MonitorHost> {
        &self.machine
    }

    pub fn views(&self) -> &[VmViewRef] {
        &self.views
    }

    pub fn selected(&self) -> Option<&VmViewRef> {
        self.selected.and_then(|i| self.views.get(i))
    }

    /// Select the view at `index`. Out of range clears the selection.
    pub fn select(&mut self, index: usize) {
        match self.views.get(index).cloned() {
            Some(view) => {
                self.selected = Some(index);
                debug_info!("MONITOR", "Selecting '{}'", view.borrow().name());
                self.machine.update(&view);
            }
            None => {
                self.selected = None;
                self.machine.clear_current();
            }
        }
    }

    /// Move the selection to the next view, wrapping around.
    pub fn select_next(&mut self) {
        if self.views.is_empty() {
            return;
        }
        let next = self.selected.map_or(0, |i| (i + 1) % self.views.len());
        self.select(next);
    }

    /// Lines describing the properties of the selected view that changed
    /// since the previous call.
    pub fn changes(&mut self) -> Vec<String> {
        let Some(view) = self.selected().cloned() else {
            return Vec::new();
        };
        let view = view.borrow();
        let last = self.reported.entry(view.id()).or_default();

        let mut lines = Vec::new();
        for (i, property) in ViewProperty::ALL.iter().enumerate() {
            let revision = view.revision(*property);
            if revision == last[i] {
                continue;
            }
            last[i] = revision;
            lines.push(format!("{}: {}", view.name(), describe(&view, *property)));
        }
        if !lines.is_empty() {
            debug_log!("MONITOR", "{} change(s) for '{}'", lines.len(), view.name());
        }
        lines
    }

    /// Tear the engine down. Views stay usable.
    pub fn shutdown(&mut self) {
        self.machine.dispose();
    }
}

/// Human-readable value of one property.
pub fn describe(view: &VmView, property: ViewProperty) -> String {
    match property {
        ViewProperty::Status => format!("status = {}", view.status_text()),
        ViewProperty::Config => {
            let sections = view.config().map_or(0, |c| c.section_count());
            format!("config = {sections} section(s)")
        }
        ViewProperty::Size => format!("size = {}", view.size().unwrap_or("?")),
        ViewProperty::PrintTray => format!("print tray = {}", view.has_print_tray()),
        ViewProperty::Images => match view.images() {
            Some(images) => format!("images = [{}]", images.join(", ")),
            None => "images = []".to_string(),
        },
        ViewProperty::SinceCreated => {
            format!("created = {}", view.since_created().unwrap_or("?"))
        }
        ViewProperty::SinceRun => format!("last run = {}", view.since_run().unwrap_or("never")),
        ViewProperty::Uptime => format!("uptime = {}", view.uptime()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::UiLoop;
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;

    fn host() -> (UiLoop<MonitorHost>, MonitorHost) {
        let (ui, dispatcher) = UiLoop::new();
        let host = MonitorHost::new(EngineConfig::default(), dispatcher).expect("host");
        (ui, host)
    }

    #[test]
    fn test_missing_folder_gets_empty_path() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let view = view_for_dir(1, &temp_dir.path().join("gone"));
        assert!(view.borrow().path().as_os_str().is_empty());
        assert_eq!(view.borrow().name(), "gone");

        let view = view_for_dir(2, temp_dir.path());
        assert_eq!(view.borrow().path(), temp_dir.path());
    }

    #[test]
    fn test_select_next_wraps() {
        let a = TempDir::new().expect("Failed to create temp dir");
        let b = TempDir::new().expect("Failed to create temp dir");
        let (_ui, mut host) = host();
        host.add_folders([a.path(), b.path()]);

        host.select_next();
        assert_eq!(host.selected().map(|v| v.borrow().id()), Some(1));
        host.select_next();
        assert_eq!(host.selected().map(|v| v.borrow().id()), Some(2));
        host.select_next();
        assert_eq!(host.selected().map(|v| v.borrow().id()), Some(1));
        assert_eq!(host.machine.job_id(), 3);

        host.select(10);
        assert!(host.selected().is_none());
        assert!(host.machine.current().is_none());
    }

    #[test]
    fn test_changes_reported_once() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        fs::create_dir(dir.path().join("printer")).expect("mkdir");
        let (mut ui, mut host) = host();
        host.add_folders([dir.path()]);
        host.select(0);

        assert!(ui.pump_until(&mut host, Duration::from_secs(5), |h| {
            h.machine.stats().jobs_applied == 1
        }));
        let lines = host.changes();
        assert!(lines.iter().any(|l| l.ends_with("print tray = true")), "{lines:?}");
        assert!(host.changes().is_empty());
    }
}
