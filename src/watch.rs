//! Filesystem watchers for the selected VM folder.
//!
//! The primary watcher observes the VM folder recursively and forwards every
//! notification to a sink. Native watchers do not report the disappearance of
//! their own root, so a second, non-recursive watcher observes the parent
//! folder: when something there is removed or renamed and the root no longer
//! exists, watching is disabled.
//!
//! Like the config hot-reload watcher, both use the platform-native backend
//! and fall back to a `PollWatcher` when it cannot be created.

use crate::coalescer::{ChangeKind, FsNotification};
use crate::error::WatchError;
use notify::event::{ModifyKind, RenameMode};
use notify::{Config as NotifyConfig, Event, EventKind, PollWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Receiver of classified-to-be notifications. Called on watcher threads.
pub type NotificationSink = Arc<dyn Fn(&FsNotification) + Send + Sync>;

/// Primary + parent watcher pair for one folder at a time.
pub struct FolderWatch {
    sink: NotificationSink,
    poll_interval: Duration,
    /// Enable switch shared by the handlers of the current pair only.
    enabled: Arc<AtomicBool>,
    primary: Option<Box<dyn Watcher + Send>>,
    parent: Option<Box<dyn Watcher + Send>>,
    root: Option<PathBuf>,
}

impl std::fmt::Debug for FolderWatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FolderWatch")
            .field("root", &self.root)
            .field("enabled", &self.is_enabled())
            .field("has_parent_watcher", &self.parent.is_some())
            .finish_non_exhaustive()
    }
}

impl FolderWatch {
    pub fn new(sink: NotificationSink, poll_interval: Duration) -> Self {
        Self {
            sink,
            poll_interval,
            enabled: Arc::new(AtomicBool::new(false)),
            primary: None,
            parent: None,
            root: None,
        }
    }

    /// Watch `root` (and its parent) and enable raising notifications.
    ///
    /// Any previous watchers are dropped first. On error watching stays
    /// disabled.
    pub fn point_at(&mut self, root: &Path) -> Result<(), WatchError> {
        self.shutdown();

        let enabled = Arc::new(AtomicBool::new(false));
        self.enabled = Arc::clone(&enabled);
        self.root = Some(root.to_path_buf());

        let handler = primary_handler(Arc::clone(&enabled), Arc::clone(&self.sink));
        let mut primary = create_watcher(handler, self.poll_interval)?;
        primary
            .watch(root, RecursiveMode::Recursive)
            .map_err(|source| WatchError::WatchPath {
                path: root.to_path_buf(),
                source,
            })?;
        self.primary = Some(primary);

        if let Some(parent_dir) = parent_folder(root) {
            let handler = parent_handler(Arc::clone(&enabled), root.to_path_buf());
            let mut parent = create_watcher(handler, self.poll_interval)?;
            parent
                .watch(&parent_dir, RecursiveMode::NonRecursive)
                .map_err(|source| WatchError::WatchPath {
                    path: parent_dir.clone(),
                    source,
                })?;
            self.parent = Some(parent);
        }

        enabled.store(true, Ordering::SeqCst);
        log::info!("Watching {}", root.display());
        Ok(())
    }

    /// Stop raising notifications. The OS watchers stay registered until the
    /// next [`point_at`](Self::point_at) or [`shutdown`](Self::shutdown).
    pub fn disable(&self) {
        self.enabled.store(false, Ordering::SeqCst);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    /// Disable and release both OS watchers.
    pub fn shutdown(&mut self) {
        self.disable();
        self.primary = None;
        self.parent = None;
        self.root = None;
    }
}

/// Parent of `path` after trimming trailing separators, if there is one.
pub fn parent_folder(path: &Path) -> Option<PathBuf> {
    path.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
}

/// Translate a notify event into zero or more notifications.
///
/// Access events carry no change. A rename reported as one event with both
/// names yields only the new name.
pub fn to_notifications(event: &Event) -> Vec<FsNotification> {
    let kind = match event.kind {
        EventKind::Create(_) => ChangeKind::Created,
        EventKind::Remove(_) => ChangeKind::Deleted,
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            return event
                .paths
                .last()
                .map(|p| vec![FsNotification::new(ChangeKind::Renamed, p.clone())])
                .unwrap_or_default();
        }
        EventKind::Modify(ModifyKind::Name(_)) => ChangeKind::Renamed,
        EventKind::Modify(_) => ChangeKind::Changed,
        EventKind::Access(_) | EventKind::Any | EventKind::Other => return Vec::new(),
    };
    event
        .paths
        .iter()
        .map(|p| FsNotification::new(kind, p.clone()))
        .collect()
}

fn primary_handler(
    enabled: Arc<AtomicBool>,
    sink: NotificationSink,
) -> impl Fn(notify::Result<Event>) + Clone + Send + 'static {
    move |result: notify::Result<Event>| {
        if !enabled.load(Ordering::SeqCst) {
            return;
        }
        match result {
            Ok(event) => {
                for notification in to_notifications(&event) {
                    sink(&notification);
                }
            }
            Err(e) => {
                log::warn!("Folder watcher failed, disabling: {}", e);
                enabled.store(false, Ordering::SeqCst);
            }
        }
    }
}

fn parent_handler(
    enabled: Arc<AtomicBool>,
    root: PathBuf,
) -> impl Fn(notify::Result<Event>) + Clone + Send + 'static {
    move |result: notify::Result<Event>| {
        if !enabled.load(Ordering::SeqCst) {
            return;
        }
        let Ok(event) = result else { return };
        let removed_or_renamed = matches!(
            event.kind,
            EventKind::Remove(_) | EventKind::Modify(ModifyKind::Name(_))
        );
        if removed_or_renamed && !root.is_dir() {
            log::info!(
                "Watched folder {} disappeared, disabling watchers",
                root.display()
            );
            enabled.store(false, Ordering::SeqCst);
        }
    }
}

fn create_watcher<H>(handler: H, poll_interval: Duration) -> Result<Box<dyn Watcher + Send>, WatchError>
where
    H: Fn(notify::Result<Event>) + Clone + Send + 'static,
{
    match notify::recommended_watcher(handler.clone()) {
        Ok(w) => Ok(Box::new(w)),
        Err(e) => {
            log::warn!(
                "Folder watcher: native backend unavailable ({}); falling back to PollWatcher",
                e
            );
            let poll_watcher = PollWatcher::new(
                handler,
                NotifyConfig::default().with_poll_interval(poll_interval),
            )
            .map_err(WatchError::Create)?;
            Ok(Box::new(poll_watcher))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange, RemoveKind};
    use parking_lot::Mutex;
    use std::fs;
    use tempfile::TempDir;

    fn recording_sink() -> (NotificationSink, Arc<Mutex<Vec<FsNotification>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_in_sink = Arc::clone(&seen);
        let sink: NotificationSink = Arc::new(move |n: &FsNotification| {
            seen_in_sink.lock().push(n.clone());
        });
        (sink, seen)
    }

    #[test]
    fn test_parent_folder() {
        assert_eq!(
            parent_folder(Path::new("/vms/Win98/")),
            Some(PathBuf::from("/vms"))
        );
        assert_eq!(
            parent_folder(Path::new("/vms/Win98")),
            Some(PathBuf::from("/vms"))
        );
        assert_eq!(parent_folder(Path::new("Win98")), None);
        assert_eq!(parent_folder(Path::new("/")), None);
    }

    #[test]
    fn test_event_mapping() {
        let created = Event::new(EventKind::Create(CreateKind::File)).add_path("/a/x".into());
        assert_eq!(
            to_notifications(&created),
            vec![FsNotification::new(ChangeKind::Created, "/a/x")]
        );

        let modified = Event::new(EventKind::Modify(ModifyKind::Data(DataChange::Content)))
            .add_path("/a/y".into());
        assert_eq!(to_notifications(&modified)[0].kind, ChangeKind::Changed);

        let removed = Event::new(EventKind::Remove(RemoveKind::Any)).add_path("/a/z".into());
        assert_eq!(to_notifications(&removed)[0].kind, ChangeKind::Deleted);

        let renamed = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
            .add_path("/a/old".into())
            .add_path("/a/new".into());
        assert_eq!(
            to_notifications(&renamed),
            vec![FsNotification::new(ChangeKind::Renamed, "/a/new")]
        );

        let access = Event::new(EventKind::Access(notify::event::AccessKind::Any))
            .add_path("/a/x".into());
        assert!(to_notifications(&access).is_empty());
    }

    #[test]
    fn test_point_at_missing_folder_fails_disabled() {
        let (sink, _) = recording_sink();
        let mut watch = FolderWatch::new(sink, Duration::from_millis(50));
        let result = watch.point_at(Path::new("/nonexistent/vmdeck/watch/test"));
        assert!(result.is_err());
        assert!(!watch.is_enabled());
    }

    #[test]
    fn test_disabled_watch_forwards_nothing() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let (sink, seen) = recording_sink();
        let mut watch = FolderWatch::new(sink, Duration::from_millis(50));
        watch.point_at(temp_dir.path()).expect("watch");
        assert!(watch.is_enabled());
        assert_eq!(watch.root(), Some(temp_dir.path()));

        watch.disable();
        fs::write(temp_dir.path().join("disk.img"), b"data").expect("write");
        std::thread::sleep(Duration::from_millis(200));
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn test_file_change_is_forwarded() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let (sink, seen) = recording_sink();
        let mut watch = FolderWatch::new(sink, Duration::from_millis(50));
        watch.point_at(temp_dir.path()).expect("watch");

        std::thread::sleep(Duration::from_millis(100));
        fs::write(temp_dir.path().join("disk.img"), b"data").expect("write");
        std::thread::sleep(Duration::from_millis(500));

        // Backend latency is platform-dependent, so only check what arrived.
        for n in seen.lock().iter() {
            assert!(n.path.starts_with(temp_dir.path()) || n.path.ends_with("disk.img"));
        }
    }

    #[test]
    fn test_root_removal_disables_watching() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let root = temp_dir.path().join("Win98");
        fs::create_dir(&root).expect("mkdir");

        let (sink, _) = recording_sink();
        let mut watch = FolderWatch::new(sink, Duration::from_millis(50));
        watch.point_at(&root).expect("watch");

        std::thread::sleep(Duration::from_millis(100));
        fs::rename(&root, temp_dir.path().join("Win98-moved")).expect("rename");

        let deadline = std::time::Instant::now() + Duration::from_secs(3);
        while watch.is_enabled() && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        // Native backends report the rename in the parent; poll backends may not.
        if !watch.is_enabled() {
            assert!(!root.exists());
        }
    }
}
