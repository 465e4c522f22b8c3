//! The folder synchronization engine.
//!
//! [`Machine`] follows the selected VM: it points the watchers at its folder,
//! turns debounced change notifications into recomputation jobs on the
//! background executor and applies their results to the VM's view on the UI
//! thread.
//!
//! Every selection change bumps the job id. Results carry the id they were
//! created with and are dropped on apply if it no longer matches, so a slow
//! job for a previous VM can never touch the current one.
//!
//! The machine lives inside the UI state `S` and is reached from posted
//! closures through [`MachineHost`].

use crate::coalescer::{ChangeKind, Coalescer, FsNotification, UpdateEvent, WatchedTarget};
use crate::dispatcher::Dispatcher;
use crate::error::EngineError;
use crate::executor::{BackgroundExecutor, TaskHandle};
use crate::job::{JobResult, JobSnapshot, PendingFlags};
use crate::status::MachineStatus;
use crate::throttle::SizeThrottle;
use crate::timer::IntervalTimer;
use crate::view::VmViewRef;
use crate::watch::{FolderWatch, NotificationSink};
use chrono::Local;
use std::rc::Rc;
use std::sync::Arc;
use vmdeck_config::EngineConfig;

/// UI state that owns a [`Machine`].
pub trait MachineHost: Sized + 'static {
    fn machine(&mut self) -> &mut Machine<Self>;
}

/// Counters describing what the engine did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineStats {
    /// Jobs handed to the executor (full and partial).
    pub jobs_dispatched: u64,
    /// Jobs whose results reached the current view.
    pub jobs_applied: u64,
    /// Results dropped because the selection had moved on.
    pub stale_discards: u64,
    /// Flags of the most recent partial job.
    pub last_dispatched: Option<UpdateEvent>,
}

pub struct Machine<S: 'static> {
    config: EngineConfig,
    dispatcher: Dispatcher<S>,
    executor: Option<BackgroundExecutor<S>>,
    coalescer: Arc<Coalescer>,
    throttle: Arc<SizeThrottle>,
    watch: FolderWatch,
    clock: Option<IntervalTimer>,
    current: Option<VmViewRef>,
    current_task: Option<TaskHandle>,
    pending: PendingFlags,
    job_id: u64,
    stats: EngineStats,
    disposed: bool,
}

impl<S: 'static> std::fmt::Debug for Machine<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Machine")
            .field("job_id", &self.job_id)
            .field("pending", &self.pending)
            .field("watching", &self.watch.is_enabled())
            .field("disposed", &self.disposed)
            .finish_non_exhaustive()
    }
}

impl<S: MachineHost> Machine<S> {
    /// Build the engine: executor, debounce timer, watchers and the clock.
    pub fn new(config: EngineConfig, dispatcher: Dispatcher<S>) -> Result<Self, EngineError> {
        config.validate()?;

        let debounce_dispatcher = dispatcher.clone();
        let coalescer = Arc::new(Coalescer::new(config.debounce_interval(), move || {
            let _ = debounce_dispatcher.post(|host: &mut S| host.machine().handle_change_events());
        })?);

        let sink_coalescer = Arc::clone(&coalescer);
        let sink: NotificationSink = Arc::new(move |notification: &FsNotification| {
            sink_coalescer.on_notification(notification);
        });
        let watch = FolderWatch::new(sink, config.poll_fallback_interval());

        let clock_dispatcher = dispatcher.clone();
        let clock = IntervalTimer::start("vmdeck-clock", config.clock_tick(), move || {
            let _ = clock_dispatcher.post(|host: &mut S| host.machine().tick_clock());
        })?;

        log::info!(
            "Engine started (debounce {:?}, running size interval {:?})",
            config.debounce_interval(),
            config.running_size_check_interval()
        );

        Ok(Self {
            throttle: Arc::new(SizeThrottle::new(config.running_size_check_interval())),
            executor: Some(BackgroundExecutor::new(dispatcher.clone())),
            config,
            dispatcher,
            coalescer,
            watch,
            clock: Some(clock),
            current: None,
            current_task: None,
            pending: PendingFlags::default(),
            job_id: 0,
            stats: EngineStats::default(),
            disposed: false,
        })
    }

    /// Select `view`: reset all per-VM state and start a full recomputation.
    ///
    /// Watchers are re-pointed only once the full job has been applied, so no
    /// notification is classified before a consistent baseline exists.
    pub fn update(&mut self, view: &VmViewRef) {
        if self.disposed {
            return;
        }
        if self.current.as_ref().is_some_and(|c| Rc::ptr_eq(c, view)) {
            return;
        }

        self.detach_current();
        self.current = Some(Rc::clone(view));
        let id = self.begin_generation();

        let (root, status, name) = {
            let v = view.borrow();
            (v.path().to_path_buf(), v.status_cell(), v.name().to_string())
        };

        view.borrow_mut().calc_time(Local::now());

        if root.as_os_str().is_empty() {
            self.coalescer.set_target(None);
            log::info!("Selected '{}' (job {}) has no folder", name, id);
            return;
        }

        let target = WatchedTarget::new(id, &root, status, self.config.pause_events);
        let snapshot = JobSnapshot::new(&target, self.config.max_config_bytes);
        self.coalescer.set_target(Some(target));

        let Some(executor) = &self.executor else { return };
        let throttle = Arc::clone(&self.throttle);
        let handle = executor.post(
            move || snapshot.run_full(&throttle),
            |host: &mut S, result: JobResult| host.machine().apply_initial(result),
        );
        self.current_task = Some(handle);
        self.stats.jobs_dispatched += 1;
        log::info!("Selected '{}' (job {})", name, id);
    }

    /// Deselect without selecting anything else.
    pub fn clear_current(&mut self) {
        self.detach_current();
        self.current = None;
        self.begin_generation();
        self.coalescer.set_target(None);
    }

    /// Feed a notification through classification and debouncing, as the
    /// primary watcher does.
    pub fn notify(&self, notification: &FsNotification) -> Option<UpdateEvent> {
        self.coalescer.on_notification(notification)
    }

    /// Debounce timer elapsed: dispatch one job for everything not already
    /// pending.
    pub fn handle_change_events(&mut self) {
        if self.disposed {
            return;
        }
        let drained = self.coalescer.drain();
        let Some(target) = self.coalescer.target() else { return };
        let flags = self.pending.mask(drained);
        if flags.is_empty() {
            return;
        }
        let Some(executor) = &self.executor else { return };

        let id = self.job_id;
        let snapshot = JobSnapshot::new(&target, self.config.max_config_bytes);
        let throttle = Arc::clone(&self.throttle);
        let query_dispatcher = self.dispatcher.clone();
        let deliver_dispatcher = self.dispatcher.clone();
        let status = target.status();

        executor.post(
            move || {
                let query_running = move || {
                    query_dispatcher
                        .invoke(move |host: &mut S| host.machine().is_running_for(id))
                        .ok()
                        .flatten()
                        .unwrap_or_else(|| status.is_running())
                };
                let deliver = move |size: String| {
                    let _ = deliver_dispatcher
                        .post(move |host: &mut S| host.machine().apply_deferred_size(id, size));
                };
                snapshot.run_partial(flags, &throttle, query_running, deliver)
            },
            |host: &mut S, result: JobResult| host.machine().apply_partial(result),
        );

        self.pending.mark(flags);
        self.stats.jobs_dispatched += 1;
        self.stats.last_dispatched = Some(flags);
        log::debug!("Job {} dispatched: {:?}", id, flags);
    }

    fn apply_initial(&mut self, result: JobResult) {
        if self.disposed || !self.is_current_job(result.id) {
            return;
        }
        let Some(view) = self.current.clone() else { return };
        self.current_task = None;

        {
            let mut v = view.borrow_mut();
            if let Some(config) = result.config {
                v.set_config(config);
            }
            if let Some(size) = result.size {
                v.set_size(size);
            }
            if let Some(scan) = result.folders {
                v.set_has_print_tray(scan.has_printer_folder);
                if let Some(images) = scan.images {
                    v.set_images(images);
                }
            }
        }
        self.stats.jobs_applied += 1;

        if let Err(e) = self.watch.point_at(&result.root) {
            log::warn!("Not watching {}: {}", result.root.display(), e);
        }

        let dispatcher = self.dispatcher.clone();
        let id = result.id;
        view.borrow_mut().attach_status_hook(Box::new(move || {
            let _ = dispatcher.post(move |host: &mut S| host.machine().on_status_text_changed(id));
        }));
    }

    fn apply_partial(&mut self, result: JobResult) {
        if self.disposed || !self.is_current_job(result.id) {
            return;
        }
        let Some(view) = self.current.clone() else { return };
        let mut v = view.borrow_mut();

        if result.computed.parse_config {
            self.pending.config = false;
            if let Some(config) = result.config {
                v.set_config(config);
            }
        }
        if result.computed.check_size {
            self.pending.size = false;
            if let Some(size) = result.size {
                v.set_size(size);
            }
        }
        if result.computed.check_folders {
            self.pending.folders = false;
            if let Some(scan) = result.folders {
                v.set_has_print_tray(scan.has_printer_folder);
                // An empty rescan may have caught the folder mid-write.
                if let Some(images) = scan.images {
                    v.set_images(images);
                }
            }
        }
        self.stats.jobs_applied += 1;
    }

    fn apply_deferred_size(&mut self, id: u64, size: String) {
        if self.disposed || !self.is_current_job(id) {
            return;
        }
        let Some(view) = self.current.clone() else { return };
        self.pending.size = false;
        view.borrow_mut().set_size(size);
    }

    /// Status text of the current view changed. Leaving `Running` with a
    /// deferred size check outstanding runs the check right away.
    fn on_status_text_changed(&mut self, id: u64) {
        if self.disposed || id != self.job_id {
            return;
        }
        let Some(view) = self.current.clone() else { return };
        if !self.pending.size || view.borrow().status() == MachineStatus::Running {
            return;
        }
        if !self.throttle.cancel_deferred() {
            return;
        }

        self.pending.size = false;
        if let Some(target) = self.coalescer.target() {
            log::debug!("VM left running state, flushing deferred size check");
            self.notify(&FsNotification::new(ChangeKind::Changed, target.root()));
        }
    }

    /// Periodic clock tick: refresh the current view's elapsed-time strings.
    pub fn tick_clock(&mut self) {
        if let Some(view) = &self.current {
            view.borrow_mut().update_clocks(Local::now());
        }
    }

    fn is_running_for(&self, id: u64) -> Option<bool> {
        if id != self.job_id {
            return None;
        }
        self.current.as_ref().map(|v| v.borrow().is_running())
    }
}

impl<S: 'static> Machine<S> {
    fn is_current_job(&mut self, id: u64) -> bool {
        if id == self.job_id {
            return true;
        }
        self.stats.stale_discards += 1;
        log::debug!("Discarding result of job {} (current {})", id, self.job_id);
        false
    }

    /// Stop watching the current view and suppress its in-flight full job.
    fn detach_current(&mut self) {
        if let Some(previous) = &self.current {
            previous.borrow_mut().detach_status_hook();
        }
        self.watch.disable();
        if let Some(task) = self.current_task.take() {
            task.cancel();
        }
    }

    /// Allocate the next job id and drop all throttle and debounce state.
    fn begin_generation(&mut self) -> u64 {
        self.job_id += 1;
        self.pending.reset();
        self.coalescer.reset();
        self.throttle.reset(self.job_id);
        self.job_id
    }

    /// Tear everything down. Watchers stop producing first, then the executor
    /// stops consuming, then the timers go.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.watch.shutdown();

        if let Some(executor) = self.executor.take() {
            executor.stop();
        }
        if let Some(task) = self.current_task.take() {
            task.cancel();
        }

        self.throttle.dispose();
        self.coalescer.dispose();
        self.clock = None;

        if let Some(view) = self.current.take() {
            view.borrow_mut().detach_status_hook();
        }
        self.disposed = true;
        log::info!("Engine disposed after {} job(s)", self.job_id);
    }

    pub fn current(&self) -> Option<&VmViewRef> {
        self.current.as_ref()
    }

    pub fn job_id(&self) -> u64 {
        self.job_id
    }

    pub fn pending(&self) -> PendingFlags {
        self.pending
    }

    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    /// Folder size measurements performed so far.
    pub fn size_computations(&self) -> u64 {
        self.throttle.computations()
    }

    pub fn size_check_scheduled(&self) -> bool {
        self.throttle.is_scheduled()
    }

    pub fn watching(&self) -> bool {
        self.watch.is_enabled()
    }

    pub fn is_debouncing(&self) -> bool {
        self.coalescer.is_armed()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

impl<S: 'static> Drop for Machine<S> {
    fn drop(&mut self) {
        self.dispose();
    }
}
