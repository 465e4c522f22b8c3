//! Single-flight background executor.
//!
//! Tasks pair a background computation with a follow-up closure that runs on
//! the UI thread. They are queued FIFO and drained by at most one worker
//! thread at a time; the `draining` flag is claimed with a compare-exchange,
//! so concurrent posters never start a second drain loop.
//!
//! Cancellation is cooperative: a canceled task is skipped if it has not
//! started, and its UI step is suppressed if it has. Stopping the executor
//! makes every queued or in-flight task a no-op.

use crate::dispatcher::{Dispatcher, UiJob};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;

type BackgroundWork<S> = Box<dyn FnOnce() -> UiJob<S> + Send>;

/// Owner-side handle of a posted task. Cancellation is one-way.
#[derive(Debug, Clone, Default)]
pub struct TaskHandle {
    canceled: Arc<AtomicBool>,
}

impl TaskHandle {
    fn canceled() -> Self {
        Self {
            canceled: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Suppress the task. A running background computation still completes.
    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::Release);
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::Acquire)
    }
}

struct QueuedTask<S: 'static> {
    handle: TaskHandle,
    work: BackgroundWork<S>,
}

struct Inner<S: 'static> {
    queue: Mutex<VecDeque<QueuedTask<S>>>,
    draining: AtomicBool,
    running: Arc<AtomicBool>,
    dispatcher: Dispatcher<S>,
    completed: AtomicU64,
    failed: AtomicU64,
}

/// Queue-backed worker with at most one active drain loop.
pub struct BackgroundExecutor<S: 'static> {
    inner: Arc<Inner<S>>,
}

impl<S: 'static> Clone for BackgroundExecutor<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: 'static> std::fmt::Debug for BackgroundExecutor<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundExecutor")
            .field("running", &self.is_running())
            .field("queued", &self.queued())
            .finish_non_exhaustive()
    }
}

impl<S: 'static> BackgroundExecutor<S> {
    pub fn new(dispatcher: Dispatcher<S>) -> Self {
        Self {
            inner: Arc::new(Inner {
                queue: Mutex::new(VecDeque::new()),
                draining: AtomicBool::new(false),
                running: Arc::new(AtomicBool::new(true)),
                dispatcher,
                completed: AtomicU64::new(0),
                failed: AtomicU64::new(0),
            }),
        }
    }

    /// Queue `work` for the background thread; `apply` receives its result on
    /// the UI thread.
    ///
    /// After [`stop`](Self::stop) nothing is queued and the returned handle is
    /// already canceled.
    pub fn post<R, W, A>(&self, work: W, apply: A) -> TaskHandle
    where
        R: Send + 'static,
        W: FnOnce() -> R + Send + 'static,
        A: FnOnce(&mut S, R) + Send + 'static,
    {
        if !self.is_running() {
            return TaskHandle::canceled();
        }

        let handle = TaskHandle::default();
        let work: BackgroundWork<S> = Box::new(move || {
            let result = work();
            Box::new(move |state: &mut S| apply(state, result))
        });
        self.inner.queue.lock().push_back(QueuedTask {
            handle: handle.clone(),
            work,
        });
        Inner::schedule(&self.inner);
        handle
    }

    /// Poison the executor: queued tasks are dropped and in-flight ones lose
    /// their UI effect.
    pub fn stop(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
        let dropped = {
            let mut queue = self.inner.queue.lock();
            let n = queue.len();
            queue.clear();
            n
        };
        if dropped > 0 {
            log::debug!("Executor stopped, dropped {} queued task(s)", dropped);
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Number of tasks waiting for the drain loop.
    pub fn queued(&self) -> usize {
        self.inner.queue.lock().len()
    }

    /// Whether a drain loop is currently active.
    pub fn is_draining(&self) -> bool {
        self.inner.draining.load(Ordering::SeqCst)
    }

    /// Background computations that finished, including canceled ones.
    pub fn completed(&self) -> u64 {
        self.inner.completed.load(Ordering::Relaxed)
    }

    /// Background computations that panicked.
    pub fn failed(&self) -> u64 {
        self.inner.failed.load(Ordering::Relaxed)
    }
}

impl<S: 'static> Inner<S> {
    fn schedule(inner: &Arc<Self>) {
        if inner
            .draining
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            // The active loop will pick the new task up before it exits.
            return;
        }

        let worker = Arc::clone(inner);
        let spawned = thread::Builder::new()
            .name("vmdeck-executor".to_string())
            .spawn(move || worker.drain());

        if let Err(e) = spawned {
            inner.draining.store(false, Ordering::SeqCst);
            log::error!("Failed to spawn executor thread: {}", e);
        }
    }

    fn drain(self: &Arc<Self>) {
        loop {
            loop {
                let next = self.queue.lock().pop_front();
                let Some(task) = next else { break };
                self.run_task(task);
            }

            self.draining.store(false, Ordering::SeqCst);

            // A post that lost the race against the store above saw
            // `draining == true` and returned; pick its task up here.
            if !self.running.load(Ordering::SeqCst) || self.queue.lock().is_empty() {
                return;
            }
            if self
                .draining
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                return;
            }
        }
    }

    fn run_task(&self, task: QueuedTask<S>) {
        if task.handle.is_canceled() || !self.running.load(Ordering::SeqCst) {
            return;
        }

        let apply = match panic::catch_unwind(AssertUnwindSafe(task.work)) {
            Ok(apply) => apply,
            Err(payload) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                log::error!(
                    "Background task panicked: {}",
                    panic_message(payload.as_ref())
                );
                return;
            }
        };
        self.completed.fetch_add(1, Ordering::Relaxed);

        if task.handle.is_canceled() || !self.running.load(Ordering::SeqCst) {
            return;
        }

        let handle = task.handle;
        let running = Arc::clone(&self.running);
        let posted = self.dispatcher.post(move |state| {
            if handle.is_canceled() || !running.load(Ordering::SeqCst) {
                return;
            }
            apply(state);
        });
        if let Err(e) = posted {
            log::warn!("Dropping background result: {}", e);
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::UiLoop;
    use std::sync::mpsc;
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(5);

    #[test]
    fn test_tasks_apply_in_submission_order() {
        let (mut ui, dispatcher) = UiLoop::<Vec<u32>>::new();
        let executor = BackgroundExecutor::new(dispatcher);
        let mut state = Vec::new();

        for i in 0..10 {
            executor.post(move || i * 2, |s: &mut Vec<u32>, r| s.push(r));
        }

        assert!(ui.pump_until(&mut state, WAIT, |s| s.len() == 10));
        assert_eq!(state, (0..10).map(|i| i * 2).collect::<Vec<_>>());
    }

    #[test]
    fn test_canceled_before_start_is_skipped() {
        let (mut ui, dispatcher) = UiLoop::<Vec<u32>>::new();
        let executor = BackgroundExecutor::new(dispatcher);
        let mut state = Vec::new();

        // Hold the drain loop inside the first task so the second is still queued.
        let (release_tx, release_rx) = mpsc::channel::<()>();
        executor.post(
            move || {
                let _ = release_rx.recv_timeout(WAIT);
                1
            },
            |s: &mut Vec<u32>, r| s.push(r),
        );
        let ran = Arc::new(AtomicBool::new(false));
        let ran_in_task = Arc::clone(&ran);
        let second = executor.post(
            move || {
                ran_in_task.store(true, Ordering::SeqCst);
                2
            },
            |s: &mut Vec<u32>, r| s.push(r),
        );
        second.cancel();
        executor.post(|| 3, |s: &mut Vec<u32>, r| s.push(r));
        release_tx.send(()).expect("release");

        assert!(ui.pump_until(&mut state, WAIT, |s| s.len() == 2));
        assert_eq!(state, vec![1, 3]);
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[test]
    fn test_cancel_mid_flight_suppresses_apply() {
        let (mut ui, dispatcher) = UiLoop::<Vec<u32>>::new();
        let executor = BackgroundExecutor::new(dispatcher);
        let mut state = Vec::new();

        let (started_tx, started_rx) = mpsc::channel::<()>();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let handle = executor.post(
            move || {
                let _ = started_tx.send(());
                let _ = release_rx.recv_timeout(WAIT);
                1
            },
            |s: &mut Vec<u32>, r| s.push(r),
        );
        started_rx.recv_timeout(WAIT).expect("task started");
        handle.cancel();
        release_tx.send(()).expect("release");
        executor.post(|| 2, |s: &mut Vec<u32>, r| s.push(r));

        assert!(ui.pump_until(&mut state, WAIT, |s| s.contains(&2)));
        ui.run_pending(&mut state);
        assert_eq!(state, vec![2]);
        assert_eq!(executor.completed(), 2);
    }

    #[test]
    fn test_panicking_task_does_not_kill_loop() {
        let (mut ui, dispatcher) = UiLoop::<Vec<u32>>::new();
        let executor = BackgroundExecutor::new(dispatcher);
        let mut state = Vec::new();

        executor.post(
            || -> u32 { panic!("boom") },
            |s: &mut Vec<u32>, r| s.push(r),
        );
        executor.post(|| 5, |s: &mut Vec<u32>, r| s.push(r));

        assert!(ui.pump_until(&mut state, WAIT, |s| !s.is_empty()));
        assert_eq!(state, vec![5]);
        assert_eq!(executor.failed(), 1);
    }

    #[test]
    fn test_stop_poisons_pending_results() {
        let (mut ui, dispatcher) = UiLoop::<Vec<u32>>::new();
        let executor = BackgroundExecutor::new(dispatcher);
        let mut state = Vec::new();

        executor.post(|| 1, |s: &mut Vec<u32>, r| s.push(r));
        // Let the result reach the UI queue, then stop before pumping it.
        let deadline = std::time::Instant::now() + WAIT;
        while executor.completed() == 0 && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        executor.stop();

        ui.pump_for(&mut state, Duration::from_millis(50));
        assert!(state.is_empty());

        let handle = executor.post(|| 2, |s: &mut Vec<u32>, r| s.push(r));
        assert!(handle.is_canceled());
        assert_eq!(executor.queued(), 0);
    }
}
