//! Timer primitives backed by dedicated threads.
//!
//! [`OneShotTimer`] is a restartable single-shot timer: arming it while it is
//! already armed does nothing, and the deadline is cleared before the
//! callback runs so the callback may re-arm it. [`IntervalTimer`] ticks at a
//! fixed period until dropped.

use crate::error::EngineError;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};

struct TimerState {
    deadline: Option<Instant>,
    shutdown: bool,
}

struct Shared {
    state: Mutex<TimerState>,
    wake: Condvar,
}

/// Single-shot timer with a fixed default interval.
pub struct OneShotTimer {
    name: String,
    interval: Duration,
    shared: Arc<Shared>,
}

impl std::fmt::Debug for OneShotTimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OneShotTimer")
            .field("name", &self.name)
            .field("interval", &self.interval)
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

impl OneShotTimer {
    /// Create a disarmed timer whose `callback` runs on a thread named `name`.
    pub fn new<F>(name: &str, interval: Duration, callback: F) -> Result<Self, EngineError>
    where
        F: FnMut() + Send + 'static,
    {
        let shared = Arc::new(Shared {
            state: Mutex::new(TimerState {
                deadline: None,
                shutdown: false,
            }),
            wake: Condvar::new(),
        });

        let worker_shared = Arc::clone(&shared);
        let thread_name = name.to_string();
        thread::Builder::new()
            .name(name.to_string())
            .spawn(move || run_one_shot(&worker_shared, &thread_name, callback))
            .map_err(|source| EngineError::Spawn {
                name: name.to_string(),
                source,
            })?;

        Ok(Self {
            name: name.to_string(),
            interval,
            shared,
        })
    }

    /// Arm the timer for its interval. Returns `false` if it was already armed.
    pub fn start(&self) -> bool {
        self.start_after(self.interval)
    }

    /// Arm the timer for `delay`. Returns `false` if it was already armed.
    pub fn start_after(&self, delay: Duration) -> bool {
        let mut state = self.shared.state.lock();
        if state.shutdown || state.deadline.is_some() {
            return false;
        }
        state.deadline = Some(Instant::now() + delay);
        self.shared.wake.notify_one();
        true
    }

    /// Disarm the timer. A callback that is already running is not interrupted.
    pub fn stop(&self) {
        let mut state = self.shared.state.lock();
        state.deadline = None;
        self.shared.wake.notify_one();
    }

    pub fn is_enabled(&self) -> bool {
        self.shared.state.lock().deadline.is_some()
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl Drop for OneShotTimer {
    fn drop(&mut self) {
        // Not joined: the timer may be dropped from inside its own callback.
        let mut state = self.shared.state.lock();
        state.shutdown = true;
        state.deadline = None;
        self.shared.wake.notify_all();
    }
}

fn run_one_shot<F: FnMut()>(shared: &Shared, name: &str, mut callback: F) {
    let mut state = shared.state.lock();
    loop {
        if state.shutdown {
            return;
        }
        match state.deadline {
            None => shared.wake.wait(&mut state),
            Some(deadline) if Instant::now() >= deadline => {
                state.deadline = None;
                MutexGuard::unlocked(&mut state, || {
                    if panic::catch_unwind(AssertUnwindSafe(&mut callback)).is_err() {
                        log::error!("Timer '{}' callback panicked", name);
                    }
                });
            }
            Some(deadline) => {
                shared.wake.wait_until(&mut state, deadline);
            }
        }
    }
}

/// Fixed-period ticker. Stops when dropped.
pub struct IntervalTimer {
    name: String,
    period: Duration,
    _stop: Sender<()>,
}

impl std::fmt::Debug for IntervalTimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntervalTimer")
            .field("name", &self.name)
            .field("period", &self.period)
            .finish_non_exhaustive()
    }
}

impl IntervalTimer {
    pub fn start<F>(name: &str, period: Duration, mut tick: F) -> Result<Self, EngineError>
    where
        F: FnMut() + Send + 'static,
    {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                loop {
                    match stop_rx.recv_timeout(period) {
                        Err(RecvTimeoutError::Timeout) => tick(),
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
                    }
                }
            })
            .map_err(|source| EngineError::Spawn {
                name: name.to_string(),
                source,
            })?;

        Ok(Self {
            name: name.to_string(),
            period,
            _stop: stop_tx,
        })
    }

    pub fn period(&self) -> Duration {
        self.period
    }
}
