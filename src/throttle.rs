//! Running-aware throttle for folder size checks.
//!
//! While a VM runs, the emulator writes to its folder continuously. Size
//! checks requested then are deferred until the running-check interval has
//! passed since the previous check, and at most one deferred check exists at
//! a time. The state is shared between the UI thread, the executor thread and
//! the deferral timer's thread, and guarded by one lock.
//!
//! ```text
//!   Idle --request, due or not running--> (compute) --> Idle
//!   Idle --request, running, not due----> Deferred
//!   Deferred --timer fires--------------> Computing --> Idle (+ deliver)
//!   Deferred/Computing --request--------> already scheduled
//! ```

use crate::folder_size::folder_size_string;
use crate::timer::OneShotTimer;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Outcome of a size-check request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SizeCheck {
    /// Computed right away.
    Computed(String),
    /// Deferred; the result will be handed to `deliver` when the timer fires.
    Deferred,
    /// A deferred check is already pending or running.
    AlreadyScheduled,
    /// The request belongs to a previous selection.
    Stale,
}

enum Phase {
    Idle,
    Deferred(OneShotTimer),
    Computing,
}

struct ThrottleState {
    generation: u64,
    phase: Phase,
    last_check: Option<Instant>,
    disposed: bool,
}

pub struct SizeThrottle {
    state: Mutex<ThrottleState>,
    interval: Duration,
    computations: AtomicU64,
}

impl std::fmt::Debug for SizeThrottle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        let phase = match state.phase {
            Phase::Idle => "Idle",
            Phase::Deferred(_) => "Deferred",
            Phase::Computing => "Computing",
        };
        f.debug_struct("SizeThrottle")
            .field("generation", &state.generation)
            .field("phase", &phase)
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

impl SizeThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            state: Mutex::new(ThrottleState {
                generation: 0,
                phase: Phase::Idle,
                last_check: None,
                disposed: false,
            }),
            interval,
            computations: AtomicU64::new(0),
        }
    }

    /// Request a size check of `root` for selection `generation`.
    ///
    /// `query_running` is only called when the check is not yet due, and
    /// without the lock held since it may block on the UI thread.
    pub fn request<Q, D>(
        self: &Arc<Self>,
        generation: u64,
        root: &Path,
        query_running: Q,
        deliver: D,
    ) -> SizeCheck
    where
        Q: FnOnce() -> bool,
        D: FnOnce(String) + Send + 'static,
    {
        let since_last = {
            let mut state = self.state.lock();
            if state.disposed || state.generation != generation {
                return SizeCheck::Stale;
            }
            if !matches!(state.phase, Phase::Idle) {
                return SizeCheck::AlreadyScheduled;
            }
            let since_last = state.last_check.map(|t| t.elapsed());
            state.last_check = Some(Instant::now());
            since_last
        };

        let Some(since_last) = since_last.filter(|e| *e <= self.interval) else {
            return SizeCheck::Computed(self.compute(root));
        };
        if !query_running() {
            return SizeCheck::Computed(self.compute(root));
        }

        let remaining = self.interval.saturating_sub(since_last);
        let mut state = self.state.lock();
        if state.disposed || state.generation != generation {
            return SizeCheck::Stale;
        }
        if !matches!(state.phase, Phase::Idle) {
            return SizeCheck::AlreadyScheduled;
        }

        let throttle = Arc::clone(self);
        let root_path = root.to_path_buf();
        let mut deliver = Some(deliver);
        let timer = OneShotTimer::new("vmdeck-size-check", remaining, move || {
            if let Some(deliver) = deliver.take() {
                throttle.fire_deferred(generation, &root_path, deliver);
            }
        });

        match timer {
            Ok(timer) => {
                timer.start();
                state.phase = Phase::Deferred(timer);
                log::debug!(
                    "Size check of {} deferred for {:?}",
                    root.display(),
                    remaining
                );
                SizeCheck::Deferred
            }
            Err(e) => {
                drop(state);
                log::warn!("Could not defer size check ({}), computing now", e);
                SizeCheck::Computed(self.compute(root))
            }
        }
    }

    fn fire_deferred<D>(&self, generation: u64, root: &Path, deliver: D)
    where
        D: FnOnce(String),
    {
        {
            let mut state = self.state.lock();
            if state.generation != generation || !matches!(state.phase, Phase::Deferred(_)) {
                return;
            }
            // Drops the timer; this callback is already running unlocked.
            state.phase = Phase::Computing;
        }

        let size = self.compute(root);

        {
            let mut state = self.state.lock();
            if state.generation == generation && matches!(state.phase, Phase::Computing) {
                state.phase = Phase::Idle;
                state.last_check = Some(Instant::now());
            }
        }

        // Staleness of the result is judged where it is applied.
        deliver(size);
    }

    /// Start over for a new selection: drop any deferred check and forget the
    /// last check time.
    pub fn reset(&self, generation: u64) {
        let mut state = self.state.lock();
        state.generation = generation;
        state.phase = Phase::Idle;
        state.last_check = None;
    }

    /// Drop a pending deferred check. Returns whether there was one.
    pub fn cancel_deferred(&self) -> bool {
        let mut state = self.state.lock();
        if matches!(state.phase, Phase::Deferred(_)) {
            state.phase = Phase::Idle;
            true
        } else {
            false
        }
    }

    /// Record a size check done outside the throttle for `generation`.
    pub fn mark_checked(&self, generation: u64) {
        let mut state = self.state.lock();
        if state.generation == generation {
            state.last_check = Some(Instant::now());
        }
    }

    pub fn is_scheduled(&self) -> bool {
        matches!(self.state.lock().phase, Phase::Deferred(_))
    }

    /// Dispose any deferred check; later requests are stale.
    pub fn dispose(&self) {
        let mut state = self.state.lock();
        state.disposed = true;
        state.phase = Phase::Idle;
    }

    /// Measure `root` now.
    pub fn compute(&self, root: &Path) -> String {
        self.computations.fetch_add(1, Ordering::Relaxed);
        folder_size_string(root)
    }

    /// Number of size measurements performed.
    pub fn computations(&self) -> u64 {
        self.computations.load(Ordering::Relaxed)
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}
