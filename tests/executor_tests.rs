//! Tests for the single-flight background executor under concurrent posting.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;
use vmdeck::UiLoop;
use vmdeck::executor::BackgroundExecutor;

const THREADS: usize = 4;
const TASKS_PER_THREAD: usize = 25;
const WAIT: Duration = Duration::from_secs(10);

#[derive(Default)]
struct Applied {
    order: Vec<(usize, usize)>,
}

#[test]
fn test_concurrent_posts_run_once_in_per_thread_order() {
    let (mut ui, dispatcher) = UiLoop::<Applied>::new();
    let executor = BackgroundExecutor::new(dispatcher);

    let active = Arc::new(AtomicUsize::new(0));
    let overlapped = Arc::new(AtomicBool::new(false));
    let runs = Arc::new(Mutex::new(Vec::<(usize, usize)>::new()));

    let posters: Vec<_> = (0..THREADS)
        .map(|t| {
            let executor = executor.clone();
            let active = Arc::clone(&active);
            let overlapped = Arc::clone(&overlapped);
            let runs = Arc::clone(&runs);
            thread::spawn(move || {
                for seq in 0..TASKS_PER_THREAD {
                    let active = Arc::clone(&active);
                    let overlapped = Arc::clone(&overlapped);
                    let runs = Arc::clone(&runs);
                    executor.post(
                        move || {
                            if active.fetch_add(1, Ordering::SeqCst) > 0 {
                                overlapped.store(true, Ordering::SeqCst);
                            }
                            runs.lock().push((t, seq));
                            thread::yield_now();
                            active.fetch_sub(1, Ordering::SeqCst);
                            (t, seq)
                        },
                        |state: &mut Applied, key| state.order.push(key),
                    );
                }
            })
        })
        .collect();
    for poster in posters {
        poster.join().expect("poster thread panicked");
    }

    let total = THREADS * TASKS_PER_THREAD;
    let mut state = Applied::default();
    assert!(ui.pump_until(&mut state, WAIT, |s| s.order.len() == total));

    assert!(!overlapped.load(Ordering::SeqCst), "two drain loops ran at once");

    let runs = runs.lock();
    assert_eq!(runs.len(), total);
    let mut last_seq: HashMap<usize, usize> = HashMap::new();
    for &(t, seq) in runs.iter() {
        if let Some(previous) = last_seq.insert(t, seq) {
            assert!(seq > previous, "thread {t} ran {seq} after {previous}");
        }
    }
    assert_eq!(last_seq.len(), THREADS);
    assert_eq!(executor.completed(), total as u64);

    // The UI steps follow the same order as the background steps.
    assert_eq!(state.order, *runs);
}

#[test]
fn test_canceled_task_posted_from_another_thread_never_applies() {
    let (mut ui, dispatcher) = UiLoop::<Applied>::new();
    let executor = BackgroundExecutor::new(dispatcher);
    let (release_tx, release_rx) = mpsc::channel::<()>();

    executor.post(
        move || {
            let _ = release_rx.recv_timeout(WAIT);
            (0, 0)
        },
        |state: &mut Applied, key| state.order.push(key),
    );

    let poster = executor.clone();
    let handle = thread::spawn(move || {
        poster.post(|| (1, 0), |state: &mut Applied, key| state.order.push(key))
    })
    .join()
    .expect("poster thread panicked");
    handle.cancel();
    executor.post(|| (2, 0), |state: &mut Applied, key| state.order.push(key));
    let _ = release_tx.send(());

    let mut state = Applied::default();
    assert!(ui.pump_until(&mut state, WAIT, |s| s.order.len() == 2));
    ui.pump_for(&mut state, Duration::from_millis(100));
    assert_eq!(state.order, vec![(0, 0), (2, 0)]);
}

#[test]
fn test_stopped_executor_refuses_new_work() {
    let (mut ui, dispatcher) = UiLoop::<Applied>::new();
    let executor = BackgroundExecutor::new(dispatcher);
    executor.stop();

    let ran = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&ran);
    let handle = executor.post(
        move || flag.store(true, Ordering::SeqCst),
        |state: &mut Applied, _| state.order.push((0, 0)),
    );

    assert!(handle.is_canceled());
    let mut state = Applied::default();
    ui.pump_for(&mut state, Duration::from_millis(100));
    assert!(!ran.load(Ordering::SeqCst));
    assert!(state.order.is_empty());
}
