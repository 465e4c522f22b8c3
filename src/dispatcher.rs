//! UI-thread dispatcher.
//!
//! All view state lives on a single thread that owns a [`UiLoop`]. Other
//! threads hand it work through a cloneable [`Dispatcher`]: [`Dispatcher::post`]
//! queues a closure fire-and-forget, [`Dispatcher::invoke`] blocks until the
//! closure has run on the UI thread and returns its result through a
//! rendezvous channel.

use crate::error::DispatchError;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

/// A closure executed on the UI thread with exclusive access to the UI state.
pub type UiJob<S> = Box<dyn FnOnce(&mut S) + Send>;

enum Message<S> {
    Run(UiJob<S>),
    Quit,
}

/// Handle used by background threads to reach the UI thread.
pub struct Dispatcher<S: 'static> {
    tx: Sender<Message<S>>,
    ui_thread: ThreadId,
}

impl<S: 'static> Clone for Dispatcher<S> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            ui_thread: self.ui_thread,
        }
    }
}

impl<S: 'static> std::fmt::Debug for Dispatcher<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("ui_thread", &self.ui_thread)
            .finish_non_exhaustive()
    }
}

impl<S: 'static> Dispatcher<S> {
    /// Queue `f` to run on the UI thread.
    pub fn post<F>(&self, f: F) -> Result<(), DispatchError>
    where
        F: FnOnce(&mut S) + Send + 'static,
    {
        self.tx
            .send(Message::Run(Box::new(f)))
            .map_err(|_| DispatchError::Closed)
    }

    /// Run `f` on the UI thread and wait for its result.
    ///
    /// Must not be called from the UI thread: nobody would be left to pump the
    /// loop, so this returns [`DispatchError::WouldDeadlock`] instead.
    pub fn invoke<R, F>(&self, f: F) -> Result<R, DispatchError>
    where
        R: Send + 'static,
        F: FnOnce(&mut S) -> R + Send + 'static,
    {
        if self.is_ui_thread() {
            return Err(DispatchError::WouldDeadlock);
        }

        let (reply_tx, reply_rx) = mpsc::sync_channel::<R>(1);
        self.post(move |state| {
            // The caller may have given up; nothing to do then.
            let _ = reply_tx.send(f(state));
        })?;
        reply_rx.recv().map_err(|_| DispatchError::NoReply)
    }

    /// Ask the UI loop to return from [`UiLoop::run`].
    pub fn quit(&self) {
        let _ = self.tx.send(Message::Quit);
    }

    /// Whether the calling thread is the UI thread.
    pub fn is_ui_thread(&self) -> bool {
        thread::current().id() == self.ui_thread
    }
}

/// The receiving end of the dispatcher, pumped by the UI thread.
///
/// The thread that calls [`UiLoop::new`] becomes the UI thread.
pub struct UiLoop<S: 'static> {
    rx: Receiver<Message<S>>,
    quit_requested: bool,
}

impl<S: 'static> std::fmt::Debug for UiLoop<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UiLoop")
            .field("quit_requested", &self.quit_requested)
            .finish_non_exhaustive()
    }
}

impl<S: 'static> UiLoop<S> {
    pub fn new() -> (Self, Dispatcher<S>) {
        let (tx, rx) = mpsc::channel();
        let dispatcher = Dispatcher {
            tx,
            ui_thread: thread::current().id(),
        };
        (
            Self {
                rx,
                quit_requested: false,
            },
            dispatcher,
        )
    }

    /// Pump messages until [`Dispatcher::quit`] is called.
    ///
    /// The loop never ends on its own while `state` keeps a dispatcher alive,
    /// which is the normal case.
    pub fn run(&mut self, state: &mut S) {
        while !self.quit_requested {
            match self.rx.recv() {
                Ok(Message::Run(job)) => job(state),
                Ok(Message::Quit) | Err(_) => self.quit_requested = true,
            }
        }
    }

    /// Run every message already queued without waiting. Returns how many ran.
    pub fn run_pending(&mut self, state: &mut S) -> usize {
        let mut ran = 0;
        while let Ok(message) = self.rx.try_recv() {
            match message {
                Message::Run(job) => {
                    job(state);
                    ran += 1;
                }
                Message::Quit => self.quit_requested = true,
            }
        }
        ran
    }

    /// Pump messages until `done(state)` holds or `timeout` elapses.
    ///
    /// `done` is checked before waiting and after every message. Returns
    /// whether the condition was met.
    pub fn pump_until<F>(&mut self, state: &mut S, timeout: Duration, mut done: F) -> bool
    where
        F: FnMut(&mut S) -> bool,
    {
        let deadline = Instant::now() + timeout;
        loop {
            if done(state) {
                return true;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            match self.rx.recv_timeout(remaining) {
                Ok(Message::Run(job)) => job(state),
                Ok(Message::Quit) => self.quit_requested = true,
                Err(RecvTimeoutError::Timeout) => return done(state),
                Err(RecvTimeoutError::Disconnected) => return done(state),
            }
        }
    }

    /// Pump messages for `duration`, regardless of what arrives.
    pub fn pump_for(&mut self, state: &mut S, duration: Duration) {
        self.pump_until(state, duration, |_| false);
    }

    pub fn quit_requested(&self) -> bool {
        self.quit_requested
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_post_runs_in_order_on_pump() {
        let (mut ui, dispatcher) = UiLoop::<Vec<u32>>::new();
        let mut state = Vec::new();

        for i in 0..5 {
            dispatcher.post(move |s| s.push(i)).expect("post");
        }
        assert!(state.is_empty());

        assert_eq!(ui.run_pending(&mut state), 5);
        assert_eq!(state, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_invoke_from_background_thread() {
        let (mut ui, dispatcher) = UiLoop::<u32>::new();
        let mut state = 41;

        let handle = thread::spawn(move || dispatcher.invoke(|s| {
            *s += 1;
            *s
        }));

        let mut answered = false;
        ui.pump_until(&mut state, Duration::from_secs(5), |s| {
            answered = *s == 42;
            answered
        });
        assert!(answered);
        assert_eq!(handle.join().expect("join"), Ok(42));
    }

    #[test]
    fn test_invoke_on_ui_thread_is_refused() {
        let (_ui, dispatcher) = UiLoop::<u32>::new();
        assert_eq!(
            dispatcher.invoke(|s| *s),
            Err(DispatchError::WouldDeadlock)
        );
    }

    #[test]
    fn test_post_after_loop_dropped_fails() {
        let (ui, dispatcher) = UiLoop::<u32>::new();
        drop(ui);
        assert_eq!(dispatcher.post(|_| {}), Err(DispatchError::Closed));
    }

    #[test]
    fn test_quit_stops_run() {
        let (mut ui, dispatcher) = UiLoop::<u32>::new();
        let mut state = 0;
        dispatcher.post(|s| *s = 7).expect("post");
        dispatcher.quit();
        ui.run(&mut state);
        assert_eq!(state, 7);
        assert!(ui.quit_requested());
    }

    #[test]
    fn test_pump_until_times_out() {
        let (mut ui, _dispatcher) = UiLoop::<u32>::new();
        let mut state = 0;
        assert!(!ui.pump_until(&mut state, Duration::from_millis(20), |s| *s == 1));
    }
}
