//! Per-thread cooperative scheduler.
//!
//! A [`RunLoop`] sleeps on a condition variable until one of its
//! [`EventSource`]s is signaled, a closure is queued with
//! [`RunLoop::perform`], the loop is stopped, or the timeout runs out. It then
//! runs the work on the thread that owns it and reports why it returned.

use crate::runloop::context::{current_run_loop, existing_run_loop};
use crate::runloop::source::EventSource;

use parking_lot::{Condvar, Mutex, MutexGuard};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

type Perform = Box<dyn FnOnce() + Send>;

/// Why [`RunLoop::run`] returned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExitReason {
    /// Nothing is registered: no sources and no queued closures.
    Finished,
    /// The timeout elapsed, or nothing was ready and waiting was not requested.
    TimedOut,
    /// [`RunLoop::stop`] was called.
    Stopped,
    /// At least one source handler or queued closure ran.
    HandledSource,
}

/// A thread-affine scheduler for [`EventSource`]s.
///
/// Obtain one with [`RunLoop::current`]; each thread has exactly one.
pub struct RunLoop {
    state: Mutex<LoopState>,
    wakeup: Condvar,
    owner: ThreadId,
}

struct LoopState {
    sources: Vec<Arc<EventSource>>,
    performs: VecDeque<Perform>,
    signaled: bool,
    stopped: bool,
    last_exit: Option<ExitReason>,
}

impl RunLoop {
    pub(crate) fn for_current_thread() -> Self {
        Self {
            state: Mutex::new(LoopState {
                sources: Vec::new(),
                performs: VecDeque::new(),
                signaled: false,
                stopped: false,
                last_exit: None,
            }),
            wakeup: Condvar::new(),
            owner: thread::current().id(),
        }
    }

    /// Returns the calling thread's run loop, creating it if needed.
    pub fn current() -> Arc<RunLoop> {
        current_run_loop()
    }

    /// Returns the calling thread's run loop only if one already exists.
    pub fn try_current() -> Option<Arc<RunLoop>> {
        existing_run_loop()
    }

    /// Registers `source` with this loop.
    ///
    /// A source signaled before it was added is dispatched on the next run.
    pub fn add_source(self: &Arc<Self>, source: &Arc<EventSource>) {
        source.attach(self);

        let mut state = self.state.lock();
        if !state.sources.iter().any(|s| Arc::ptr_eq(s, source)) {
            state.sources.push(source.clone());
        }

        if source.is_pending() {
            state.signaled = true;
            self.wakeup.notify_all();
        }
    }

    /// Unregisters `source`. Unknown sources are ignored.
    pub fn remove_source(&self, source: &EventSource) {
        let mut state = self.state.lock();
        state
            .sources
            .retain(|s| !std::ptr::eq(Arc::as_ptr(s), source as *const _));
    }

    /// Number of registered sources.
    pub fn source_count(&self) -> usize {
        self.state.lock().sources.len()
    }

    /// Queues `function` to run on this loop's thread during its next run.
    pub fn perform<F>(&self, function: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.state.lock();
        state.performs.push_back(Box::new(function));
        state.signaled = true;
        self.wakeup.notify_all();
    }

    /// Makes the current (or next) call to [`run`](Self::run) return
    /// [`ExitReason::Stopped`].
    pub fn stop(&self) {
        let mut state = self.state.lock();
        state.stopped = true;
        self.wakeup.notify_all();
    }

    /// Interrupts a blocked [`run`](Self::run) so it rescans its sources.
    pub fn wake(&self) {
        let mut state = self.state.lock();
        state.signaled = true;
        self.wakeup.notify_all();
    }

    /// Result of the most recent [`run`](Self::run), if any.
    pub fn last_exit_reason(&self) -> Option<ExitReason> {
        self.state.lock().last_exit
    }

    /// Whether the calling thread owns this loop.
    pub fn is_current(&self) -> bool {
        thread::current().id() == self.owner
    }

    /// Drives the loop on the calling thread.
    ///
    /// Dispatches every pending source and queued closure. When nothing was
    /// ready and `wait_for_sources` is set, blocks until something is
    /// signaled or `timeout` elapses.
    ///
    /// # Panics
    ///
    /// Panics when called from a thread other than the one that owns the
    /// loop.
    pub fn run(&self, wait_for_sources: bool, timeout: Duration) -> ExitReason {
        assert!(
            self.is_current(),
            "RunLoop::run() called from a thread that does not own this run loop"
        );

        let deadline = Instant::now().checked_add(timeout);
        let mut state = self.state.lock();

        let reason = loop {
            if state.stopped {
                state.stopped = false;
                break ExitReason::Stopped;
            }

            if state.sources.is_empty() && state.performs.is_empty() {
                break ExitReason::Finished;
            }

            if self.dispatch_ready(&mut state) {
                break ExitReason::HandledSource;
            }

            if !wait_for_sources {
                break ExitReason::TimedOut;
            }

            if state.signaled {
                state.signaled = false;
                continue;
            }

            match deadline {
                Some(deadline) => {
                    if Instant::now() >= deadline {
                        break ExitReason::TimedOut;
                    }
                    let _ = self.wakeup.wait_until(&mut state, deadline);
                }
                None => self.wakeup.wait(&mut state),
            }
        };

        state.last_exit = Some(reason);
        reason
    }

    // Runs pending work with the loop unlocked so handlers may signal, add
    // and cancel sources, or queue closures.
    fn dispatch_ready(&self, state: &mut MutexGuard<'_, LoopState>) -> bool {
        let ready: Vec<Arc<EventSource>> = state
            .sources
            .iter()
            .filter(|source| source.is_pending())
            .cloned()
            .collect();
        let performs: Vec<Perform> = state.performs.drain(..).collect();

        if ready.is_empty() && performs.is_empty() {
            return false;
        }

        state.signaled = false;

        MutexGuard::unlocked(state, || {
            let mut handled = !performs.is_empty();

            for function in performs {
                function();
            }

            for source in ready {
                handled |= source.dispatch();
            }

            handled
        })
    }
}

impl fmt::Debug for RunLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("RunLoop")
            .field("owner", &self.owner)
            .field("sources", &state.sources.len())
            .field("performs", &state.performs.len())
            .field("last_exit", &state.last_exit)
            .finish()
    }
}
