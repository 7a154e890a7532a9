//! Signalable, cancelable units of work scheduled on a [`RunLoop`].
//!
//! An [`EventSource`] is "pending" rather than counted: any number of
//! [`signal`](EventSource::signal) calls made before the loop gets to it
//! collapse into a single dispatch.

use crate::runloop::core::RunLoop;

use parking_lot::Mutex;
use std::fmt;
use std::sync::{Arc, Weak};

type Handler = Box<dyn Fn(&EventSource) + Send + Sync>;

/// A cancelable source of work for a [`RunLoop`].
///
/// # Example
///
/// ```
/// use bytestream::{EventSource, ExitReason, RunLoop};
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::time::Duration;
///
/// let hits = Arc::new(AtomicUsize::new(0));
/// let counter = hits.clone();
/// let source = Arc::new(EventSource::new(move |_| {
///     counter.fetch_add(1, Ordering::SeqCst);
/// }));
///
/// let run_loop = RunLoop::current();
/// run_loop.add_source(&source);
///
/// source.signal();
/// source.signal();
/// assert_eq!(run_loop.run(false, Duration::ZERO), ExitReason::HandledSource);
/// assert_eq!(hits.load(Ordering::SeqCst), 1);
///
/// source.cancel();
/// ```
pub struct EventSource {
    handler: Handler,
    state: Mutex<SourceState>,
    run_loop: Mutex<Weak<RunLoop>>,
}

#[derive(Default)]
struct SourceState {
    pending: bool,
    cancelled: bool,
}

impl EventSource {
    /// Creates a source that runs `handler` on its loop's thread whenever it
    /// has been signaled.
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&EventSource) + Send + Sync + 'static,
    {
        Self {
            handler: Box::new(handler),
            state: Mutex::new(SourceState::default()),
            run_loop: Mutex::new(Weak::new()),
        }
    }

    /// Marks the source pending and wakes the loop it belongs to.
    ///
    /// Callable from any thread. A no-op once the source is cancelled.
    pub fn signal(&self) {
        {
            let mut state = self.state.lock();
            if state.cancelled || state.pending {
                return;
            }
            state.pending = true;
        }

        let run_loop = self.run_loop.lock().upgrade();
        if let Some(run_loop) = run_loop {
            run_loop.wake();
        }
    }

    /// Stops all future dispatches and detaches the source from its loop.
    ///
    /// Idempotent. A dispatch that already started may finish, but none
    /// begins after this returns.
    pub fn cancel(&self) {
        {
            let mut state = self.state.lock();
            state.cancelled = true;
            state.pending = false;
        }

        let run_loop = std::mem::take(&mut *self.run_loop.lock());
        if let Some(run_loop) = run_loop.upgrade() {
            run_loop.remove_source(self);
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.lock().cancelled
    }

    /// Whether a signal is waiting to be dispatched.
    pub fn is_pending(&self) -> bool {
        let state = self.state.lock();
        state.pending && !state.cancelled
    }

    pub(crate) fn attach(&self, run_loop: &Arc<RunLoop>) {
        *self.run_loop.lock() = Arc::downgrade(run_loop);
    }

    /// Runs the handler if the source is pending and still live.
    ///
    /// The pending flag is consumed under the state lock, so a concurrent
    /// `cancel` either lands before (nothing runs) or after (this dispatch
    /// had already begun).
    pub(crate) fn dispatch(&self) -> bool {
        {
            let mut state = self.state.lock();
            if state.cancelled || !state.pending {
                return false;
            }
            state.pending = false;
        }

        (self.handler)(self);
        true
    }
}

impl fmt::Debug for EventSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("EventSource")
            .field("pending", &state.pending)
            .field("cancelled", &state.cancelled)
            .finish()
    }
}
