//! The shared background I/O thread.
//!
//! An [`IoService`] owns at most one thread hosting a [`RunLoop`]. The thread
//! is spawned the first time an event source is registered; the registering
//! call blocks until the new thread's loop is published, so the source always
//! lands on a running loop. After the last stream closes the thread idles for
//! a while and then retires, and the next registration spins up a fresh one.
//!
//! Most code uses the process-wide instance returned by [`IoService::global`].
//! Private instances are useful when the idle policy needs different
//! tunables, and they shut their thread down when dropped.
//!
//! # Example
//!
//! ```
//! use bytestream::{EventSource, IoServiceBuilder};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let service = IoServiceBuilder::new()
//!     .idle_tick(Duration::from_millis(1))
//!     .max_idle_ticks(5)
//!     .build();
//!
//! let source = Arc::new(EventSource::new(|_| {}));
//! let run_loop = service.register(&source)?;
//! assert!(service.is_running());
//! assert_eq!(run_loop.source_count(), 1);
//!
//! source.cancel();
//! service.shutdown();
//! assert!(!service.is_running());
//! # Ok::<(), std::io::Error>(())
//! ```

pub mod config;
pub(crate) mod driver;

pub use config::IoServiceConfig;
pub use driver::IdleCounter;

use crate::runloop::{EventSource, RunLoop};

use parking_lot::{Condvar, Mutex, MutexGuard};
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle};

static GLOBAL: OnceLock<Arc<IoService>> = OnceLock::new();

/// Owner of the background I/O thread and its run loop.
pub struct IoService {
    config: IoServiceConfig,
    state: Mutex<ServiceState>,
    ready: Condvar,
    generation: AtomicUsize,
}

#[derive(Default)]
struct ServiceState {
    run_loop: Option<Arc<RunLoop>>,
    thread: Option<JoinHandle<()>>,
}

impl IoService {
    /// Creates a service with no thread; one is spawned on first use.
    pub fn new(config: IoServiceConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            state: Mutex::new(ServiceState::default()),
            ready: Condvar::new(),
            generation: AtomicUsize::new(0),
        })
    }

    /// The process-wide service shared by every stream that does not pick
    /// its own. Configured from the environment on first use.
    pub fn global() -> Arc<Self> {
        GLOBAL
            .get_or_init(|| Self::new(IoServiceConfig::from_env()))
            .clone()
    }

    pub fn config(&self) -> &IoServiceConfig {
        &self.config
    }

    /// Adds `source` to the background loop, starting the thread if needed.
    ///
    /// The addition happens under the service lock, so a thread that is
    /// about to retire either sees the new source and keeps running, or has
    /// already left and a new one is started.
    pub fn register(self: &Arc<Self>, source: &Arc<EventSource>) -> io::Result<Arc<RunLoop>> {
        let mut state = self.state.lock();
        let run_loop = self.ensure_running(&mut state)?;
        run_loop.add_source(source);

        Ok(run_loop)
    }

    /// Returns the background loop, starting the thread if needed.
    pub fn run_loop(self: &Arc<Self>) -> io::Result<Arc<RunLoop>> {
        let mut state = self.state.lock();
        self.ensure_running(&mut state)
    }

    /// Whether a background thread currently serves this instance.
    pub fn is_running(&self) -> bool {
        self.state.lock().run_loop.is_some()
    }

    /// Number of background threads spawned so far.
    pub fn generation(&self) -> usize {
        self.generation.load(Ordering::Acquire)
    }

    /// Stops the background loop and waits for its thread to exit.
    ///
    /// Sources still registered stay attached to the stopped loop and are no
    /// longer dispatched. A later [`register`](Self::register) starts a new
    /// thread.
    pub fn shutdown(&self) {
        let (run_loop, handle) = {
            let mut state = self.state.lock();
            (state.run_loop.take(), state.thread.take())
        };

        if let Some(run_loop) = run_loop {
            run_loop.stop();
        }

        if let Some(handle) = handle
            && handle.thread().id() != thread::current().id()
        {
            let _ = handle.join();
        }
    }

    /// Called by the background thread once it has idled long enough.
    ///
    /// Returns false when a source was registered in the meantime.
    pub(crate) fn retire(&self, run_loop: &Arc<RunLoop>) -> bool {
        let mut state = self.state.lock();

        match &state.run_loop {
            Some(current) if Arc::ptr_eq(current, run_loop) => {
                if run_loop.source_count() > 0 {
                    return false;
                }
                state.run_loop = None;
                true
            }
            // Shut down or replaced: this loop is orphaned either way.
            _ => true,
        }
    }

    fn ensure_running(
        self: &Arc<Self>,
        state: &mut MutexGuard<'_, ServiceState>,
    ) -> io::Result<Arc<RunLoop>> {
        if let Some(run_loop) = &state.run_loop {
            return Ok(run_loop.clone());
        }

        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let service = self.clone();

        let handle = thread::Builder::new()
            .name(self.config.thread_name.clone())
            .spawn(move || {
                let run_loop = RunLoop::current();

                {
                    let mut state = service.state.lock();
                    state.run_loop = Some(run_loop.clone());
                    service.ready.notify_all();
                }

                let config = service.config.clone();
                let weak = Arc::downgrade(&service);
                drop(service);

                driver::drive(weak, run_loop, config, generation);
            })?;

        // Dropping a previous, retired thread's handle detaches it.
        state.thread = Some(handle);

        while state.run_loop.is_none() {
            self.ready.wait(state);
        }

        tracing::debug!(generation, "I/O thread started");

        state
            .run_loop
            .clone()
            .ok_or_else(|| io::Error::other("I/O thread did not publish its run loop"))
    }
}

impl Drop for IoService {
    fn drop(&mut self) {
        self.shutdown();
    }
}
