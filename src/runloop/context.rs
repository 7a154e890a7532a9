//! Thread-local storage for the calling thread's run loop.
//!
//! Every thread that asks for a run loop gets exactly one, created on first
//! use and kept alive for the rest of the thread's life. The loop records the
//! thread that created it so [`RunLoop::run`] can refuse to be driven from
//! anywhere else.
//!
//! # Example
//!
//! ```
//! use bytestream::RunLoop;
//! use std::sync::Arc;
//!
//! let first = RunLoop::current();
//! let second = RunLoop::current();
//! assert!(Arc::ptr_eq(&first, &second));
//! ```

use crate::runloop::core::RunLoop;

use std::cell::RefCell;
use std::sync::Arc;

thread_local! {
    /// The run loop owned by this thread, if one was requested.
    static CURRENT_RUN_LOOP: RefCell<Option<Arc<RunLoop>>> = const { RefCell::new(None) };
}

/// Returns this thread's run loop, creating it on first call.
pub(crate) fn current_run_loop() -> Arc<RunLoop> {
    CURRENT_RUN_LOOP.with(|current| {
        current
            .borrow_mut()
            .get_or_insert_with(|| Arc::new(RunLoop::for_current_thread()))
            .clone()
    })
}

/// Returns this thread's run loop without creating one.
pub(crate) fn existing_run_loop() -> Option<Arc<RunLoop>> {
    CURRENT_RUN_LOOP.with(|current| current.borrow().clone())
}
