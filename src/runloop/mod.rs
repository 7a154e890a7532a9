//! Run loop and event source scheduling.
//!
//! This module provides the cooperative scheduler the asynchronous streams
//! are built on:
//! - [`core`]: [`RunLoop`], the per-thread loop, and its [`ExitReason`]
//! - [`source`]: [`EventSource`], a signalable and cancelable unit of work
//! - `context`: thread-local lookup of the calling thread's loop
//!
//! # Example
//!
//! ```
//! use bytestream::{EventSource, ExitReason, RunLoop};
//! use std::sync::Arc;
//! use std::thread;
//! use std::time::Duration;
//!
//! let run_loop = RunLoop::current();
//! let source = Arc::new(EventSource::new(|_| println!("signaled")));
//! run_loop.add_source(&source);
//!
//! let remote = source.clone();
//! thread::spawn(move || remote.signal());
//!
//! assert_eq!(run_loop.run(true, Duration::from_secs(5)), ExitReason::HandledSource);
//! source.cancel();
//! assert_eq!(run_loop.run(true, Duration::from_secs(5)), ExitReason::Finished);
//! ```

mod context;
pub mod core;
pub mod source;

pub use self::core::{ExitReason, RunLoop};
pub use self::source::EventSource;
