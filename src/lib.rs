//! Non-blocking byte streams over blocking backends.
//!
//! Callers read and write through in-memory ring buffers while a shared
//! background thread moves bytes between those buffers and the real backing
//! store: a file or an entry of a zip archive.
//!
//! # Architecture
//!
//! - **RingBuffer**: fixed-capacity circular buffer, the only structure the
//!   caller and the background thread share
//! - **RunLoop / EventSource**: per-thread scheduler dispatching signaled
//!   sources and queued closures
//! - **IoService**: owner of the background thread; retires it after a
//!   stretch of idleness and restarts it on demand
//! - **AsyncByteStream**: the adapter that wires a backend, two ring buffers
//!   and an event source together
//! - **FileByteStream / ZipEntryByteStream**: the synchronous backends
//! - **IoServiceBuilder**: fluent configuration of a private service
//!
//! # Example
//!
//! ```no_run
//! use bytestream::fs::AsyncFileByteStream;
//! use bytestream::stream::{AsyncEvent, OpenMode};
//!
//! let mut stream = AsyncFileByteStream::with_handler(Default::default(), 4096, |event, handle| {
//!     if event == AsyncEvent::HasBytesAvailable {
//!         let mut chunk = [0u8; 1024];
//!         while let Ok(read @ 1..) = handle.read_bytes(&mut chunk) {
//!             print!("{}", String::from_utf8_lossy(&chunk[..read]));
//!         }
//!     }
//! });
//!
//! stream.open("/etc/hosts", OpenMode::IN)?;
//! # Ok::<(), bytestream::StreamError>(())
//! ```

mod builder;

pub mod archive;
pub mod error;
pub mod fs;
pub mod runloop;
pub mod service;
pub mod stream;
pub mod utils;

pub use builder::IoServiceBuilder;
pub use error::{Result, StreamError};
pub use runloop::{EventSource, ExitReason, RunLoop};
pub use service::{IdleCounter, IoService, IoServiceConfig};
pub use stream::{
    AsyncByteStream, AsyncEvent, ByteStream, OpenMode, StreamHandle, WeakStreamHandle,
};
pub use utils::ring_buffer::{RingBuffer, RingBufferGuard};
