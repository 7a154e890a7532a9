//! File-backed byte streams.
//!
//! - [`FileByteStream`]: blocking stream over a file descriptor
//! - [`AsyncFileByteStream`]: the same file serviced by the background I/O
//!   thread

pub mod file;

pub use file::{AsyncFileByteStream, FileByteStream};
