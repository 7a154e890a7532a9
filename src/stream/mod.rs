//! Byte-stream contracts and the asynchronous adapter.
//!
//! - [`ByteStream`]: the synchronous read/write/seek contract every backend
//!   implements
//! - [`AsyncBackend`]: the blocking hooks the background thread calls
//! - [`async_stream`]: [`AsyncByteStream`], which wraps a backend behind a
//!   pair of ring buffers serviced by the shared I/O thread
//! - [`bridge`]: `std::io::Read` / `std::io::Write` views of a stream
//!
//! # Example
//!
//! ```no_run
//! use bytestream::fs::FileByteStream;
//! use bytestream::stream::{ByteStream, OpenMode};
//!
//! let mut file = FileByteStream::new();
//! file.open("/tmp/bytestream-demo.txt", OpenMode::OUT | OpenMode::TRUNC)?;
//! assert_eq!(file.write_bytes(b"hello"), 5);
//! file.close();
//! # Ok::<(), bytestream::StreamError>(())
//! ```

pub mod async_stream;
pub mod bridge;

pub use async_stream::{
    AsyncByteStream, AsyncEvent, EventHandler, StreamHandle, WeakStreamHandle,
};
pub use bridge::{StreamReader, StreamWriter};

use std::fmt;
use std::io::SeekFrom;
use std::ops::{BitOr, BitOrAssign};

/// Synchronous contract shared by every backing store.
///
/// Reads and writes report how many bytes moved; a closed or failed stream
/// moves zero bytes rather than erroring, and opening is backend-specific.
pub trait ByteStream {
    fn is_open(&self) -> bool;

    /// Releases the underlying resource. Closing twice is harmless.
    fn close(&mut self);

    /// Reads up to `buffer.len()` bytes, returning the number read.
    fn read_bytes(&mut self, buffer: &mut [u8]) -> usize;

    /// Writes up to `buffer.len()` bytes, returning the number accepted.
    fn write_bytes(&mut self, buffer: &[u8]) -> usize;

    /// Moves the stream position and returns the new absolute position.
    fn seek(&mut self, position: SeekFrom) -> u64;

    /// Bytes that can be read without reaching the end of the stream.
    fn bytes_available(&self) -> usize;

    /// Bytes that can be written before the stream refuses more.
    fn space_available(&self) -> usize;
}

/// Blocking hooks used by [`AsyncByteStream`] from its background tick.
///
/// The defaults forward to the synchronous contract, which is what the file
/// and archive backends need.
pub trait AsyncBackend: ByteStream + Send + 'static {
    /// Produces up to `buffer.len()` bytes. May block.
    fn read_for_async(&mut self, buffer: &mut [u8]) -> usize {
        self.read_bytes(buffer)
    }

    /// Consumes a prefix of `buffer` and returns its length. May block.
    fn write_for_async(&mut self, buffer: &[u8]) -> usize {
        self.write_bytes(buffer)
    }
}

impl<S: ByteStream + ?Sized> ByteStream for &mut S {
    fn is_open(&self) -> bool {
        (**self).is_open()
    }

    fn close(&mut self) {
        (**self).close()
    }

    fn read_bytes(&mut self, buffer: &mut [u8]) -> usize {
        (**self).read_bytes(buffer)
    }

    fn write_bytes(&mut self, buffer: &[u8]) -> usize {
        (**self).write_bytes(buffer)
    }

    fn seek(&mut self, position: SeekFrom) -> u64 {
        (**self).seek(position)
    }

    fn bytes_available(&self) -> usize {
        (**self).bytes_available()
    }

    fn space_available(&self) -> usize {
        (**self).space_available()
    }
}

/// Open flags, combined with `|`.
///
/// Mirrors the classic stream open modes: `IN` for reading, `OUT` for
/// writing, `APP` to append, `TRUNC` to truncate, `ATE` to start at the end,
/// and `BINARY`, which is accepted and has no effect on Unix.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct OpenMode(u8);

impl OpenMode {
    pub const IN: Self = Self(1 << 0);
    pub const OUT: Self = Self(1 << 1);
    pub const APP: Self = Self(1 << 2);
    pub const TRUNC: Self = Self(1 << 3);
    pub const BINARY: Self = Self(1 << 4);
    pub const ATE: Self = Self(1 << 5);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    /// `const` spelling of `self | other`.
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// `self` with every flag of `other` cleared.
    pub const fn without(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    /// Whether a stream opened with this mode needs a read side.
    pub const fn is_readable(self) -> bool {
        self.contains(Self::IN)
    }

    /// Whether a stream opened with this mode needs a write side.
    pub const fn is_writable(self) -> bool {
        self.intersects(Self(Self::OUT.0 | Self::APP.0))
    }
}

impl BitOr for OpenMode {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for OpenMode {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for OpenMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(OpenMode, &str); 6] = [
            (OpenMode::IN, "IN"),
            (OpenMode::OUT, "OUT"),
            (OpenMode::APP, "APP"),
            (OpenMode::TRUNC, "TRUNC"),
            (OpenMode::BINARY, "BINARY"),
            (OpenMode::ATE, "ATE"),
        ];

        let mut first = true;
        for (flag, name) in NAMES {
            if self.contains(flag) {
                if !first {
                    f.write_str(" | ")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }

        if first {
            f.write_str("(empty)")?;
        }

        Ok(())
    }
}
