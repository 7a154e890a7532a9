//! Fixed-capacity circular byte buffer shared between a caller and the
//! background I/O thread.
//!
//! The buffer is its own lock: every method on [`RingBuffer`] acquires it for
//! the duration of the call, and [`RingBuffer::lock`] hands out a
//! [`RingBufferGuard`] when several operations have to happen atomically.
//!
//! Reading is split in two steps. [`RingBufferGuard::read_bytes`] copies bytes
//! out without consuming them and [`RingBufferGuard::remove_bytes`] commits the
//! consumption, so a writer can look at a window, hand it to a backend, and
//! only drop what the backend actually took.
//!
//! # Example
//!
//! ```
//! use bytestream::RingBuffer;
//!
//! let ring = RingBuffer::new(8);
//! assert_eq!(ring.write_bytes(b"hello world"), 8);
//!
//! let mut out = [0u8; 5];
//! assert_eq!(ring.read_bytes(&mut out), 5);
//! assert_eq!(&out, b"hello");
//! assert_eq!(ring.bytes_available(), 8);
//!
//! ring.remove_bytes(5);
//! assert_eq!(ring.space_available(), 5);
//! ```

use parking_lot::{Mutex, MutexGuard};

/// A bounded circular byte buffer with built-in mutual exclusion.
pub struct RingBuffer {
    inner: Mutex<Ring>,
}

/// Scoped acquisition of a [`RingBuffer`].
///
/// Holds the buffer's lock until dropped. Producers and consumers on other
/// threads block on their next call until the guard goes away.
pub struct RingBufferGuard<'a> {
    ring: MutexGuard<'a, Ring>,
}

struct Ring {
    storage: Box<[u8]>,
    read_cursor: usize,
    write_cursor: usize,
    occupied: usize,
}

impl Ring {
    fn capacity(&self) -> usize {
        self.storage.len()
    }

    fn space(&self) -> usize {
        self.capacity() - self.occupied
    }

    fn write(&mut self, data: &[u8]) -> usize {
        let count = data.len().min(self.space());
        if count == 0 {
            return 0;
        }

        let capacity = self.capacity();
        let first = count.min(capacity - self.write_cursor);
        let cursor = self.write_cursor;

        self.storage[cursor..cursor + first].copy_from_slice(&data[..first]);
        self.storage[..count - first].copy_from_slice(&data[first..count]);

        self.write_cursor = (cursor + count) % capacity;
        self.occupied += count;

        count
    }

    fn peek(&self, buffer: &mut [u8]) -> usize {
        let count = buffer.len().min(self.occupied);
        if count == 0 {
            return 0;
        }

        let first = count.min(self.capacity() - self.read_cursor);
        let cursor = self.read_cursor;

        buffer[..first].copy_from_slice(&self.storage[cursor..cursor + first]);
        buffer[first..count].copy_from_slice(&self.storage[..count - first]);

        count
    }

    fn remove(&mut self, count: usize) -> usize {
        let count = count.min(self.occupied);
        if count == 0 {
            return 0;
        }

        self.read_cursor = (self.read_cursor + count) % self.capacity();
        self.occupied -= count;

        // Rewind an empty buffer so the next write lands contiguously.
        if self.occupied == 0 {
            self.read_cursor = 0;
            self.write_cursor = 0;
        }

        count
    }

    fn clear(&mut self) {
        self.read_cursor = 0;
        self.write_cursor = 0;
        self.occupied = 0;
    }
}

impl RingBuffer {
    /// Creates an empty buffer holding at most `capacity` bytes.
    ///
    /// A zero capacity is allowed; such a buffer accepts and yields nothing.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Ring {
                storage: vec![0u8; capacity].into_boxed_slice(),
                read_cursor: 0,
                write_cursor: 0,
                occupied: 0,
            }),
        }
    }

    /// Acquires the buffer for a sequence of operations.
    pub fn lock(&self) -> RingBufferGuard<'_> {
        RingBufferGuard {
            ring: self.inner.lock(),
        }
    }

    /// Total number of bytes the buffer can hold.
    pub fn capacity(&self) -> usize {
        self.inner.lock().capacity()
    }

    /// Copies as much of `data` as fits and returns the number of bytes taken.
    ///
    /// Bytes beyond the free space are dropped; the buffer never grows.
    pub fn write_bytes(&self, data: &[u8]) -> usize {
        self.inner.lock().write(data)
    }

    /// Copies buffered bytes into `buffer` without consuming them.
    pub fn read_bytes(&self, buffer: &mut [u8]) -> usize {
        self.inner.lock().peek(buffer)
    }

    /// Consumes up to `count` bytes and returns how many were removed.
    pub fn remove_bytes(&self, count: usize) -> usize {
        self.inner.lock().remove(count)
    }

    /// Number of bytes waiting to be read.
    pub fn bytes_available(&self) -> usize {
        self.inner.lock().occupied
    }

    /// Number of bytes that can be written before the buffer is full.
    pub fn space_available(&self) -> usize {
        self.inner.lock().space()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes_available() == 0
    }

    pub fn is_full(&self) -> bool {
        self.space_available() == 0
    }

    /// Drops every buffered byte.
    pub fn clear(&self) {
        self.inner.lock().clear();
    }
}

impl RingBufferGuard<'_> {
    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    /// See [`RingBuffer::write_bytes`].
    pub fn write_bytes(&mut self, data: &[u8]) -> usize {
        self.ring.write(data)
    }

    /// See [`RingBuffer::read_bytes`].
    pub fn read_bytes(&self, buffer: &mut [u8]) -> usize {
        self.ring.peek(buffer)
    }

    /// See [`RingBuffer::remove_bytes`].
    pub fn remove_bytes(&mut self, count: usize) -> usize {
        self.ring.remove(count)
    }

    pub fn bytes_available(&self) -> usize {
        self.ring.occupied
    }

    pub fn space_available(&self) -> usize {
        self.ring.space()
    }

    pub fn clear(&mut self) {
        self.ring.clear();
    }
}
