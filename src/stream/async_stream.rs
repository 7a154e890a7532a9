//! Asynchronous façade over a blocking [`AsyncBackend`].
//!
//! An [`AsyncByteStream`] never blocks its caller. Reads and writes only touch
//! a pair of in-memory [`RingBuffer`]s; the shared background thread (see
//! [`IoService`]) performs the real I/O against the backend whenever the
//! stream's [`EventSource`] is signaled, and reports progress through a
//! callback.
//!
//! # Tick
//!
//! One dispatch of the source, a *tick*, does the following on the
//! background thread:
//!
//! 1. swaps the event flags with idle, capturing what is pending;
//! 2. if read space was freed and the read buffer still exists, asks the
//!    backend for up to the free space and admits whatever it produced;
//! 3. if data was written and the write buffer still exists, hands the
//!    buffered window to the backend and removes only what it accepted;
//! 4. invokes the callback once per direction that moved bytes, inline or
//!    on the target run loop.
//!
//! The tick resolves the current buffers when it starts and holds only weak
//! references to them while the backend works. If the stream was closed in
//! the meantime the references no longer resolve and that side is skipped.
//!
//! # Example
//!
//! ```no_run
//! use bytestream::fs::AsyncFileByteStream;
//! use bytestream::stream::{AsyncEvent, OpenMode};
//! use std::sync::mpsc;
//!
//! let (tx, rx) = mpsc::channel();
//! let mut stream = AsyncFileByteStream::with_handler(Default::default(), 4096, move |event, _| {
//!     let _ = tx.send(event);
//! });
//!
//! stream.open("/etc/hostname", OpenMode::IN)?;
//! assert_eq!(rx.recv().unwrap(), AsyncEvent::HasBytesAvailable);
//!
//! let mut buffer = [0u8; 256];
//! let read = stream.read_bytes(&mut buffer)?;
//! println!("{}", String::from_utf8_lossy(&buffer[..read]));
//! # Ok::<(), bytestream::StreamError>(())
//! ```

use crate::error::{Result, StreamError};
use crate::runloop::{EventSource, RunLoop};
use crate::service::IoService;
use crate::stream::{AsyncBackend, OpenMode};
use crate::utils::ring_buffer::RingBuffer;

use parking_lot::Mutex;
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Weak};

const IDLE: u8 = 0;
const READ_SPACE_AVAILABLE: u8 = 1 << 0;
const DATA_TO_WRITE: u8 = 1 << 1;

/// Progress reported to the stream's callback.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AsyncEvent {
    /// The read buffer received bytes from the backend.
    HasBytesAvailable,
    /// The backend drained bytes from the write buffer.
    HasSpaceAvailable,
}

/// Callback invoked with each [`AsyncEvent`] and a handle to the stream.
///
/// The stream owns its handler, so a handler that captures a
/// [`StreamHandle`] keeps the stream's state alive forever. Use the handle
/// passed to each call, or capture a [`WeakStreamHandle`].
pub type EventHandler<B> = Arc<dyn Fn(AsyncEvent, &StreamHandle<B>) + Send + Sync>;

struct StreamCore<B> {
    backend: Mutex<B>,
    capacity: usize,
    open: AtomicBool,
    events: AtomicU8,
    read_buffer: Mutex<Option<Arc<RingBuffer>>>,
    write_buffer: Mutex<Option<Arc<RingBuffer>>>,
    source: Mutex<Option<Arc<EventSource>>>,
    handler: Option<EventHandler<B>>,
    target: Mutex<Option<Arc<RunLoop>>>,
    service: Arc<IoService>,
}

/// Non-owning access to an [`AsyncByteStream`].
///
/// Handed to callbacks so they can read or write in response to an event.
/// Dropping a handle never closes the stream.
pub struct StreamHandle<B> {
    core: Arc<StreamCore<B>>,
}

/// A [`StreamHandle`] that does not keep the stream's state alive.
pub struct WeakStreamHandle<B> {
    core: Weak<StreamCore<B>>,
}

/// A stream whose reads and writes are serviced by the background I/O
/// thread.
///
/// Derefs to [`StreamHandle`] for the buffer-side operations. Dropping the
/// stream closes it.
pub struct AsyncByteStream<B: AsyncBackend> {
    handle: StreamHandle<B>,
}

impl<B: AsyncBackend> StreamCore<B> {
    fn notify(&self, event: u8) {
        self.events.fetch_or(event, Ordering::AcqRel);

        let source = self.source.lock().clone();
        if let Some(source) = source {
            source.signal();
        }
    }

    fn tick(self: &Arc<Self>) {
        let pending = self.events.swap(IDLE, Ordering::AcqRel);

        let read = downgrade_slot(&self.read_buffer);
        let write = downgrade_slot(&self.write_buffer);

        let produced = pending & READ_SPACE_AVAILABLE != 0 && self.fill(&read);
        let drained = pending & DATA_TO_WRITE != 0 && self.drain(&write);

        tracing::trace!(pending, produced, drained, "async stream tick");

        self.dispatch_events(produced, drained);
    }

    // The buffers are re-resolved after the backend returns: a close while
    // the backend blocked releases them, and the result is then dropped.
    // The read buffer only gains bytes here, so the space measured up front
    // is still free afterwards.
    fn fill(&self, read: &Weak<RingBuffer>) -> bool {
        let Some(space) = read.upgrade().map(|ring| ring.space_available()) else {
            return false;
        };
        if space == 0 {
            return false;
        }

        let mut scratch = vec![0u8; space];
        let produced = {
            let mut backend = self.backend.lock();
            let produced = backend.read_for_async(&mut scratch).min(space);
            if !backend.is_open() {
                self.open.store(false, Ordering::Release);
            }
            produced
        };

        let Some(ring) = read.upgrade() else {
            return false;
        };

        produced != 0 && ring.write_bytes(&scratch[..produced]) != 0
    }

    // Only this side removes from the write buffer, so the window copied
    // here stays at its head until the backend has taken what it wants.
    fn drain(&self, write: &Weak<RingBuffer>) -> bool {
        let Some(window) = write.upgrade().map(|ring| {
            let guard = ring.lock();
            let mut window = vec![0u8; guard.bytes_available()];
            let copied = guard.read_bytes(&mut window);
            window.truncate(copied);
            window
        }) else {
            return false;
        };

        if window.is_empty() {
            return false;
        }

        let accepted = {
            let mut backend = self.backend.lock();
            let accepted = backend.write_for_async(&window).min(window.len());
            if !backend.is_open() {
                self.open.store(false, Ordering::Release);
            }
            accepted
        };

        let Some(ring) = write.upgrade() else {
            return false;
        };

        if accepted == 0 {
            return false;
        }

        ring.remove_bytes(accepted);

        if accepted < window.len() {
            self.notify(DATA_TO_WRITE);
        }

        true
    }

    fn dispatch_events(self: &Arc<Self>, produced: bool, drained: bool) {
        if !produced && !drained {
            return;
        }

        let Some(handler) = self.handler.clone() else {
            return;
        };

        let handle = StreamHandle { core: self.clone() };
        let invocation = move || {
            if produced {
                handler(AsyncEvent::HasBytesAvailable, &handle);
            }
            if drained {
                handler(AsyncEvent::HasSpaceAvailable, &handle);
            }
        };

        let target = self.target.lock().clone();
        match target {
            Some(run_loop) => run_loop.perform(invocation),
            None => invocation(),
        }
    }
}

impl<B: AsyncBackend> StreamHandle<B> {
    /// Moves buffered bytes into `buffer` and consumes them.
    ///
    /// Never blocks on the backend. Freed space is reported to the
    /// background thread so it can refill the buffer.
    ///
    /// # Errors
    ///
    /// [`StreamError::NotOpenForReading`] when the stream has no read side.
    pub fn read_bytes(&self, buffer: &mut [u8]) -> Result<usize> {
        let ring = self
            .core
            .read_buffer
            .lock()
            .clone()
            .ok_or(StreamError::NotOpenForReading)?;

        let consumed = {
            let mut guard = ring.lock();
            let copied = guard.read_bytes(buffer);
            guard.remove_bytes(copied)
        };

        if consumed > 0 {
            self.core.notify(READ_SPACE_AVAILABLE);
        }

        Ok(consumed)
    }

    /// Queues as much of `buffer` as fits in the write buffer.
    ///
    /// Returns the number of bytes accepted, which is less than
    /// `buffer.len()` when the buffer is nearly full.
    ///
    /// # Errors
    ///
    /// [`StreamError::NotOpenForWriting`] when the stream has no write side.
    pub fn write_bytes(&self, buffer: &[u8]) -> Result<usize> {
        let ring = self
            .core
            .write_buffer
            .lock()
            .clone()
            .ok_or(StreamError::NotOpenForWriting)?;

        let accepted = ring.write_bytes(buffer);
        self.core.notify(DATA_TO_WRITE);

        Ok(accepted)
    }

    /// Bytes waiting in the read buffer.
    pub fn bytes_available(&self) -> usize {
        self.core
            .read_buffer
            .lock()
            .as_ref()
            .map_or(0, |ring| ring.bytes_available())
    }

    /// Free space in the write buffer.
    pub fn space_available(&self) -> usize {
        self.core
            .write_buffer
            .lock()
            .as_ref()
            .map_or(0, |ring| ring.space_available())
    }

    pub fn is_open(&self) -> bool {
        self.core.open.load(Ordering::Acquire)
    }

    /// Whether the stream is wired into the background run loop.
    pub fn is_async(&self) -> bool {
        self.core.source.lock().is_some()
    }

    /// Capacity requested for each ring buffer.
    pub fn capacity(&self) -> usize {
        self.core.capacity
    }

    /// Routes future callbacks through `run_loop` instead of running them on
    /// the background thread. `None` restores inline delivery.
    pub fn set_target_run_loop(&self, run_loop: Option<Arc<RunLoop>>) {
        *self.core.target.lock() = run_loop;
    }

    pub fn target_run_loop(&self) -> Option<Arc<RunLoop>> {
        self.core.target.lock().clone()
    }

    /// Runs `function` with exclusive access to the backend.
    ///
    /// Blocks while a tick is talking to the backend.
    pub fn with_backend<R>(&self, function: impl FnOnce(&mut B) -> R) -> R {
        function(&mut self.core.backend.lock())
    }

    /// A handle that can be captured by the stream's own handler.
    pub fn downgrade(&self) -> WeakStreamHandle<B> {
        WeakStreamHandle {
            core: Arc::downgrade(&self.core),
        }
    }
}

impl<B: AsyncBackend> WeakStreamHandle<B> {
    /// The stream's handle, unless its state has been released.
    pub fn upgrade(&self) -> Option<StreamHandle<B>> {
        self.core.upgrade().map(|core| StreamHandle { core })
    }
}

impl<B> Clone for WeakStreamHandle<B> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
        }
    }
}

impl<B> fmt::Debug for WeakStreamHandle<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakStreamHandle")
            .field("alive", &(self.core.strong_count() > 0))
            .finish()
    }
}

impl<B: AsyncBackend> Clone for StreamHandle<B> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
        }
    }
}

impl<B: AsyncBackend> fmt::Debug for StreamHandle<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamHandle")
            .field("capacity", &self.core.capacity)
            .field("open", &self.is_open())
            .field("async", &self.is_async())
            .field("bytes_available", &self.bytes_available())
            .field("space_available", &self.space_available())
            .finish()
    }
}

impl<B: AsyncBackend> AsyncByteStream<B> {
    /// Wraps `backend` without a callback, using the global I/O service.
    pub fn new(backend: B, capacity: usize) -> Self {
        Self::from_parts(backend, capacity, None, IoService::global())
    }

    /// Wraps `backend` and reports progress to `handler`.
    pub fn with_handler<F>(backend: B, capacity: usize, handler: F) -> Self
    where
        F: Fn(AsyncEvent, &StreamHandle<B>) + Send + Sync + 'static,
    {
        Self::with_handler_in(backend, capacity, handler, IoService::global())
    }

    /// Like [`with_handler`](Self::with_handler), serviced by `service`.
    pub fn with_handler_in<F>(
        backend: B,
        capacity: usize,
        handler: F,
        service: Arc<IoService>,
    ) -> Self
    where
        F: Fn(AsyncEvent, &StreamHandle<B>) + Send + Sync + 'static,
    {
        Self::from_parts(backend, capacity, Some(Arc::new(handler)), service)
    }

    /// Wraps `backend`, serviced by `service` rather than the global one.
    pub fn from_parts(
        backend: B,
        capacity: usize,
        handler: Option<EventHandler<B>>,
        service: Arc<IoService>,
    ) -> Self {
        Self {
            handle: StreamHandle {
                core: Arc::new(StreamCore {
                    backend: Mutex::new(backend),
                    capacity,
                    open: AtomicBool::new(false),
                    events: AtomicU8::new(READ_SPACE_AVAILABLE),
                    read_buffer: Mutex::new(None),
                    write_buffer: Mutex::new(None),
                    source: Mutex::new(None),
                    handler,
                    target: Mutex::new(None),
                    service,
                }),
            },
        }
    }

    /// A non-owning handle to this stream.
    pub fn handle(&self) -> StreamHandle<B> {
        self.handle.clone()
    }

    /// Allocates a ring buffer for each direction `mode` asks for.
    ///
    /// Buffers allocated here replace any previous ones, along with the bytes
    /// they held. On a stream already wired into the background loop, the
    /// next tick services the new buffers and a new read side starts filling
    /// straight away.
    pub fn open_buffers(&mut self, mode: OpenMode) {
        let core = &self.handle.core;

        if mode.is_readable() {
            *core.read_buffer.lock() = Some(Arc::new(RingBuffer::new(core.capacity)));
        }
        if mode.is_writable() {
            *core.write_buffer.lock() = Some(Arc::new(RingBuffer::new(core.capacity)));
        }

        core.open.store(true, Ordering::Release);

        if mode.is_readable() {
            core.notify(READ_SPACE_AVAILABLE);
        }
    }

    /// Wires the stream into the background run loop.
    ///
    /// A stream with a read side gets an immediate tick to start filling it.
    ///
    /// # Errors
    ///
    /// [`StreamError::AlreadyAsync`] if the stream is already wired, or an
    /// I/O error if the background thread could not be started.
    pub fn init_async_handler(&self) -> Result<()> {
        let core = &self.handle.core;
        let mut slot = core.source.lock();

        if slot.is_some() {
            return Err(StreamError::AlreadyAsync);
        }

        let prefill = core.read_buffer.lock().is_some();

        let weak_core = Arc::downgrade(core);
        let source = Arc::new(EventSource::new(move |_| {
            if let Some(core) = weak_core.upgrade() {
                core.tick();
            }
        }));

        core.service.register(&source)?;
        *slot = Some(source.clone());
        drop(slot);

        if prefill {
            source.signal();
        }

        Ok(())
    }

    /// Opens the backend with `open`, then allocates buffers for `mode` and
    /// wires the stream into the background loop.
    ///
    /// Any previous session is closed first. If `open` fails, the stream
    /// stays closed.
    pub fn open_backend<F>(&mut self, mode: OpenMode, open: F) -> Result<()>
    where
        F: FnOnce(&mut B) -> Result<()>,
    {
        self.close();
        self.handle.with_backend(open)?;

        if !self.handle.with_backend(|backend| backend.is_open()) {
            return Err(StreamError::NotOpen);
        }

        self.open_buffers(mode);

        if let Err(error) = self.init_async_handler() {
            self.close();
            return Err(error);
        }

        tracing::debug!(?mode, capacity = self.handle.capacity(), "async stream opened");
        Ok(())
    }

    /// Cancels the async machinery, releases the buffers and closes the
    /// backend, in that order.
    ///
    /// A tick already running finishes against buffers that may no longer
    /// exist; the backend is closed only once that tick lets go of it.
    pub fn close(&mut self) {
        let core = &self.handle.core;

        let source = core.source.lock().take();
        if let Some(source) = source {
            source.cancel();
        }

        core.read_buffer.lock().take();
        core.write_buffer.lock().take();
        core.events.store(READ_SPACE_AVAILABLE, Ordering::Release);

        let was_open = core.open.swap(false, Ordering::AcqRel);
        core.backend.lock().close();

        if was_open {
            tracing::debug!("async stream closed");
        }
    }
}

fn downgrade_slot(slot: &Mutex<Option<Arc<RingBuffer>>>) -> Weak<RingBuffer> {
    slot.lock().as_ref().map(Arc::downgrade).unwrap_or_default()
}

impl<B: AsyncBackend> Deref for AsyncByteStream<B> {
    type Target = StreamHandle<B>;

    fn deref(&self) -> &StreamHandle<B> {
        &self.handle
    }
}

impl<B: AsyncBackend> Drop for AsyncByteStream<B> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<B: AsyncBackend> fmt::Debug for AsyncByteStream<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AsyncByteStream").field(&self.handle).finish()
    }
}
