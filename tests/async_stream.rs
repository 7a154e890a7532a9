use bytestream::stream::{
    AsyncBackend, AsyncByteStream, AsyncEvent, ByteStream, OpenMode, WeakStreamHandle,
};
use bytestream::{IoService, IoServiceBuilder, RunLoop, StreamError};
use std::io::SeekFrom;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock, mpsc};
use std::thread;
use std::time::{Duration, Instant};

const WAIT: Duration = Duration::from_secs(5);

/// Produces its payload once, on the first read.
struct OneShotSource {
    payload: Option<Vec<u8>>,
    open: bool,
}

impl OneShotSource {
    fn new(payload: &[u8]) -> Self {
        Self {
            payload: Some(payload.to_vec()),
            open: true,
        }
    }
}

impl ByteStream for OneShotSource {
    fn is_open(&self) -> bool {
        self.open
    }

    fn close(&mut self) {
        self.open = false;
    }

    fn read_bytes(&mut self, buffer: &mut [u8]) -> usize {
        match self.payload.take() {
            Some(payload) => {
                let count = payload.len().min(buffer.len());
                buffer[..count].copy_from_slice(&payload[..count]);
                count
            }
            None => 0,
        }
    }

    fn write_bytes(&mut self, _buffer: &[u8]) -> usize {
        0
    }

    fn seek(&mut self, _position: SeekFrom) -> u64 {
        0
    }

    fn bytes_available(&self) -> usize {
        self.payload.as_ref().map_or(0, Vec::len)
    }

    fn space_available(&self) -> usize {
        0
    }
}

impl AsyncBackend for OneShotSource {}

/// Accepts at most `limit` bytes per call and records every call.
struct CappedSink {
    limit: usize,
    received: Arc<Mutex<Vec<u8>>>,
    chunks: Arc<Mutex<Vec<usize>>>,
}

impl ByteStream for CappedSink {
    fn is_open(&self) -> bool {
        true
    }

    fn close(&mut self) {}

    fn read_bytes(&mut self, _buffer: &mut [u8]) -> usize {
        0
    }

    fn write_bytes(&mut self, buffer: &[u8]) -> usize {
        let accepted = buffer.len().min(self.limit);
        self.received.lock().unwrap().extend_from_slice(&buffer[..accepted]);
        self.chunks.lock().unwrap().push(accepted);
        accepted
    }

    fn seek(&mut self, _position: SeekFrom) -> u64 {
        0
    }

    fn bytes_available(&self) -> usize {
        0
    }

    fn space_available(&self) -> usize {
        self.limit
    }
}

impl AsyncBackend for CappedSink {}

/// Blocks inside the backend read until released, announcing when it starts.
struct GatedSource {
    entered: mpsc::Sender<()>,
    delay: Duration,
    closed: Arc<AtomicUsize>,
}

impl ByteStream for GatedSource {
    fn is_open(&self) -> bool {
        self.closed.load(Ordering::SeqCst) == 0
    }

    fn close(&mut self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }

    fn read_bytes(&mut self, buffer: &mut [u8]) -> usize {
        let _ = self.entered.send(());
        thread::sleep(self.delay);
        buffer.fill(b'x');
        buffer.len()
    }

    fn write_bytes(&mut self, _buffer: &[u8]) -> usize {
        0
    }

    fn seek(&mut self, _position: SeekFrom) -> u64 {
        0
    }

    fn bytes_available(&self) -> usize {
        usize::MAX
    }

    fn space_available(&self) -> usize {
        0
    }
}

impl AsyncBackend for GatedSource {}

/// Fails its first read the way a corrupt source does: closes and yields 0.
struct FailingSource {
    open: bool,
    reads: Arc<AtomicUsize>,
}

impl ByteStream for FailingSource {
    fn is_open(&self) -> bool {
        self.open
    }

    fn close(&mut self) {
        self.open = false;
    }

    fn read_bytes(&mut self, _buffer: &mut [u8]) -> usize {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.close();
        0
    }

    fn write_bytes(&mut self, _buffer: &[u8]) -> usize {
        0
    }

    fn seek(&mut self, _position: SeekFrom) -> u64 {
        0
    }

    fn bytes_available(&self) -> usize {
        usize::from(self.open)
    }

    fn space_available(&self) -> usize {
        0
    }
}

impl AsyncBackend for FailingSource {}

fn private_service() -> Arc<IoService> {
    IoServiceBuilder::new()
        .idle_tick(Duration::from_millis(1))
        .max_idle_ticks(50)
        .build()
}

fn recording_stream<B: AsyncBackend>(
    backend: B,
    capacity: usize,
    service: Arc<IoService>,
) -> (AsyncByteStream<B>, mpsc::Receiver<AsyncEvent>) {
    let (events_tx, events_rx) = mpsc::channel();
    let events_tx = Mutex::new(events_tx);

    let stream = AsyncByteStream::with_handler_in(
        backend,
        capacity,
        move |event, _| {
            let _ = events_tx.lock().unwrap().send(event);
        },
        service,
    );

    (stream, events_rx)
}

#[test]
fn hello_world_arrives_with_one_callback() {
    let (mut stream, events) =
        recording_stream(OneShotSource::new(b"hello world"), 4096, private_service());

    stream.open_buffers(OpenMode::IN);
    stream.init_async_handler().unwrap();

    assert_eq!(events.recv_timeout(WAIT).unwrap(), AsyncEvent::HasBytesAvailable);
    assert_eq!(stream.bytes_available(), 11);

    let mut buffer = [0u8; 64];
    let read = stream.read_bytes(&mut buffer).unwrap();
    assert_eq!(&buffer[..read], b"hello world");
    assert_eq!(stream.bytes_available(), 0);

    // The refill triggered by that read finds the source exhausted.
    assert!(events.recv_timeout(Duration::from_millis(100)).is_err());

    stream.close();
}

#[test]
fn short_writes_drain_over_several_ticks() {
    let received = Arc::new(Mutex::new(Vec::new()));
    let chunks = Arc::new(Mutex::new(Vec::new()));
    let sink = CappedSink {
        limit: 4096,
        received: received.clone(),
        chunks: chunks.clone(),
    };

    let (mut stream, events) = recording_stream(sink, 8192, private_service());
    stream.open_buffers(OpenMode::OUT);
    stream.init_async_handler().unwrap();

    let payload: Vec<u8> = (0..5000u32).map(|i| (i % 256) as u8).collect();
    assert_eq!(stream.write_bytes(&payload).unwrap(), 5000);

    assert_eq!(events.recv_timeout(WAIT).unwrap(), AsyncEvent::HasSpaceAvailable);
    assert_eq!(events.recv_timeout(WAIT).unwrap(), AsyncEvent::HasSpaceAvailable);
    assert!(events.recv_timeout(Duration::from_millis(100)).is_err());

    assert_eq!(*chunks.lock().unwrap(), vec![4096, 904]);
    assert_eq!(*received.lock().unwrap(), payload);
    assert_eq!(stream.space_available(), 8192);

    stream.close();
}

#[test]
fn write_larger_than_capacity_is_truncated() {
    let sink = CappedSink {
        limit: usize::MAX,
        received: Arc::default(),
        chunks: Arc::default(),
    };

    let (mut stream, _events) = recording_stream(sink, 16, private_service());
    stream.open_buffers(OpenMode::OUT);

    assert_eq!(stream.write_bytes(&[7u8; 40]).unwrap(), 16);
    assert_eq!(stream.space_available(), 0);

    stream.close();
}

#[test]
fn directions_follow_the_open_mode() {
    let (mut reader, _) = recording_stream(OneShotSource::new(b""), 64, private_service());
    reader.open_buffers(OpenMode::IN);
    assert!(matches!(
        reader.write_bytes(b"nope"),
        Err(StreamError::NotOpenForWriting)
    ));
    assert_eq!(reader.space_available(), 0);

    let sink = CappedSink {
        limit: 8,
        received: Arc::default(),
        chunks: Arc::default(),
    };
    let (mut writer, _) = recording_stream(sink, 64, private_service());
    writer.open_buffers(OpenMode::OUT | OpenMode::TRUNC);

    let mut buffer = [0u8; 4];
    assert!(matches!(
        writer.read_bytes(&mut buffer),
        Err(StreamError::NotOpenForReading)
    ));
    assert_eq!(writer.bytes_available(), 0);

    reader.close();
    writer.close();
}

#[test]
fn unopened_stream_rejects_both_directions() {
    let stream = AsyncByteStream::new(OneShotSource::new(b"data"), 32);
    let mut buffer = [0u8; 4];

    assert!(!stream.is_open());
    assert!(matches!(
        stream.read_bytes(&mut buffer),
        Err(StreamError::NotOpenForReading)
    ));
    assert!(matches!(
        stream.write_bytes(b"data"),
        Err(StreamError::NotOpenForWriting)
    ));
}

#[test]
fn async_handler_can_only_be_installed_once() {
    let (mut stream, _) = recording_stream(OneShotSource::new(b"x"), 32, private_service());
    stream.open_buffers(OpenMode::IN);

    assert!(!stream.is_async());
    stream.init_async_handler().unwrap();
    assert!(stream.is_async());
    assert!(matches!(
        stream.init_async_handler(),
        Err(StreamError::AlreadyAsync)
    ));

    stream.close();
    assert!(!stream.is_async());
}

#[test]
fn closing_during_a_tick_discards_its_result() {
    let (entered_tx, entered_rx) = mpsc::channel();
    let closed = Arc::new(AtomicUsize::new(0));
    let backend = GatedSource {
        entered: entered_tx,
        delay: Duration::from_millis(100),
        closed: closed.clone(),
    };

    let (mut stream, events) = recording_stream(backend, 32, private_service());
    stream.open_buffers(OpenMode::IN);
    stream.init_async_handler().unwrap();

    entered_rx.recv_timeout(WAIT).unwrap();
    stream.close();

    assert!(closed.load(Ordering::SeqCst) >= 1);
    assert!(!stream.is_open());
    assert!(events.recv_timeout(Duration::from_millis(200)).is_err());

    let mut buffer = [0u8; 8];
    assert!(matches!(
        stream.read_bytes(&mut buffer),
        Err(StreamError::NotOpenForReading)
    ));
}

#[test]
fn callbacks_can_run_on_a_target_run_loop() {
    let (loop_tx, loop_rx) = mpsc::channel();
    let target = thread::spawn(move || {
        let run_loop = RunLoop::current();
        loop_tx.send(run_loop.clone()).unwrap();

        loop {
            match run_loop.run(true, WAIT) {
                bytestream::ExitReason::Stopped => break,
                bytestream::ExitReason::Finished => thread::sleep(Duration::from_millis(1)),
                _ => {}
            }
        }
    });

    let run_loop = loop_rx.recv().unwrap();
    let target_id = target.thread().id();

    let (seen_tx, seen_rx) = mpsc::channel();
    let seen_tx = Mutex::new(seen_tx);
    let mut stream = AsyncByteStream::with_handler_in(
        OneShotSource::new(b"routed"),
        64,
        move |event, _| {
            let _ = seen_tx.lock().unwrap().send((event, thread::current().id()));
        },
        private_service(),
    );

    stream.set_target_run_loop(Some(run_loop.clone()));
    assert!(stream.target_run_loop().is_some());

    stream.open_buffers(OpenMode::IN);
    stream.init_async_handler().unwrap();

    let (event, thread_id) = seen_rx.recv_timeout(WAIT).unwrap();
    assert_eq!(event, AsyncEvent::HasBytesAvailable);
    assert_eq!(thread_id, target_id);

    stream.close();
    run_loop.stop();
    target.join().unwrap();
}

#[test]
fn callbacks_can_read_through_the_handle() {
    let (data_tx, data_rx) = mpsc::channel();
    let data_tx = Mutex::new(data_tx);

    let mut stream = AsyncByteStream::with_handler_in(
        OneShotSource::new(b"read from callback"),
        64,
        move |event, handle| {
            if event == AsyncEvent::HasBytesAvailable {
                let mut buffer = [0u8; 64];
                if let Ok(read) = handle.read_bytes(&mut buffer) {
                    let _ = data_tx.lock().unwrap().send(buffer[..read].to_vec());
                }
            }
        },
        private_service(),
    );

    stream.open_buffers(OpenMode::IN);
    stream.init_async_handler().unwrap();

    assert_eq!(data_rx.recv_timeout(WAIT).unwrap(), b"read from callback");
    stream.close();
}

#[test]
fn backend_is_reachable_directly() {
    let stream = AsyncByteStream::new(OneShotSource::new(b"abc"), 8);

    assert_eq!(stream.with_backend(|backend| backend.bytes_available()), 3);
    assert_eq!(stream.capacity(), 8);
}

#[test]
fn dropping_the_stream_lets_the_service_retire() {
    let service = IoServiceBuilder::new()
        .run_timeout(Duration::from_millis(20))
        .idle_tick(Duration::from_millis(1))
        .max_idle_ticks(5)
        .build();

    let (mut stream, events) =
        recording_stream(OneShotSource::new(b"bye"), 16, service.clone());
    stream.open_buffers(OpenMode::IN);
    stream.init_async_handler().unwrap();
    events.recv_timeout(WAIT).unwrap();
    drop(stream);

    let deadline = Instant::now() + WAIT;
    while service.is_running() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(2));
    }
    assert!(!service.is_running());
}

#[test]
fn failed_backend_read_closes_the_stream_silently() {
    let reads = Arc::new(AtomicUsize::new(0));
    let backend = FailingSource {
        open: true,
        reads: reads.clone(),
    };

    let (mut stream, events) = recording_stream(backend, 64, private_service());
    stream.open_buffers(OpenMode::IN);
    stream.init_async_handler().unwrap();
    assert!(stream.is_async());

    let deadline = Instant::now() + WAIT;
    while stream.is_open() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(2));
    }

    assert!(!stream.is_open());
    assert_eq!(reads.load(Ordering::SeqCst), 1);
    assert!(events.recv_timeout(Duration::from_millis(100)).is_err());
    assert_eq!(stream.bytes_available(), 0);

    stream.close();
}

#[test]
fn reopened_buffers_are_serviced_after_wiring() {
    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = CappedSink {
        limit: usize::MAX,
        received: received.clone(),
        chunks: Arc::default(),
    };

    let (mut stream, events) = recording_stream(sink, 64, private_service());
    stream.open_buffers(OpenMode::OUT);
    stream.init_async_handler().unwrap();
    stream.open_buffers(OpenMode::OUT);

    assert_eq!(stream.write_bytes(b"after rewiring").unwrap(), 14);
    assert_eq!(events.recv_timeout(WAIT).unwrap(), AsyncEvent::HasSpaceAvailable);
    assert_eq!(*received.lock().unwrap(), b"after rewiring");
    assert_eq!(stream.space_available(), 64);

    stream.close();
}

#[test]
fn read_side_added_after_wiring_starts_filling() {
    let (mut reader, events) =
        recording_stream(OneShotSource::new(b"late"), 64, private_service());
    reader.open_buffers(OpenMode::OUT);
    reader.init_async_handler().unwrap();
    reader.open_buffers(OpenMode::IN);

    assert_eq!(events.recv_timeout(WAIT).unwrap(), AsyncEvent::HasBytesAvailable);
    assert_eq!(reader.bytes_available(), 4);

    reader.close();
}

#[test]
fn weak_handle_in_the_handler_does_not_outlive_the_stream() {
    let slot: Arc<OnceLock<WeakStreamHandle<OneShotSource>>> = Arc::new(OnceLock::new());
    let (data_tx, data_rx) = mpsc::channel();
    let data_tx = Mutex::new(data_tx);

    let captured = slot.clone();
    let mut stream = AsyncByteStream::with_handler_in(
        OneShotSource::new(b"weakly held"),
        64,
        move |event, _| {
            let Some(handle) = captured.get().and_then(WeakStreamHandle::upgrade) else {
                return;
            };
            if event == AsyncEvent::HasBytesAvailable {
                let mut buffer = [0u8; 64];
                if let Ok(read) = handle.read_bytes(&mut buffer) {
                    let _ = data_tx.lock().unwrap().send(buffer[..read].to_vec());
                }
            }
        },
        private_service(),
    );

    let weak = stream.downgrade();
    slot.set(weak.clone()).unwrap();

    stream.open_buffers(OpenMode::IN);
    stream.init_async_handler().unwrap();
    assert_eq!(data_rx.recv_timeout(WAIT).unwrap(), b"weakly held");
    assert!(weak.upgrade().is_some());

    drop(stream);

    let deadline = Instant::now() + WAIT;
    while weak.upgrade().is_some() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(2));
    }
    assert!(weak.upgrade().is_none());
}
