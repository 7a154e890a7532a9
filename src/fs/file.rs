//! Blocking file stream over raw descriptors.
//!
//! `FileByteStream` speaks the [`ByteStream`] contract directly on top of
//! `open`/`read`/`write`/`lseek`. It is the backend the async adapter drives
//! from its background thread, so every call may block.

use crate::error::{Result, StreamError};
use crate::stream::{AsyncBackend, AsyncByteStream, ByteStream, OpenMode};

use libc::{
    O_APPEND, O_CLOEXEC, O_CREAT, O_RDONLY, O_RDWR, O_TRUNC, O_WRONLY, SEEK_CUR, SEEK_END,
    SEEK_SET, c_int, off_t,
};
use std::ffi::CString;
use std::io::{self, SeekFrom};
use std::mem::MaybeUninit;

const IN: OpenMode = OpenMode::IN;
const OUT: OpenMode = OpenMode::OUT;
const APP: OpenMode = OpenMode::APP;
const TRUNC: OpenMode = OpenMode::TRUNC;

/// Accepted mode combinations (ignoring `BINARY` and `ATE`) and their
/// `open(2)` flags.
const MODE_FLAGS: [(OpenMode, c_int); 9] = [
    (IN, O_RDONLY),
    (OUT, O_WRONLY | O_CREAT | O_TRUNC),
    (OUT.union(TRUNC), O_WRONLY | O_CREAT | O_TRUNC),
    (APP, O_WRONLY | O_CREAT | O_APPEND),
    (OUT.union(APP), O_WRONLY | O_CREAT | O_APPEND),
    (IN.union(OUT), O_RDWR),
    (IN.union(OUT).union(TRUNC), O_RDWR | O_CREAT | O_TRUNC),
    (IN.union(APP), O_RDWR | O_CREAT | O_APPEND),
    (IN.union(OUT).union(APP), O_RDWR | O_CREAT | O_APPEND),
];

/// A file opened for blocking byte I/O.
///
/// A default-constructed stream is closed; reads and writes on a closed
/// stream move zero bytes. Dropping the stream closes the descriptor.
#[derive(Debug, Default)]
pub struct FileByteStream {
    file_descriptor: Option<c_int>,
}

/// [`FileByteStream`] behind the asynchronous adapter.
pub type AsyncFileByteStream = AsyncByteStream<FileByteStream>;

impl FileByteStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens `path` with `mode`, closing any file opened before.
    ///
    /// `APP` and `ATE` leave the position at the end of the file.
    ///
    /// # Errors
    ///
    /// [`StreamError::InvalidOpenMode`] for a combination that has no file
    /// equivalent (for example `TRUNC` alone), or the OS error from
    /// `open(2)`.
    pub fn open(&mut self, path: &str, mode: OpenMode) -> Result<()> {
        self.close();

        let flags = open_flags(mode)?;
        let file_descriptor = open_fd(path, flags | O_CLOEXEC)?;
        self.file_descriptor = Some(file_descriptor);

        if mode.intersects(OpenMode::APP.union(OpenMode::ATE))
            && let Err(error) = seek_fd(file_descriptor, 0, SEEK_END)
        {
            self.close();
            return Err(error.into());
        }

        tracing::debug!(path, ?mode, "file opened");
        Ok(())
    }

    /// The underlying descriptor while the file is open.
    pub fn file_descriptor(&self) -> Option<c_int> {
        self.file_descriptor
    }

    /// Current size of the file in bytes.
    pub fn size(&self) -> io::Result<u64> {
        let file_descriptor = self.file_descriptor.ok_or_else(closed_error)?;
        file_size(file_descriptor)
    }

    /// Current position in the file.
    pub fn position(&self) -> io::Result<u64> {
        let file_descriptor = self.file_descriptor.ok_or_else(closed_error)?;
        seek_fd(file_descriptor, 0, SEEK_CUR)
    }
}

impl ByteStream for FileByteStream {
    fn is_open(&self) -> bool {
        self.file_descriptor.is_some()
    }

    fn close(&mut self) {
        if let Some(file_descriptor) = self.file_descriptor.take() {
            unsafe {
                libc::close(file_descriptor);
            }
        }
    }

    fn read_bytes(&mut self, buffer: &mut [u8]) -> usize {
        let Some(file_descriptor) = self.file_descriptor else {
            return 0;
        };

        let mut total = 0;
        while total < buffer.len() {
            match read_fd(file_descriptor, &mut buffer[total..]) {
                Ok(0) => break,
                Ok(read) => total += read,
                Err(error) => {
                    tracing::warn!(%error, "file read failed");
                    break;
                }
            }
        }

        total
    }

    fn write_bytes(&mut self, buffer: &[u8]) -> usize {
        let Some(file_descriptor) = self.file_descriptor else {
            return 0;
        };

        let mut total = 0;
        while total < buffer.len() {
            match write_fd(file_descriptor, &buffer[total..]) {
                Ok(0) => break,
                Ok(written) => total += written,
                Err(error) => {
                    tracing::warn!(%error, "file write failed");
                    break;
                }
            }
        }

        total
    }

    fn seek(&mut self, position: SeekFrom) -> u64 {
        let Some(file_descriptor) = self.file_descriptor else {
            return 0;
        };

        let (offset, whence) = match position {
            SeekFrom::Start(offset) => (off_t::try_from(offset).unwrap_or(off_t::MAX), SEEK_SET),
            SeekFrom::Current(offset) => (offset as off_t, SEEK_CUR),
            SeekFrom::End(offset) => (offset as off_t, SEEK_END),
        };

        seek_fd(file_descriptor, offset, whence)
            .or_else(|error| {
                tracing::debug!(%error, ?position, "seek failed");
                seek_fd(file_descriptor, 0, SEEK_CUR)
            })
            .unwrap_or(0)
    }

    fn bytes_available(&self) -> usize {
        match (self.size(), self.position()) {
            (Ok(size), Ok(position)) => {
                usize::try_from(size.saturating_sub(position)).unwrap_or(usize::MAX)
            }
            _ => 0,
        }
    }

    fn space_available(&self) -> usize {
        usize::MAX
    }
}

impl AsyncBackend for FileByteStream {}

impl Drop for FileByteStream {
    fn drop(&mut self) {
        self.close();
    }
}

impl AsyncByteStream<FileByteStream> {
    /// Opens `path` and starts servicing it from the background thread.
    ///
    /// Buffers are allocated for each direction `mode` names; a readable
    /// stream starts filling its read buffer right away.
    pub fn open(&mut self, path: &str, mode: OpenMode) -> Result<()> {
        self.open_backend(mode, |file| file.open(path, mode))
    }
}

fn open_flags(mode: OpenMode) -> Result<c_int> {
    let base = mode.without(OpenMode::BINARY.union(OpenMode::ATE));

    MODE_FLAGS
        .iter()
        .find(|(accepted, _)| *accepted == base)
        .map(|(_, flags)| *flags)
        .ok_or(StreamError::InvalidOpenMode(mode))
}

fn closed_error() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "file is not open")
}

fn open_fd(path: &str, flags: c_int) -> io::Result<c_int> {
    let c_path = CString::new(path)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "path contains null byte"))?;

    let file_descriptor = unsafe {
        if flags & O_CREAT != 0 {
            libc::open(c_path.as_ptr(), flags, 0o644 as libc::c_uint)
        } else {
            libc::open(c_path.as_ptr(), flags)
        }
    };

    if file_descriptor < 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(file_descriptor)
}

fn read_fd(file_descriptor: c_int, buffer: &mut [u8]) -> io::Result<usize> {
    loop {
        let read = unsafe { libc::read(file_descriptor, buffer.as_mut_ptr().cast(), buffer.len()) };

        if read >= 0 {
            return Ok(read as usize);
        }

        let error = io::Error::last_os_error();
        if error.kind() != io::ErrorKind::Interrupted {
            return Err(error);
        }
    }
}

fn write_fd(file_descriptor: c_int, buffer: &[u8]) -> io::Result<usize> {
    loop {
        let written = unsafe { libc::write(file_descriptor, buffer.as_ptr().cast(), buffer.len()) };

        if written >= 0 {
            return Ok(written as usize);
        }

        let error = io::Error::last_os_error();
        if error.kind() != io::ErrorKind::Interrupted {
            return Err(error);
        }
    }
}

fn seek_fd(file_descriptor: c_int, offset: off_t, whence: c_int) -> io::Result<u64> {
    let position = unsafe { libc::lseek(file_descriptor, offset, whence) };

    if position < 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(position as u64)
}

fn file_size(file_descriptor: c_int) -> io::Result<u64> {
    let mut stat = MaybeUninit::<libc::stat>::uninit();

    if unsafe { libc::fstat(file_descriptor, stat.as_mut_ptr()) } < 0 {
        return Err(io::Error::last_os_error());
    }

    let stat = unsafe { stat.assume_init() };
    Ok(stat.st_size as u64)
}
