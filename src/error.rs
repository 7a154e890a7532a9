//! Error types shared by every stream flavour.

use crate::stream::OpenMode;

use thiserror::Error;

/// Result type for stream operations.
pub type Result<T> = std::result::Result<T, StreamError>;

/// Errors reported synchronously to the caller.
///
/// Failures that happen on the background I/O thread are never surfaced
/// here: a failed tick simply produces no callback.
#[derive(Error, Debug)]
pub enum StreamError {
    /// A read was issued on an async stream without a read buffer.
    #[error("stream not opened for reading")]
    NotOpenForReading,

    /// A write was issued on an async stream without a write buffer.
    #[error("stream not opened for writing")]
    NotOpenForWriting,

    /// `init_async_handler` was called twice on the same stream.
    #[error("this stream is already set up for async operation")]
    AlreadyAsync,

    /// The backend refused to open, or was used after it closed.
    #[error("stream is not open")]
    NotOpen,

    /// The requested combination of open flags has no file equivalent.
    #[error("invalid open mode: {0:?}")]
    InvalidOpenMode(OpenMode),

    /// The archive has no entry matching the requested path.
    #[error("archive entry not found: {0}")]
    EntryNotFound(String),

    /// The archive entry uses a compression method this crate cannot stream.
    #[error("unsupported compression: {0}")]
    UnsupportedCompression(String),

    /// The archive library rejected the archive or the entry.
    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
