//! Read-only stream over one zip entry.

use crate::archive::{EntryFlags, ZipArchive};
use crate::error::{Result, StreamError};
use crate::stream::{AsyncBackend, AsyncByteStream, ByteStream, OpenMode};

use crc32fast::Hasher;
use flate2::read::DeflateDecoder;
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use zip::CompressionMethod;

/// Streams the bytes of a single archive entry.
///
/// Decoded entries are checked against their CRC-32 as the last byte comes
/// through. A mismatch, or data that ends before the recorded size, is a
/// read failure: the stream closes and the read returns 0.
///
/// Writes are refused and seeking is not supported: `seek` reports the
/// number of bytes consumed so far and does not move.
#[derive(Default)]
pub struct ZipEntryByteStream {
    entry: Option<OpenEntry>,
}

/// [`ZipEntryByteStream`] behind the asynchronous adapter.
pub type AsyncZipEntryByteStream = AsyncByteStream<ZipEntryByteStream>;

struct OpenEntry {
    name: String,
    reader: Box<dyn Read + Send>,
    remaining: u64,
    consumed: u64,
}

impl ZipEntryByteStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens the entry `path` of `archive`, closing any entry opened before.
    ///
    /// # Errors
    ///
    /// [`StreamError::EntryNotFound`] when no file entry matches,
    /// [`StreamError::UnsupportedCompression`] for methods other than stored
    /// and deflated (unless `COMPRESSED` asks for the raw bytes), or the
    /// error from reopening the archive file.
    pub fn open(&mut self, archive: &ZipArchive, path: &str, flags: EntryFlags) -> Result<()> {
        self.close();

        let location = archive.locate(path, flags)?;
        let raw = flags.contains(EntryFlags::COMPRESSED);

        let mut file = File::open(archive.path())?;
        file.seek(SeekFrom::Start(location.data_start))?;
        let stored = BufReader::new(file).take(location.compressed_size);

        let (remaining, checksum) = if raw {
            (location.compressed_size, None)
        } else {
            (location.size, Some(location.crc32))
        };

        let reader: Box<dyn Read + Send> = match location.compression {
            _ if raw => Box::new(CheckedReader::new(stored, remaining, checksum)),
            CompressionMethod::Stored => {
                Box::new(CheckedReader::new(stored, remaining, checksum))
            }
            CompressionMethod::Deflated => Box::new(CheckedReader::new(
                DeflateDecoder::new(stored),
                remaining,
                checksum,
            )),
            other => {
                return Err(StreamError::UnsupportedCompression(format!("{other:?}")));
            }
        };

        tracing::debug!(
            entry = %location.name,
            compression = ?location.compression,
            raw,
            remaining,
            "zip entry opened"
        );

        self.entry = Some(OpenEntry {
            name: location.name,
            reader,
            remaining,
            consumed: 0,
        });

        Ok(())
    }

    /// Name of the open entry as stored in the archive.
    pub fn entry_name(&self) -> Option<&str> {
        self.entry.as_ref().map(|entry| entry.name.as_str())
    }
}

impl ByteStream for ZipEntryByteStream {
    fn is_open(&self) -> bool {
        self.entry.is_some()
    }

    fn close(&mut self) {
        self.entry = None;
    }

    fn read_bytes(&mut self, buffer: &mut [u8]) -> usize {
        let Some(entry) = self.entry.as_mut() else {
            return 0;
        };

        let wanted = usize::try_from(entry.remaining)
            .map_or(buffer.len(), |remaining| remaining.min(buffer.len()));

        match read_up_to(&mut entry.reader, &mut buffer[..wanted]) {
            Ok(read) => {
                entry.remaining -= read as u64;
                entry.consumed += read as u64;
                read
            }
            Err(error) => {
                tracing::warn!(entry = %entry.name, %error, "zip entry read failed");
                self.close();
                0
            }
        }
    }

    fn write_bytes(&mut self, _buffer: &[u8]) -> usize {
        0
    }

    fn seek(&mut self, _position: SeekFrom) -> u64 {
        self.entry.as_ref().map_or(0, |entry| entry.consumed)
    }

    fn bytes_available(&self) -> usize {
        self.entry.as_ref().map_or(0, |entry| {
            usize::try_from(entry.remaining).unwrap_or(usize::MAX)
        })
    }

    fn space_available(&self) -> usize {
        0
    }
}

impl AsyncBackend for ZipEntryByteStream {}

impl AsyncByteStream<ZipEntryByteStream> {
    /// Opens an entry and starts filling the read buffer in the background.
    pub fn open(&mut self, archive: &ZipArchive, path: &str, flags: EntryFlags) -> Result<()> {
        self.open_backend(OpenMode::IN, |entry| entry.open(archive, path, flags))
    }
}

/// Caps a reader at the entry's recorded length and verifies it.
///
/// Running dry early is an error. With a checksum, the read that delivers
/// the final byte fails unless the CRC-32 of everything read matches.
struct CheckedReader<R> {
    inner: R,
    remaining: u64,
    checksum: Option<(Hasher, u32)>,
}

impl<R: Read> CheckedReader<R> {
    fn new(inner: R, length: u64, expected: Option<u32>) -> Self {
        Self {
            inner,
            remaining: length,
            checksum: expected.map(|crc| (Hasher::new(), crc)),
        }
    }
}

impl<R: Read> Read for CheckedReader<R> {
    fn read(&mut self, buffer: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 || buffer.is_empty() {
            return Ok(0);
        }

        let wanted = usize::try_from(self.remaining)
            .map_or(buffer.len(), |remaining| remaining.min(buffer.len()));
        let read = self.inner.read(&mut buffer[..wanted])?;

        if read == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("entry data ends {} bytes early", self.remaining),
            ));
        }

        self.remaining -= read as u64;

        if let Some((hasher, expected)) = self.checksum.as_mut() {
            hasher.update(&buffer[..read]);

            if self.remaining == 0 {
                let actual = hasher.clone().finalize();
                if actual != *expected {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("crc32 mismatch: expected {expected:08x}, got {actual:08x}"),
                    ));
                }
            }
        }

        Ok(read)
    }
}

fn read_up_to(reader: &mut dyn Read, buffer: &mut [u8]) -> io::Result<usize> {
    let mut total = 0;

    while total < buffer.len() {
        match reader.read(&mut buffer[total..]) {
            Ok(0) => break,
            Ok(read) => total += read,
            Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
            Err(error) => return Err(error),
        }
    }

    Ok(total)
}
