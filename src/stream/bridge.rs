//! `std::io` views of a synchronous [`ByteStream`].
//!
//! Parsers and serializers that speak `Read`/`Write` (an XML reader, a
//! decompressor, `io::copy`) can consume any backend through these wrappers.
//!
//! # Example
//!
//! ```no_run
//! use bytestream::fs::FileByteStream;
//! use bytestream::stream::{OpenMode, StreamReader};
//! use std::io::Read;
//!
//! let mut file = FileByteStream::new();
//! file.open("/tmp/bytestream-demo.txt", OpenMode::IN)?;
//!
//! let mut text = String::new();
//! StreamReader::new(file).read_to_string(&mut text)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use crate::stream::ByteStream;

use std::io;

/// Pull-side adapter: `io::Read` over a [`ByteStream`].
///
/// End of stream, a closed stream, and a backend read failure all read as
/// `Ok(0)`.
pub struct StreamReader<S> {
    stream: S,
}

impl<S: ByteStream> StreamReader<S> {
    pub fn new(stream: S) -> Self {
        Self { stream }
    }

    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    pub fn get_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}

impl<S: ByteStream> io::Read for StreamReader<S> {
    fn read(&mut self, buffer: &mut [u8]) -> io::Result<usize> {
        Ok(self.stream.read_bytes(buffer))
    }
}

/// Push-side adapter: `io::Write` over a [`ByteStream`].
pub struct StreamWriter<S> {
    stream: S,
}

impl<S: ByteStream> StreamWriter<S> {
    pub fn new(stream: S) -> Self {
        Self { stream }
    }

    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    pub fn get_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}

impl<S: ByteStream> io::Write for StreamWriter<S> {
    fn write(&mut self, buffer: &[u8]) -> io::Result<usize> {
        if buffer.is_empty() {
            return Ok(0);
        }

        match self.stream.write_bytes(buffer) {
            0 => Err(io::Error::new(
                io::ErrorKind::WriteZero,
                "stream accepted zero bytes",
            )),
            written => Ok(written),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
