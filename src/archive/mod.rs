//! Streams over entries of a zip archive.
//!
//! A [`ZipArchive`] is opened once and shared; each [`ZipEntryByteStream`]
//! reads one entry through its own file handle, so several entries of the
//! same archive can stream at the same time.
//!
//! # Example
//!
//! ```no_run
//! use bytestream::archive::{EntryFlags, ZipArchive, ZipEntryByteStream};
//! use bytestream::stream::StreamReader;
//! use std::io::Read;
//!
//! let archive = ZipArchive::open("book.epub")?;
//!
//! let mut entry = ZipEntryByteStream::new();
//! entry.open(&archive, "META-INF/container.xml", EntryFlags::NOCASE)?;
//!
//! let mut xml = String::new();
//! StreamReader::new(entry).read_to_string(&mut xml)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod entry;

pub use entry::{AsyncZipEntryByteStream, ZipEntryByteStream};

use crate::error::{Result, StreamError};

use parking_lot::Mutex;
use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::ops::{BitOr, BitOrAssign};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use zip::CompressionMethod;

/// Lookup and decoding flags for [`ZipEntryByteStream::open`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Debug)]
pub struct EntryFlags(u8);

impl EntryFlags {
    /// Match entry names ignoring ASCII case.
    pub const NOCASE: Self = Self(1 << 0);
    /// Match against the last path component of each entry name.
    pub const NODIR: Self = Self(1 << 1);
    /// Stream the stored bytes without decompressing them.
    pub const COMPRESSED: Self = Self(1 << 2);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for EntryFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for EntryFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// An opened zip archive.
///
/// Holds the parsed central directory. Entry streams reopen the file at
/// [`path`](Self::path) for their own reads.
pub struct ZipArchive {
    path: PathBuf,
    archive: Mutex<zip::ZipArchive<BufReader<File>>>,
}

/// Where an entry's bytes live and how they are encoded.
#[derive(Debug, Clone)]
pub(crate) struct EntryLocation {
    pub(crate) name: String,
    pub(crate) data_start: u64,
    pub(crate) compressed_size: u64,
    pub(crate) size: u64,
    pub(crate) crc32: u32,
    pub(crate) compression: CompressionMethod,
}

impl ZipArchive {
    /// Opens `path` and reads its central directory.
    pub fn open(path: impl AsRef<Path>) -> Result<Arc<Self>> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let archive = zip::ZipArchive::new(BufReader::new(file))?;

        tracing::debug!(path = %path.display(), entries = archive.len(), "zip archive opened");

        Ok(Arc::new(Self {
            path,
            archive: Mutex::new(archive),
        }))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of entries, directories included.
    pub fn len(&self) -> usize {
        self.archive.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Names of every entry in central-directory order.
    pub fn entry_names(&self) -> Vec<String> {
        self.archive
            .lock()
            .file_names()
            .map(str::to_owned)
            .collect()
    }

    /// Finds the first non-directory entry matching `name` under `flags`.
    pub(crate) fn locate(&self, name: &str, flags: EntryFlags) -> Result<EntryLocation> {
        let mut archive = self.archive.lock();

        for index in 0..archive.len() {
            let file = archive.by_index_raw(index)?;

            if file.is_dir() || !entry_matches(file.name(), name, flags) {
                continue;
            }

            if file.encrypted() {
                return Err(StreamError::UnsupportedCompression(format!(
                    "{} is encrypted",
                    file.name()
                )));
            }

            return Ok(EntryLocation {
                name: file.name().to_owned(),
                data_start: file.data_start(),
                compressed_size: file.compressed_size(),
                size: file.size(),
                crc32: file.crc32(),
                compression: file.compression(),
            });
        }

        Err(StreamError::EntryNotFound(name.to_owned()))
    }
}

impl fmt::Debug for ZipArchive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ZipArchive")
            .field("path", &self.path)
            .field("entries", &self.len())
            .finish()
    }
}

fn entry_matches(entry_name: &str, wanted: &str, flags: EntryFlags) -> bool {
    let candidate = if flags.contains(EntryFlags::NODIR) {
        entry_name.rsplit('/').next().unwrap_or(entry_name)
    } else {
        entry_name
    };

    if flags.contains(EntryFlags::NOCASE) {
        candidate.eq_ignore_ascii_case(wanted)
    } else {
        candidate == wanted
    }
}
