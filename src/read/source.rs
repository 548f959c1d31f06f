//! Byte sources behind an open archive.
//!
//! An archive reads entry payloads either through one shared seekable
//! handle or through a [`ByteProvider`] that opens a fresh stream per
//! request. [`SourceRange`] is the bounded view handed to a decompressor.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::{Error, Result};

/// A readable, seekable stream that can move between threads.
pub trait ReadSeek: Read + Seek + Send {}

impl<T: Read + Seek + Send> ReadSeek for T {}

/// Factory of independent streams over the same bytes.
///
/// Every call to [`open`](Self::open) returns a new stream positioned at
/// offset zero. Archives opened with a provider decompress entries through
/// separate streams, so concurrent readers never contend for one handle.
pub trait ByteProvider: Send + Sync {
    /// Opens a new stream at offset zero.
    fn open(&self) -> io::Result<Box<dyn ReadSeek>>;
}

/// Provider that reopens a file on disk for every request.
#[derive(Debug, Clone)]
pub struct FileProvider {
    path: PathBuf,
}

impl FileProvider {
    /// Creates a provider for `path`.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Path this provider opens.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ByteProvider for FileProvider {
    fn open(&self) -> io::Result<Box<dyn ReadSeek>> {
        Ok(Box::new(File::open(&self.path)?))
    }
}

type SharedHandle = Arc<Mutex<Box<dyn ReadSeek>>>;

/// Where an archive's payload bytes come from.
pub(crate) enum Source {
    /// One handle shared by every range.
    Shared(SharedHandle),
    /// A fresh stream per range.
    Provider(Arc<dyn ByteProvider>),
    /// The archive was scanned from a stream that cannot seek back.
    Unseekable,
}

impl Source {
    /// Runs `f` on a stream positioned at `offset`.
    ///
    /// A shared handle's position is restored afterwards.
    pub(crate) fn with_stream_at<T>(
        &self,
        offset: u64,
        name: &str,
        f: impl FnOnce(&mut dyn ReadSeek) -> Result<T>,
    ) -> Result<T> {
        match self {
            Source::Shared(handle) => {
                let mut guard = handle.lock();
                let saved = guard.stream_position()?;
                guard.seek(SeekFrom::Start(offset))?;
                let result = f(&mut **guard);
                guard.seek(SeekFrom::Start(saved))?;
                result
            }
            Source::Provider(provider) => {
                let mut stream = provider.open()?;
                stream.seek(SeekFrom::Start(offset))?;
                f(&mut *stream)
            }
            Source::Unseekable => Err(Error::SeekRequired {
                name: name.to_owned(),
            }),
        }
    }

    /// Opens the byte range `[start, start + len)`.
    pub(crate) fn range(&self, start: u64, len: u64, name: &str) -> Result<SourceRange> {
        let inner = match self {
            Source::Shared(handle) => RangeInner::Shared(Some(Arc::clone(handle))),
            Source::Provider(provider) => {
                let mut stream = provider.open()?;
                stream.seek(SeekFrom::Start(start))?;
                RangeInner::Owned(stream)
            }
            Source::Unseekable => {
                return Err(Error::SeekRequired {
                    name: name.to_owned(),
                });
            }
        };
        Ok(SourceRange {
            inner,
            position: start,
            end: start.saturating_add(len),
        })
    }
}

enum RangeInner {
    Shared(Option<SharedHandle>),
    Owned(Box<dyn ReadSeek>),
}

/// A bounded window onto an archive's bytes.
///
/// Ranges over a shared handle save and restore the handle position around
/// every read, so several ranges may be read in turn; reads serialize on
/// the handle's lock. The handle is released once the range is exhausted.
pub struct SourceRange {
    inner: RangeInner,
    position: u64,
    end: u64,
}

impl SourceRange {
    /// Bytes left in the range.
    pub fn remaining(&self) -> u64 {
        self.end - self.position
    }
}

impl Read for SourceRange {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.remaining();
        if remaining == 0 || buf.is_empty() {
            if remaining == 0 {
                if let RangeInner::Shared(handle) = &mut self.inner {
                    handle.take();
                }
            }
            return Ok(0);
        }
        let want = usize::try_from(remaining).unwrap_or(usize::MAX).min(buf.len());

        let n = match &mut self.inner {
            RangeInner::Shared(Some(handle)) => {
                let mut guard = handle.lock();
                let saved = guard.stream_position()?;
                guard.seek(SeekFrom::Start(self.position))?;
                let read = guard.read(&mut buf[..want]);
                guard.seek(SeekFrom::Start(saved))?;
                read?
            }
            RangeInner::Shared(None) => 0,
            RangeInner::Owned(stream) => stream.read(&mut buf[..want])?,
        };
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("source ended {remaining} bytes before the end of the entry"),
            ));
        }
        self.position += n as u64;
        Ok(n)
    }
}

impl std::fmt::Debug for SourceRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceRange")
            .field("position", &self.position)
            .field("end", &self.end)
            .finish_non_exhaustive()
    }
}
