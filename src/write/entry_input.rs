//! Entry inputs.
//!
//! An [`EntrySource`] is a named byte source the writer opens lazily on one
//! of its read lanes. Sources on the same backing store share a lane, so a
//! disk is never asked for two files at once by the writer.

use std::fs::{self, File};
use std::io::{self, Cursor, Read};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::Timestamp;

/// Identifies the backing store of a source.
///
/// Sources with equal ids are read one at a time on the same lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreId {
    /// Bytes already in memory.
    Memory,
    /// A file system device.
    Device(u64),
}

/// A byte source to be archived.
pub trait EntrySource: Send {
    /// Opens the source for reading. Called once, on a read lane.
    fn open(self: Box<Self>) -> io::Result<Box<dyn Read + Send>>;

    /// Size in bytes, if known up front.
    fn size(&self) -> Option<u64>;

    /// Backing store the source lives on.
    fn store_id(&self) -> StoreId;

    /// Modification time recorded in the archive. Defaults to now.
    fn modified(&self) -> Option<Timestamp> {
        None
    }
}

/// A file on disk, opened when its lane gets to it.
///
/// # Example
///
/// ```rust,no_run
/// use zipkit::{FileSource, EntrySource};
///
/// let source = FileSource::new("Cargo.toml");
/// println!("{:?} bytes", source.size());
/// ```
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
    metadata: Option<fs::Metadata>,
}

impl FileSource {
    /// Creates a source for `path`.
    ///
    /// A missing or unreadable file is not an error here; it fails later
    /// as a per-file error.
    pub fn new(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let metadata = fs::metadata(&path).ok();
        Self { path, metadata }
    }

    /// Path on disk.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl EntrySource for FileSource {
    fn open(self: Box<Self>) -> io::Result<Box<dyn Read + Send>> {
        let file = File::open(&self.path)?;
        if file.metadata()?.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is a directory", self.path.display()),
            ));
        }
        Ok(Box::new(file))
    }

    fn size(&self) -> Option<u64> {
        self.metadata.as_ref().map(|m| m.len())
    }

    fn store_id(&self) -> StoreId {
        match &self.metadata {
            Some(metadata) => StoreId::Device(device_id(metadata)),
            None => StoreId::Device(0),
        }
    }

    fn modified(&self) -> Option<Timestamp> {
        self.metadata
            .as_ref()
            .and_then(|m| m.modified().ok())
            .and_then(Timestamp::from_system_time)
    }
}

#[cfg(unix)]
fn device_id(metadata: &fs::Metadata) -> u64 {
    use std::os::unix::fs::MetadataExt;
    metadata.dev()
}

#[cfg(not(unix))]
fn device_id(_metadata: &fs::Metadata) -> u64 {
    0
}

/// An in-memory buffer.
#[derive(Debug, Clone)]
pub struct BytesSource {
    data: Vec<u8>,
    modified: Option<Timestamp>,
}

impl BytesSource {
    /// Creates a source over `data`.
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            modified: None,
        }
    }

    /// Sets the modification time recorded for this entry.
    pub fn with_modified(mut self, modified: Timestamp) -> Self {
        self.modified = Some(modified);
        self
    }
}

impl EntrySource for BytesSource {
    fn open(self: Box<Self>) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(Cursor::new(self.data)))
    }

    fn size(&self) -> Option<u64> {
        Some(self.data.len() as u64)
    }

    fn store_id(&self) -> StoreId {
        StoreId::Memory
    }

    fn modified(&self) -> Option<Timestamp> {
        self.modified
    }
}

pub(crate) fn now() -> Option<Timestamp> {
    Timestamp::from_system_time(SystemTime::now())
}
