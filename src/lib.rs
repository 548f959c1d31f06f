//! # zipkit
//!
//! A ZIP archive engine in pure Rust: tolerant reading and memory-bounded
//! parallel writing.
//!
//! Reading locates the central directory at the end of the archive and, if
//! it is missing or damaged, rebuilds the entry list by scanning local
//! headers from the front. Writing compresses many files at once on a
//! worker pool while a fixed memory budget bounds everything in flight.
//!
//! ## Quick Start
//!
//! ### Reading an Archive
//!
//! ```rust,no_run
//! use std::io::Read;
//! use zipkit::{Archive, Priority, Result};
//!
//! fn main() -> Result<()> {
//!     let archive = Archive::open_path("archive.zip")?;
//!     println!("opened via {:?}", archive.strategy());
//!
//!     for entry in archive.entries() {
//!         let mut data = Vec::new();
//!         archive.decompress(entry, Priority::Normal)?.read_to_end(&mut data)?;
//!         println!("{}: {} bytes", entry.name, data.len());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ### Creating an Archive
//!
//! ```rust,no_run
//! use zipkit::{BytesSource, FileSource, Result, WriteOptions, ZipWriter};
//!
//! fn main() -> Result<()> {
//!     let options = WriteOptions::new().memory_budget(256 * 1024 * 1024);
//!     let mut writer = ZipWriter::create_path("new.zip", options)?;
//!
//!     writer.submit(FileSource::new("report.pdf"), "docs/report.pdf")?;
//!     writer.submit(BytesSource::new(b"Hello, World!".to_vec()), "hello.txt")?;
//!
//!     let result = writer.finish()?;
//!     println!(
//!         "Wrote {} entries ({:.1}% compression), {} failed",
//!         result.entries_written,
//!         result.space_savings() * 100.0,
//!         result.failures.len()
//!     );
//!     Ok(())
//! }
//! ```
//!
//! ## Error Handling
//!
//! All fallible operations return [`Result`]. Per-entry problems, such as
//! an unsupported compression method, only affect that entry:
//!
//! ```rust,no_run
//! use zipkit::{Archive, Error, Priority};
//!
//! let archive = Archive::open_path("mixed.zip")?;
//! for entry in archive.entries() {
//!     match archive.decompress(entry, Priority::Low) {
//!         Ok(_reader) => {}
//!         Err(e) if e.is_unsupported() => eprintln!("skipping {}: {e}", entry.name),
//!         Err(e) => return Err(e),
//!     }
//! }
//! # Ok::<(), Error>(())
//! ```
//!
//! ## Logging
//!
//! The crate logs through the [`log`] facade: strategy fallbacks and
//! skipped files at `warn`, spills and skipped extra fields at `debug`.
//! No logger is installed.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod error;
pub mod format;
pub mod pool;
pub mod read;
pub mod recovery;
pub mod timestamp;
pub mod write;

pub use error::{Error, Result};
pub use format::CompressionMethod;
pub use timestamp::{DosDateTime, Timestamp};

// Re-export reading API at crate root for convenience
pub use read::{
    Archive, ByteProvider, Entry, EntryReader, FileProvider, OpenOptions, OpenStrategy, Priority,
};

// Re-export writing API at crate root for convenience
pub use write::{
    BytesSource, EntrySource, FailedEntry, FileSource, WriteOptions, WriteResult, ZipWriter,
};

pub use pool::{BufferPool, PoolStats};
