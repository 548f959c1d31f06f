//! Error types for ZIP archive operations.
//!
//! This module provides the [`Error`] enum which represents all possible
//! failure modes when reading or writing ZIP archives, along with a
//! convenient [`Result<T>`] type alias.
//!
//! # Error Handling
//!
//! All fallible operations in this crate return `Result<T, Error>`. You can
//! handle errors using pattern matching or the `?` operator:
//!
//! ```rust,no_run
//! use zipkit::{Archive, Error, Priority};
//!
//! fn dump(path: &str) -> zipkit::Result<()> {
//!     let archive = Archive::open_path(path)?;
//!     for entry in archive.entries() {
//!         match archive.decompress(entry, Priority::Normal) {
//!             Ok(mut reader) => {
//!                 std::io::copy(&mut reader, &mut std::io::sink())?;
//!             }
//!             // Per-entry problems leave the rest of the archive readable
//!             Err(e @ Error::UnsupportedMethod { .. }) | Err(e @ Error::EncryptedEntry { .. }) => {
//!                 eprintln!("skipping {}: {}", entry.name, e);
//!             }
//!             Err(e) => return Err(e),
//!         }
//!     }
//!     Ok(())
//! }
//! ```

use std::io;

/// The error type for ZIP archive operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// An I/O error occurred while reading or writing.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A record was truncated, carried a wrong signature or held impossible values.
    #[error("corrupt record at offset {offset:#x}: {reason}")]
    CorruptRecord {
        /// Byte offset of the record.
        offset: u64,
        /// Description of the problem.
        reason: String,
    },

    /// No end of central directory signature was found near the end of the source.
    #[error("end of central directory record not found in the last {searched} bytes")]
    EocdNotFound {
        /// Number of trailing bytes that were searched.
        searched: u64,
    },

    /// The end of central directory points outside the source.
    #[error("central directory offset {offset:#x} beyond end of file ({size} bytes)")]
    CentralDirectoryOutOfRange {
        /// Central directory offset from the end record.
        offset: u64,
        /// Total size of the source.
        size: u64,
    },

    /// The end record requires Zip64 values but no Zip64 locator precedes it.
    #[error("archive requires Zip64 but the Zip64 end of central directory locator was not found")]
    Zip64LocatorNotFound,

    /// The Zip64 locator names a record that is not a valid Zip64 end of central directory.
    #[error("invalid Zip64 end of central directory at offset {offset:#x}: {reason}")]
    Zip64RecordInvalid {
        /// Offset named by the Zip64 locator.
        offset: u64,
        /// Description of the problem.
        reason: String,
    },

    /// The entry uses a compression method other than store or deflate.
    #[error("unsupported compression method {method} for entry '{name}'")]
    UnsupportedMethod {
        /// Raw method number from the header.
        method: u16,
        /// Entry name.
        name: String,
    },

    /// The entry is encrypted; decryption is not supported.
    #[error("entry '{name}' is encrypted and cannot be decrypted")]
    EncryptedEntry {
        /// Entry name.
        name: String,
    },

    /// The entry was discovered on a source that cannot seek back to its data.
    ///
    /// Reopen the archive from a seekable source or a byte provider to read it.
    #[error("cannot uncompress '{name}' without seek capability")]
    SeekRequired {
        /// Entry name.
        name: String,
    },

    /// The entry's sizes live in a data descriptor that has not been reached yet.
    #[error("entry '{name}' stores its sizes in a trailing data descriptor that has not been read yet")]
    StreamedEntry {
        /// Entry name.
        name: String,
    },

    /// Decompressed data does not match the stored CRC-32.
    #[error("CRC mismatch for '{name}': expected {expected:#010x}, got {actual:#010x}")]
    CrcMismatch {
        /// Entry name.
        name: String,
        /// CRC-32 stored in the archive.
        expected: u32,
        /// CRC-32 of the decompressed data.
        actual: u32,
    },

    /// Decompressed data is shorter or longer than the stored size.
    #[error("size mismatch for '{name}': expected {expected} bytes, got {actual}")]
    SizeMismatch {
        /// Entry name.
        name: String,
        /// Uncompressed size stored in the archive.
        expected: u64,
        /// Number of bytes actually produced.
        actual: u64,
    },

    /// No entry with the requested name exists.
    #[error("entry not found: {name}")]
    EntryNotFound {
        /// The requested name.
        name: String,
    },

    /// The writer's memory budget cannot hold the minimum number of buffers.
    #[error("memory budget of {budget} bytes is below the minimum of {minimum} bytes")]
    InsufficientBudget {
        /// Requested budget.
        budget: u64,
        /// Minimum budget for the configured parallelism.
        minimum: u64,
    },

    /// An option was given a value outside its valid range.
    #[error("invalid compression level {level}: must be 0-9")]
    InvalidCompressionLevel {
        /// The rejected level.
        level: u32,
    },

    /// The operation was cancelled.
    #[error("operation cancelled")]
    Cancelled,

    /// The writer no longer accepts entries.
    #[error("writer is closed")]
    WriterClosed,

    /// A pipeline stage stopped unexpectedly.
    #[error("writer pipeline failed: {0}")]
    PipelineFailure(String),
}

impl Error {
    /// Returns `true` if a different read strategy may still succeed.
    ///
    /// The archive façade uses this to decide whether a failed central
    /// directory open falls back to a forward scan. Zip64 failures are
    /// terminal: falling back would silently change which entries are visible.
    ///
    /// # Example
    ///
    /// ```rust
    /// use zipkit::Error;
    ///
    /// assert!(Error::EocdNotFound { searched: 22 }.is_recoverable());
    /// assert!(!Error::Zip64LocatorNotFound.is_recoverable());
    /// ```
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Io(_)
                | Error::CorruptRecord { .. }
                | Error::EocdNotFound { .. }
                | Error::CentralDirectoryOutOfRange { .. }
        )
    }

    /// Returns `true` if this is a data corruption error.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Error::CorruptRecord { .. }
                | Error::CrcMismatch { .. }
                | Error::SizeMismatch { .. }
                | Error::Zip64RecordInvalid { .. }
        )
    }

    /// Returns `true` if this error is about a capability this crate lacks.
    ///
    /// These errors affect a single entry; the rest of the archive stays usable.
    pub fn is_unsupported(&self) -> bool {
        matches!(
            self,
            Error::UnsupportedMethod { .. } | Error::EncryptedEntry { .. }
        )
    }

    /// Returns the entry name associated with this error, if any.
    pub fn entry_name(&self) -> Option<&str> {
        match self {
            Error::UnsupportedMethod { name, .. }
            | Error::EncryptedEntry { name }
            | Error::SeekRequired { name }
            | Error::StreamedEntry { name }
            | Error::CrcMismatch { name, .. }
            | Error::SizeMismatch { name, .. }
            | Error::EntryNotFound { name } => Some(name.as_str()),
            _ => None,
        }
    }

    /// Returns the raw method number if this is an unsupported method error.
    pub fn method(&self) -> Option<u16> {
        match self {
            Error::UnsupportedMethod { method, .. } => Some(*method),
            _ => None,
        }
    }

    /// Creates a CorruptRecord error.
    pub fn corrupt_record(offset: u64, reason: impl Into<String>) -> Self {
        Error::CorruptRecord {
            offset,
            reason: reason.into(),
        }
    }
}

/// A specialized Result type for ZIP operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Recovers a crate error that crossed an `io::Read` boundary.
///
/// Readers report crate errors as `io::Error::other(Error::..)`; this
/// unwraps them so callers can match on the original variant.
pub(crate) fn map_io_error(e: io::Error) -> Error {
    if e.get_ref().is_some_and(|inner| inner.is::<Error>()) {
        if let Some(inner) = e.into_inner() {
            if let Ok(err) = inner.downcast::<Error>() {
                return *err;
            }
        }
        return Error::PipelineFailure("error payload lost while unwrapping".into());
    }
    Error::Io(e)
}
