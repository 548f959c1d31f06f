//! Write options and results for archive creation.

use std::path::PathBuf;

use crate::Error;
use crate::format::CompressionMethod;
use crate::pool::{PoolStats, minimum_budget};

/// Default compressed size at which a file's output moves to a temp file.
pub const DEFAULT_SPILL_THRESHOLD: u64 = 4 * 1024 * 1024;

fn available_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Options for creating archives.
///
/// # Example
///
/// ```rust
/// use zipkit::WriteOptions;
///
/// let options = WriteOptions::new()
///     .threads(2)
///     .memory_budget(64 * 1024 * 1024)
///     .level(9)?
///     .comment("nightly build");
/// assert_eq!(options.effective_budget(), 64 * 1024 * 1024);
/// # Ok::<(), zipkit::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct WriteOptions {
    /// Memory the buffer pool may use. `None` picks the minimum for the
    /// configured thread count.
    pub memory_budget: Option<u64>,
    /// Number of compressor threads.
    pub threads: usize,
    /// Compression method; only stored and deflated can be written.
    pub method: CompressionMethod,
    /// Deflate level (0-9).
    pub level: u32,
    /// Compressed size at which a file's output moves to a temp file.
    pub spill_threshold: u64,
    /// Directory for spill files. `None` uses the system temp directory.
    pub temp_dir: Option<PathBuf>,
    /// Set bit 3 and write a data descriptor after every payload.
    pub data_descriptors: bool,
    /// Write an extended-timestamp extra field carrying the mtime.
    pub extended_timestamps: bool,
    /// Archive comment.
    pub comment: Vec<u8>,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            memory_budget: None,
            threads: available_threads(),
            method: CompressionMethod::Deflated,
            level: 6,
            spill_threshold: DEFAULT_SPILL_THRESHOLD,
            temp_dir: None,
            data_descriptors: false,
            extended_timestamps: true,
            comment: Vec::new(),
        }
    }
}

impl WriteOptions {
    /// Creates new write options with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// A single thread and the smallest budget it accepts.
    pub fn low_memory() -> Self {
        Self {
            memory_budget: Some(minimum_budget(1)),
            threads: 1,
            spill_threshold: 1024 * 1024,
            ..Self::default()
        }
    }

    /// Every core, a generous budget and a fast deflate level.
    pub fn high_throughput() -> Self {
        let threads = available_threads();
        Self {
            memory_budget: Some(minimum_budget(threads).max(512 * 1024 * 1024)),
            threads,
            level: 3,
            spill_threshold: 16 * 1024 * 1024,
            ..Self::default()
        }
    }

    /// Sets the memory budget in bytes.
    pub fn memory_budget(mut self, budget: u64) -> Self {
        self.memory_budget = Some(budget);
        self
    }

    /// Sets the number of compressor threads (at least one).
    pub fn threads(mut self, threads: usize) -> Self {
        self.threads = threads.max(1);
        self
    }

    /// Sets the compression method.
    pub fn method(mut self, method: CompressionMethod) -> Self {
        self.method = method;
        self
    }

    /// Sets the deflate level.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidCompressionLevel`] if level is greater than 9.
    pub fn level(mut self, level: u32) -> crate::Result<Self> {
        if level > 9 {
            return Err(Error::InvalidCompressionLevel { level });
        }
        self.level = level;
        Ok(self)
    }

    /// Sets the spill threshold in bytes.
    pub fn spill_threshold(mut self, bytes: u64) -> Self {
        self.spill_threshold = bytes;
        self
    }

    /// Sets the directory for spill files.
    pub fn temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = Some(dir.into());
        self
    }

    /// Sets whether payloads are followed by data descriptors.
    pub fn data_descriptors(mut self, enabled: bool) -> Self {
        self.data_descriptors = enabled;
        self
    }

    /// Sets whether an extended-timestamp extra field is written.
    pub fn extended_timestamps(mut self, enabled: bool) -> Self {
        self.extended_timestamps = enabled;
        self
    }

    /// Sets the archive comment.
    pub fn comment(mut self, comment: impl Into<Vec<u8>>) -> Self {
        self.comment = comment.into();
        self
    }

    /// The budget the buffer pool is sized for.
    pub fn effective_budget(&self) -> u64 {
        self.memory_budget
            .unwrap_or_else(|| minimum_budget(self.threads))
    }

    pub(crate) fn validate(&self) -> crate::Result<()> {
        if self.level > 9 {
            return Err(Error::InvalidCompressionLevel { level: self.level });
        }
        if let CompressionMethod::Unsupported(method) = self.method {
            return Err(Error::UnsupportedMethod {
                method,
                name: String::new(),
            });
        }
        if self.comment.len() > usize::from(u16::MAX) {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "archive comment longer than 65535 bytes",
            )));
        }
        Ok(())
    }
}

/// A submitted file that could not be archived.
#[derive(Debug)]
pub struct FailedEntry {
    /// Position in submission order.
    pub index: usize,
    /// Path the file would have had in the archive.
    pub name: String,
    /// Why it failed.
    pub error: Error,
}

/// Result of a write operation.
#[derive(Debug, Default)]
pub struct WriteResult {
    /// Number of entries in the central directory.
    pub entries_written: usize,
    /// Files that were skipped, in submission order.
    pub failures: Vec<FailedEntry>,
    /// Number of entries whose output went through a temp file.
    pub spilled_entries: usize,
    /// Total uncompressed bytes.
    pub total_size: u64,
    /// Total compressed bytes.
    pub compressed_size: u64,
    /// Buffer pool counters at the end of the run.
    pub pool: PoolStats,
}

impl WriteResult {
    /// Returns `true` if every submitted file was archived.
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Returns the compression ratio (compressed / uncompressed).
    pub fn compression_ratio(&self) -> f64 {
        if self.total_size == 0 {
            1.0
        } else {
            self.compressed_size as f64 / self.total_size as f64
        }
    }

    /// Returns the space savings percentage.
    pub fn space_savings(&self) -> f64 {
        if self.total_size == 0 {
            0.0
        } else {
            1.0 - self.compression_ratio()
        }
    }
}
