//! Archive writing.
//!
//! [`ZipWriter`] runs a three-stage pipeline. Read lanes (one thread per
//! backing store) fill pool buffers from the submitted sources. Compression
//! jobs on a rayon pool checksum and deflate those buffers, spilling large
//! outputs to temp files. A single writer thread appends finished files to
//! the sink in completion order and, once [`ZipWriter::finish`] is called
//! and every file is done, writes the central directory in submission order.
//!
//! All three stages draw from one [`BufferPool`], so the memory budget
//! bounds the whole pipeline: when compression falls behind, readers block.
//!
//! A file that fails to read or compress is left out of the archive and
//! reported in [`WriteResult::failures`]. A failing sink aborts everything.
//!
//! # Example
//!
//! ```rust
//! use std::io::Cursor;
//! use zipkit::{Archive, BytesSource, Priority, WriteOptions, ZipWriter};
//!
//! let mut writer = ZipWriter::start(Cursor::new(Vec::new()), WriteOptions::low_memory())?;
//! writer.submit(BytesSource::new(b"Hello, World!".to_vec()), "hello.txt")?;
//! writer.submit(BytesSource::new(vec![b'z'; 10_000]), "docs/zeros.txt")?;
//!
//! let (result, cursor) = writer.finish_into_inner()?;
//! assert_eq!(result.entries_written, 2);
//! assert!(result.is_success());
//!
//! let archive = Archive::open(cursor)?;
//! assert_eq!(archive.read_to_vec("hello.txt")?, b"Hello, World!");
//! # Ok::<(), zipkit::Error>(())
//! ```

mod entry_compression;
mod entry_input;
mod header_encode;
mod lanes;
pub(crate) mod options;

pub use entry_input::{BytesSource, EntrySource, FileSource, StoreId};
pub use options::{DEFAULT_SPILL_THRESHOLD, FailedEntry, WriteOptions, WriteResult};

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};

use crate::format::records::DataDescriptor;
use crate::pool::BufferPool;
use crate::{Error, Result};
use entry_compression::{CompressJob, CompressSettings, CompressedEntry, CompressedPayload};
use header_encode::{EntryRecord, HeaderStyle, write_trailer};
use lanes::Lanes;

/// Chunk size for copying spill files into the sink.
const COPY_CHUNK: usize = 64 * 1024;

/// What a compression job hands to the writer thread.
enum Completion {
    Done(CompressedEntry),
    Failed(FailedEntry),
}

/// A concurrent ZIP archive writer.
///
/// Files are compressed in parallel as they are submitted; call
/// [`finish`](Self::finish) once all files are in. A writer dropped
/// without finishing abandons the archive: queued files still drain in the
/// background, but no central directory is written. Use
/// [`cancel`](Self::cancel) to also stop the queued work.
pub struct ZipWriter<W: Write + Seek + Send + 'static> {
    pool: Arc<BufferPool>,
    compressors: rayon::ThreadPool,
    lanes: Lanes,
    settings: Arc<CompressSettings>,
    cancel: Arc<AtomicBool>,
    finishing: Arc<AtomicBool>,
    ready: Sender<Completion>,
    writer: JoinHandle<Result<(WriteResult, W)>>,
    submitted: usize,
}

impl ZipWriter<BufWriter<File>> {
    /// Creates an archive file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created or the options are
    /// invalid.
    pub fn create_path(path: impl AsRef<Path>, options: WriteOptions) -> Result<Self> {
        let file = File::create(path.as_ref())?;
        Self::start(BufWriter::new(file), options)
    }
}

impl<W: Write + Seek + Send + 'static> ZipWriter<W> {
    /// Starts a writer that appends an archive to `sink` at its current
    /// position.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InsufficientBudget`] if the memory budget is below
    /// the minimum for the thread count, or an error if the options are
    /// invalid or the pipeline threads cannot be spawned.
    pub fn start(sink: W, options: WriteOptions) -> Result<Self> {
        options.validate()?;
        let threads = options.threads.max(1);
        let pool = BufferPool::for_budget(options.effective_budget(), threads)?;
        let pool_bytes = pool.capacity() as u64 * pool.buffer_size() as u64;
        let spill_limit = options.spill_threshold.min(pool_bytes / (2 * threads as u64));

        let compressors = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("zipkit-deflate-{i}"))
            .panic_handler(|_| log::error!("compression job panicked"))
            .build()
            .map_err(|e| Error::PipelineFailure(e.to_string()))?;

        let cancel = Arc::new(AtomicBool::new(false));
        let finishing = Arc::new(AtomicBool::new(false));
        let (ready, completions) = crossbeam_channel::unbounded();
        let stage = WriterStage {
            sink,
            style: HeaderStyle {
                data_descriptors: options.data_descriptors,
                extended_timestamps: options.extended_timestamps,
            },
            comment: options.comment.clone(),
            pool: Arc::clone(&pool),
            cancel: Arc::clone(&cancel),
            finishing: Arc::clone(&finishing),
        };
        let writer = thread::Builder::new()
            .name("zipkit-write".into())
            .spawn(move || stage.run(&completions))?;

        log::debug!(
            "writer started: {threads} threads, {} x {} byte buffers, spill at {spill_limit} bytes",
            pool.capacity(),
            pool.buffer_size()
        );

        Ok(Self {
            lanes: Lanes::new(Arc::clone(&pool), Arc::clone(&cancel)),
            settings: Arc::new(CompressSettings {
                method: options.method,
                level: options.level,
                spill_limit,
                temp_dir: options.temp_dir,
            }),
            pool,
            compressors,
            cancel,
            finishing,
            ready,
            writer,
            submitted: 0,
        })
    }

    /// Queues `source` to be stored as `path`.
    ///
    /// Returns as soon as the file is queued. Failures reading or
    /// compressing it are reported in the final [`WriteResult`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] after [`cancel`](Self::cancel),
    /// [`Error::WriterClosed`] if the output already failed, or an I/O error
    /// for a path longer than 65535 bytes.
    pub fn submit(&mut self, source: impl EntrySource + 'static, path: impl Into<String>) -> Result<()> {
        self.submit_boxed(Box::new(source), path.into())
    }

    /// Queues a file from disk, stored under `path`.
    pub fn submit_file(&mut self, disk_path: impl AsRef<Path>, path: impl Into<String>) -> Result<()> {
        self.submit(FileSource::new(disk_path), path)
    }

    /// Queues a boxed source.
    pub fn submit_boxed(&mut self, source: Box<dyn EntrySource>, name: String) -> Result<()> {
        if self.cancel.load(Ordering::Relaxed) {
            return Err(Error::Cancelled);
        }
        if self.writer.is_finished() {
            return Err(Error::WriterClosed);
        }
        if name.len() > usize::from(u16::MAX) {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                "entry name longer than 65535 bytes",
            )));
        }

        let index = self.submitted;
        self.submitted += 1;
        let lane = self.lanes.sender(source.store_id())?;
        let modified = source.modified().or_else(entry_input::now);
        let job = CompressJob {
            index,
            name: name.clone(),
            source,
            modified,
            lane,
            pool: Arc::clone(&self.pool),
            settings: Arc::clone(&self.settings),
            cancel: Arc::clone(&self.cancel),
        };
        let ready = self.ready.clone();
        self.compressors.spawn(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| job.run()))
                .unwrap_or_else(|_| Err(Error::PipelineFailure("compression job panicked".into())));
            let completion = match outcome {
                Ok(entry) => Completion::Done(entry),
                Err(error) => Completion::Failed(FailedEntry { index, name, error }),
            };
            // The writer thread only stops listening after an output failure
            let _ = ready.send(completion);
        });
        Ok(())
    }

    /// Number of files submitted so far.
    pub fn submitted(&self) -> usize {
        self.submitted
    }

    /// Current buffer pool counters.
    pub fn pool_stats(&self) -> crate::pool::PoolStats {
        self.pool.stats()
    }

    /// Abandons the archive.
    ///
    /// Outstanding files fail with [`Error::Cancelled`], blocked pipeline
    /// stages wake up, and [`finish`](Self::finish) returns
    /// [`Error::Cancelled`] without writing a central directory.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
        self.pool.close();
        log::debug!("write cancelled after {} submissions", self.submitted);
    }

    /// Waits for every submitted file and writes the central directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the output failed or the writer was cancelled.
    /// Per-file failures are not errors; see [`WriteResult::failures`].
    pub fn finish(self) -> Result<WriteResult> {
        let (result, _sink) = self.finish_into_inner()?;
        Ok(result)
    }

    /// Like [`finish`](Self::finish), also returning the sink.
    pub fn finish_into_inner(self) -> Result<(WriteResult, W)> {
        let ZipWriter {
            pool,
            compressors,
            lanes,
            finishing,
            ready,
            writer,
            ..
        } = self;

        // The writer thread stops once this and every job's sender are gone
        finishing.store(true, Ordering::SeqCst);
        drop(ready);
        let outcome = writer
            .join()
            .map_err(|_| Error::PipelineFailure("writer thread panicked".into()))?;
        drop(compressors);
        lanes.join();

        let (mut result, sink) = outcome?;
        result.pool = pool.stats();
        Ok((result, sink))
    }
}

impl<W: Write + Seek + Send + 'static> std::fmt::Debug for ZipWriter<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZipWriter")
            .field("submitted", &self.submitted)
            .field("pool", &self.pool)
            .field("cancelled", &self.cancel.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Why writing one finished file failed.
enum WriteFailure {
    /// Only this file is affected.
    Entry(Error),
    /// The sink is unusable.
    Sink(Error),
}

fn sink_error(e: io::Error) -> WriteFailure {
    WriteFailure::Sink(Error::Io(e))
}

struct WriterStage<W> {
    sink: W,
    style: HeaderStyle,
    comment: Vec<u8>,
    pool: Arc<BufferPool>,
    cancel: Arc<AtomicBool>,
    /// Set by `finish`; without it a closed queue means the writer was dropped.
    finishing: Arc<AtomicBool>,
}

impl<W: Write + Seek> WriterStage<W> {
    fn run(mut self, completions: &Receiver<Completion>) -> Result<(WriteResult, W)> {
        match self.write_archive(completions) {
            Ok(result) => Ok((result, self.sink)),
            Err(e) => {
                if !matches!(e, Error::Cancelled) {
                    log::error!("archive output failed: {e}");
                }
                self.cancel.store(true, Ordering::SeqCst);
                self.pool.close();
                // Dropping what is still queued releases its buffers and temp files
                completions.iter().for_each(drop);
                Err(e)
            }
        }
    }

    fn write_archive(&mut self, completions: &Receiver<Completion>) -> Result<WriteResult> {
        let mut position = self.sink.stream_position()?;
        let mut records = BTreeMap::new();
        let mut result = WriteResult::default();

        for completion in completions.iter() {
            if self.cancel.load(Ordering::Relaxed) {
                continue;
            }
            let entry = match completion {
                Completion::Done(entry) => entry,
                Completion::Failed(failure) => {
                    log::warn!("skipping {}: {}", failure.name, failure.error);
                    result.failures.push(failure);
                    continue;
                }
            };

            let (index, name, spilled) = (entry.index, entry.name.clone(), entry.payload.spill.is_some());
            let uncompressed_size = entry.uncompressed_size;
            match self.write_entry(entry, position) {
                Ok((record, end)) => {
                    log::trace!("{} written at {:#x}", record.name, record.offset);
                    result.total_size += uncompressed_size;
                    result.compressed_size += record.compressed_size;
                    result.spilled_entries += usize::from(spilled);
                    records.insert(index, record);
                    position = end;
                }
                Err(WriteFailure::Entry(error)) => {
                    log::warn!("skipping {name}: {error}");
                    result.failures.push(FailedEntry { index, name, error });
                }
                Err(WriteFailure::Sink(error)) => return Err(error),
            }
        }

        if self.cancel.load(Ordering::Relaxed) {
            return Err(Error::Cancelled);
        }
        if !self.finishing.load(Ordering::SeqCst) {
            log::debug!(
                "writer dropped before finish, {} files left without a central directory",
                records.len()
            );
            return Err(Error::Cancelled);
        }

        let records: Vec<EntryRecord> = records.into_values().collect();
        write_trailer(&mut self.sink, &records, position, self.style, &self.comment)?;
        self.sink.flush()?;

        result.entries_written = records.len();
        result.failures.sort_by_key(|failure| failure.index);
        Ok(result)
    }

    /// Writes one file at `offset`. Returns its record and where it ends.
    ///
    /// On a per-file failure the sink is left positioned at `offset`.
    fn write_entry(
        &mut self,
        mut entry: CompressedEntry,
        offset: u64,
    ) -> std::result::Result<(EntryRecord, u64), WriteFailure> {
        let payload = &mut entry.payload;
        if let Some(spill) = &payload.spill {
            let on_disk = spill
                .as_file()
                .metadata()
                .map_err(|e| WriteFailure::Entry(e.into()))?
                .len();
            if on_disk != payload.spilled_len {
                return Err(WriteFailure::Entry(Error::SizeMismatch {
                    name: entry.name,
                    expected: payload.spilled_len,
                    actual: on_disk,
                }));
            }
        }

        let record = EntryRecord {
            name: entry.name,
            method: entry.method,
            modified: entry.modified,
            crc32: entry.crc32,
            compressed_size: payload.len(),
            uncompressed_size: entry.uncompressed_size,
            offset,
        };
        let header = record.local_header(self.style);
        header.write_to(&mut self.sink).map_err(sink_error)?;
        let data_start = offset + header.header_len();
        let mut end = data_start + record.compressed_size;

        if payload.spill.is_none() {
            for buffer in payload.tail.drain(..) {
                self.sink.write_all(&buffer).map_err(sink_error)?;
            }
        } else {
            // Tail first so its buffers go back to the pool before the copy
            self.sink
                .seek(SeekFrom::Start(data_start + payload.spilled_len))
                .map_err(sink_error)?;
            for buffer in payload.tail.drain(..) {
                self.sink.write_all(&buffer).map_err(sink_error)?;
            }
            self.sink
                .seek(SeekFrom::Start(data_start))
                .map_err(sink_error)?;
            match self.copy_spill(payload, &record.name) {
                Ok(()) => {}
                Err(WriteFailure::Entry(error)) => {
                    self.sink
                        .seek(SeekFrom::Start(offset))
                        .map_err(sink_error)?;
                    return Err(WriteFailure::Entry(error));
                }
                Err(fatal) => return Err(fatal),
            }
            self.sink.seek(SeekFrom::Start(end)).map_err(sink_error)?;
        }
        drop(entry.payload);

        if let Some((descriptor, zip64)) = record.descriptor(self.style) {
            descriptor
                .write_to(&mut self.sink, zip64)
                .map_err(sink_error)?;
            let body = if zip64 {
                DataDescriptor::LEN_64
            } else {
                DataDescriptor::LEN_32
            };
            end += 4 + body as u64;
        }
        Ok((record, end))
    }

    fn copy_spill(
        &mut self,
        payload: &mut CompressedPayload,
        name: &str,
    ) -> std::result::Result<(), WriteFailure> {
        let expected = payload.spilled_len;
        let Some(file) = payload
            .rewound_spill()
            .map_err(|e| WriteFailure::Entry(e.into()))?
        else {
            return Ok(());
        };

        let mut chunk = vec![0u8; COPY_CHUNK];
        let mut copied = 0u64;
        while copied < expected {
            let want = usize::try_from(expected - copied)
                .unwrap_or(usize::MAX)
                .min(COPY_CHUNK);
            let n = match file.read(&mut chunk[..want]) {
                Ok(0) => {
                    return Err(WriteFailure::Entry(Error::SizeMismatch {
                        name: name.to_owned(),
                        expected,
                        actual: copied,
                    }));
                }
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(WriteFailure::Entry(e.into())),
            };
            self.sink.write_all(&chunk[..n]).map_err(sink_error)?;
            copied += n as u64;
        }
        Ok(())
    }
}
