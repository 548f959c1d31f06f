//! Per-file compression jobs.
//!
//! A job pulls its file from a read lane one pool buffer at a time, keeping
//! the next read in flight while it deflates the current buffer. Output
//! accumulates in pool buffers until it grows past the spill limit; from
//! then on it goes to a private temp file and only the buffer being filled
//! stays resident.

use std::fs::File;
use std::io::{self, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crossbeam_channel::Sender;
use flate2::{Compress, Compression, FlushCompress, Status};
use tempfile::NamedTempFile;

use super::entry_input::EntrySource;
use super::lanes::{ReadRequest, Stream};
use crate::format::CompressionMethod;
use crate::pool::{BufferPool, Demand, PooledBuffer};
use crate::{Error, Result, Timestamp};

/// Compression parameters shared by every job of one writer.
#[derive(Debug, Clone)]
pub(crate) struct CompressSettings {
    pub method: CompressionMethod,
    pub level: u32,
    pub spill_limit: u64,
    pub temp_dir: Option<PathBuf>,
}

/// One submitted file on its way through the pipeline.
pub(crate) struct CompressJob {
    pub index: usize,
    pub name: String,
    pub source: Box<dyn EntrySource>,
    pub modified: Option<Timestamp>,
    pub lane: Sender<ReadRequest>,
    pub pool: Arc<BufferPool>,
    pub settings: Arc<CompressSettings>,
    pub cancel: Arc<AtomicBool>,
}

/// Compressed bytes of one file.
///
/// The logical payload is the spill file's contents followed by `tail`.
pub(crate) struct CompressedPayload {
    pub spill: Option<NamedTempFile>,
    pub spilled_len: u64,
    pub tail: Vec<PooledBuffer>,
}

impl CompressedPayload {
    pub(crate) fn tail_len(&self) -> u64 {
        self.tail.iter().map(|b| b.len() as u64).sum()
    }

    pub(crate) fn len(&self) -> u64 {
        self.spilled_len + self.tail_len()
    }

    /// The spill file rewound to its start, if the payload spilled.
    pub(crate) fn rewound_spill(&mut self) -> io::Result<Option<&mut File>> {
        match &mut self.spill {
            Some(spill) => {
                let file = spill.as_file_mut();
                file.seek(SeekFrom::Start(0))?;
                Ok(Some(file))
            }
            None => Ok(None),
        }
    }
}

/// A file ready for the writer.
pub(crate) struct CompressedEntry {
    pub index: usize,
    pub name: String,
    pub method: CompressionMethod,
    pub modified: Option<Timestamp>,
    pub crc32: u32,
    pub uncompressed_size: u64,
    pub payload: CompressedPayload,
}

impl CompressJob {
    /// Reads, checksums and compresses the whole file.
    pub(crate) fn run(self) -> Result<CompressedEntry> {
        let CompressJob {
            index,
            name,
            source,
            modified,
            lane,
            pool,
            settings,
            cancel,
        } = self;

        let (reply, replies) = crossbeam_channel::bounded(1);
        let request = |stream| {
            lane.send(ReadRequest {
                stream,
                reply: reply.clone(),
            })
            .map_err(|_| Error::PipelineFailure("read lane stopped".into()))
        };
        request(Stream::Unopened(source))?;

        let mut output = Output::new(&pool, &settings, &name);
        let mut encoder = match settings.method {
            CompressionMethod::Stored => None,
            _ => Some(Compress::new(Compression::new(settings.level), false)),
        };
        let mut hasher = crc32fast::Hasher::new();
        let mut uncompressed_size = 0u64;

        loop {
            if cancel.load(Ordering::Relaxed) {
                return Err(Error::Cancelled);
            }
            let outcome = replies
                .recv()
                .map_err(|_| Error::PipelineFailure("read lane stopped".into()))?;
            let Some(chunk) = outcome.chunk? else {
                break;
            };
            if let Some(stream) = outcome.stream {
                request(Stream::Open(stream))?;
            }

            hasher.update(&chunk);
            uncompressed_size += chunk.len() as u64;
            match &mut encoder {
                Some(compress) => deflate(compress, &mut output, &chunk, FlushCompress::None)?,
                None => output.store(&chunk)?,
            }
        }
        if let Some(compress) = &mut encoder {
            deflate(compress, &mut output, &[], FlushCompress::Finish)?;
        }

        let payload = output.finish();
        log::trace!(
            "{name}: {uncompressed_size} -> {} bytes{}",
            payload.len(),
            if payload.spill.is_some() { " (spilled)" } else { "" }
        );
        Ok(CompressedEntry {
            index,
            name,
            method: settings.method,
            modified,
            crc32: hasher.finalize(),
            uncompressed_size,
            payload,
        })
    }
}

fn deflate(
    compress: &mut Compress,
    output: &mut Output<'_>,
    mut input: &[u8],
    flush: FlushCompress,
) -> Result<()> {
    loop {
        if input.is_empty() && flush == FlushCompress::None {
            return Ok(());
        }
        let buffer = output.current()?;
        let before = compress.total_in();
        let status = compress
            .compress_vec(input, &mut **buffer, flush)
            .map_err(|e| Error::Io(io::Error::other(e)))?;
        input = &input[(compress.total_in() - before) as usize..];
        if flush == FlushCompress::Finish && status == Status::StreamEnd {
            return Ok(());
        }
    }
}

struct Output<'a> {
    pool: &'a Arc<BufferPool>,
    settings: &'a CompressSettings,
    name: &'a str,
    buffers: Vec<PooledBuffer>,
    spill: Option<NamedTempFile>,
    spilled_len: u64,
}

impl<'a> Output<'a> {
    fn new(pool: &'a Arc<BufferPool>, settings: &'a CompressSettings, name: &'a str) -> Self {
        Self {
            pool,
            settings,
            name,
            buffers: Vec::new(),
            spill: None,
            spilled_len: 0,
        }
    }

    fn resident_len(&self) -> u64 {
        self.buffers.iter().map(|b| b.len() as u64).sum()
    }

    /// The buffer to write into next; never full.
    fn current(&mut self) -> Result<&mut PooledBuffer> {
        let has_room = self.buffers.last().is_some_and(|b| !b.is_full());
        if !has_room {
            if self.spill.is_some() || self.resident_len() >= self.settings.spill_limit {
                self.spill_resident()?;
            } else {
                match self.pool.try_acquire(Demand::Compressor) {
                    Some(buffer) => self.buffers.push(buffer),
                    // Pool exhausted: free what we hold rather than wait on others
                    None if !self.buffers.is_empty() => self.spill_resident()?,
                    None => {
                        let buffer = self.pool.acquire(Demand::Compressor)?;
                        self.buffers.push(buffer);
                    }
                }
            }
        }
        self.buffers
            .last_mut()
            .ok_or_else(|| Error::PipelineFailure("no output buffer".into()))
    }

    fn store(&mut self, mut input: &[u8]) -> Result<()> {
        while !input.is_empty() {
            let buffer = self.current()?;
            let n = buffer.remaining_capacity().min(input.len());
            buffer.extend_from_slice(&input[..n]);
            input = &input[n..];
        }
        Ok(())
    }

    /// Moves every resident byte to the spill file, keeping one empty buffer.
    fn spill_resident(&mut self) -> Result<()> {
        let mut file = match self.spill.take() {
            Some(file) => file,
            None => {
                let mut builder = tempfile::Builder::new();
                builder.prefix("zipkit-spill-");
                let file = match &self.settings.temp_dir {
                    Some(dir) => builder.tempfile_in(dir)?,
                    None => builder.tempfile()?,
                };
                log::debug!("spilling {} to {}", self.name, file.path().display());
                file
            }
        };

        let mut keep = None;
        for buffer in self.buffers.drain(..) {
            file.as_file_mut().write_all(&buffer)?;
            self.spilled_len += buffer.len() as u64;
            keep = Some(buffer);
        }
        self.spill = Some(file);

        let mut buffer = match keep {
            Some(buffer) => buffer,
            None => self.pool.acquire(Demand::Compressor)?,
        };
        buffer.clear();
        self.buffers.push(buffer);
        Ok(())
    }

    fn finish(self) -> CompressedPayload {
        CompressedPayload {
            spill: self.spill,
            spilled_len: self.spilled_len,
            tail: self.buffers.into_iter().filter(|b| !b.is_empty()).collect(),
        }
    }
}
