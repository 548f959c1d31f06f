//! Archive reading.
//!
//! [`Archive`] opens a ZIP archive, lists its entries and hands out
//! decompressed streams. Opening first tries the central directory at the
//! end of the archive; when that is missing or damaged it falls back to
//! scanning local headers from the front, so truncated downloads and
//! archives with a broken trailer still list what they contain.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::io::Read;
//! use zipkit::{Archive, Priority};
//!
//! let archive = Archive::open_path("bundle.zip")?;
//! for entry in archive.entries() {
//!     let mut text = String::new();
//!     archive
//!         .decompress(entry, Priority::Normal)?
//!         .read_to_string(&mut text)?;
//!     println!("{}: {} bytes", entry.name, text.len());
//! }
//! # Ok::<(), zipkit::Error>(())
//! ```

mod central_directory;
mod decompression;
mod entry;
mod options;
mod source;

pub use decompression::{EntryReader, Priority};
pub use entry::Entry;
pub use options::OpenOptions;
pub use source::{ByteProvider, FileProvider, ReadSeek, SourceRange};

use std::collections::{BTreeMap, HashMap};
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::map_io_error;
use crate::format::reader::read_u32_le;
use crate::format::records::LocalFileHeader;
use crate::format::{CompressionMethod, LOCAL_FILE_HEADER_SIGNATURE, decode_text};
use crate::recovery::{ForwardScanner, ScanEvent};
use crate::{Error, Result};
use source::Source;

/// How an archive's entry list was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenStrategy {
    /// Parsed from the central directory.
    CentralDirectory,
    /// Rebuilt by scanning local headers from the start of the source.
    ForwardScan,
}

struct Layout {
    central: Vec<Entry>,
    scanned: Vec<Entry>,
    comment: String,
    zip64: bool,
    strategy: OpenStrategy,
}

/// A ZIP archive opened for reading.
pub struct Archive {
    source: Source,
    layout: Layout,
    options: OpenOptions,
}

impl Archive {
    /// Opens an archive over a seekable reader with default options.
    ///
    /// All decompression streams share this one handle.
    pub fn open<R: Read + Seek + Send + 'static>(reader: R) -> Result<Self> {
        Self::open_with_options(reader, OpenOptions::default())
    }

    /// Opens an archive over a seekable reader.
    pub fn open_with_options<R: Read + Seek + Send + 'static>(
        reader: R,
        options: OpenOptions,
    ) -> Result<Self> {
        let mut stream: Box<dyn ReadSeek> = Box::new(reader);
        let layout = read_layout(&mut *stream, &options)?;
        Ok(Self {
            source: Source::Shared(Arc::new(Mutex::new(stream))),
            layout,
            options,
        })
    }

    /// Opens an archive file. Each decompression reopens the file, so
    /// entries can be read concurrently.
    pub fn open_path(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_provider(FileProvider::new(path), OpenOptions::default())
    }

    /// Opens an archive through a provider of fresh streams.
    pub fn open_with_provider(
        provider: impl ByteProvider + 'static,
        options: OpenOptions,
    ) -> Result<Self> {
        let mut stream = provider.open()?;
        let layout = read_layout(&mut *stream, &options)?;
        Ok(Self {
            source: Source::Provider(Arc::new(provider)),
            layout,
            options,
        })
    }

    /// Lists an archive from a stream that cannot seek.
    ///
    /// Entries are found by a forward scan. [`decompress`](Self::decompress)
    /// fails with [`Error::SeekRequired`]; use
    /// [`ForwardScanner`] to read content during the scan instead.
    pub fn open_unseekable<R: Read>(reader: R) -> Result<Self> {
        let options = OpenOptions::default().force_forward_scan(true);
        let layout = scan_layout(reader, None)?;
        Ok(Self {
            source: Source::Unseekable,
            layout,
            options,
        })
    }

    /// Entries in archive order.
    ///
    /// Central directory entries when the central directory was read and is
    /// non-empty, otherwise scanned entries ordered by offset.
    pub fn entries(&self) -> &[Entry] {
        if self.layout.central.is_empty() {
            &self.layout.scanned
        } else {
            &self.layout.central
        }
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    /// Returns true if the archive has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Finds an entry by name.
    pub fn entry(&self, name: &str) -> Option<&Entry> {
        self.entries().iter().find(|e| e.name == name)
    }

    /// How the entry list was obtained.
    pub fn strategy(&self) -> OpenStrategy {
        self.layout.strategy
    }

    /// Archive comment from the end of central directory record.
    pub fn comment(&self) -> &str {
        &self.layout.comment
    }

    /// Returns true if the archive uses a Zip64 end of central directory.
    pub fn is_zip64(&self) -> bool {
        self.layout.zip64
    }

    /// Options the archive was opened with.
    pub fn options(&self) -> &OpenOptions {
        &self.options
    }

    /// Opens a decompressed stream for `entry`.
    ///
    /// The entry's local header is read on first use and cached, since its
    /// length may differ from the central directory copy.
    ///
    /// # Errors
    ///
    /// - [`Error::EncryptedEntry`] for encrypted entries
    /// - [`Error::UnsupportedMethod`] for methods other than store and deflate
    /// - [`Error::StreamedEntry`] for scanned entries whose data descriptor
    ///   was never found
    /// - [`Error::SeekRequired`] for archives opened with
    ///   [`open_unseekable`](Self::open_unseekable)
    /// - [`Error::CorruptRecord`] if no local header exists at the entry's offset
    pub fn decompress(&self, entry: &Entry, priority: Priority) -> Result<EntryReader<SourceRange>> {
        if entry.is_encrypted() {
            return Err(Error::EncryptedEntry {
                name: entry.name.clone(),
            });
        }
        if let CompressionMethod::Unsupported(method) = entry.method {
            return Err(Error::UnsupportedMethod {
                method,
                name: entry.name.clone(),
            });
        }
        if !entry.sizes_known() {
            return Err(Error::StreamedEntry {
                name: entry.name.clone(),
            });
        }

        let header_len = self.local_header_len(entry)?;
        let range = self.source.range(
            entry.offset.saturating_add(header_len),
            entry.compressed_size,
            &entry.name,
        )?;
        EntryReader::new(range, entry, priority, self.options.verify_crc)
    }

    /// Decompresses the named entry into memory.
    pub fn read_to_vec(&self, name: &str) -> Result<Vec<u8>> {
        let entry = self.entry(name).ok_or_else(|| Error::EntryNotFound {
            name: name.to_owned(),
        })?;
        let mut reader = self.decompress(entry, Priority::Normal)?;
        let mut out = Vec::with_capacity(entry.uncompressed_size.min(1 << 24) as usize);
        reader.read_to_end(&mut out).map_err(map_io_error)?;
        Ok(out)
    }

    fn local_header_len(&self, entry: &Entry) -> Result<u64> {
        if let Some(&len) = entry.local_header_len.get() {
            return Ok(len);
        }
        let len = self
            .source
            .with_stream_at(entry.offset, &entry.name, |mut stream| {
                let signature = read_u32_le(&mut stream)?;
                if signature != LOCAL_FILE_HEADER_SIGNATURE {
                    return Err(Error::corrupt_record(
                        entry.offset,
                        format!("expected local file header for '{}'", entry.name),
                    ));
                }
                Ok(LocalFileHeader::parse(&mut stream)?.header_len())
            })?;
        Ok(*entry.local_header_len.get_or_init(|| len))
    }
}

impl std::fmt::Debug for Archive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Archive")
            .field("entries", &self.len())
            .field("strategy", &self.layout.strategy)
            .field("zip64", &self.layout.zip64)
            .finish_non_exhaustive()
    }
}

fn read_layout(mut stream: &mut dyn ReadSeek, options: &OpenOptions) -> Result<Layout> {
    if options.force_forward_scan {
        stream.seek(SeekFrom::Start(0))?;
        return scan_layout(stream, None);
    }

    match central_directory::locate(&mut stream, options.eocd_search_limit) {
        Ok(cd) => Ok(Layout {
            central: cd.entries,
            scanned: Vec::new(),
            comment: decode_text(&cd.eocd.comment, false),
            zip64: cd.zip64.is_some(),
            strategy: OpenStrategy::CentralDirectory,
        }),
        Err(e) if e.is_recoverable() => {
            log::warn!("central directory unusable ({e}), scanning local headers instead");
            stream.seek(SeekFrom::Start(0))?;
            scan_layout(stream, Some(e))
        }
        Err(e) => Err(e),
    }
}

/// Rebuilds the entry list by forward scan.
///
/// `fallback_from` is the central directory error that led here; it is
/// returned if the scan finds no ZIP records at all.
fn scan_layout<R: Read>(reader: R, fallback_from: Option<Error>) -> Result<Layout> {
    let mut scanner = ForwardScanner::new(reader);
    let mut locals = BTreeMap::new();
    let mut centrals = Vec::new();
    let mut comment = Vec::new();
    let mut zip64 = false;
    let mut records = 0usize;

    while let Some(event) = scanner.next_event()? {
        records += 1;
        match event {
            ScanEvent::LocalEntry(entry) => {
                locals.insert(entry.offset, entry);
            }
            ScanEvent::DataDescriptor {
                entry_offset,
                descriptor,
            } => {
                if let Some(entry) = locals.get_mut(&entry_offset) {
                    entry.apply_descriptor(&descriptor);
                }
            }
            ScanEvent::CentralEntry(entry) => centrals.push(entry),
            ScanEvent::EndOfCentralDirectory { record, .. } => comment = record.comment,
            ScanEvent::Zip64EndOfCentralDirectory { .. } => zip64 = true,
        }
    }

    if records == 0 {
        return Err(fallback_from
            .unwrap_or_else(|| Error::corrupt_record(0, "no ZIP records found")));
    }

    let mut scanned: Vec<Entry> = locals.into_values().collect();
    reconcile(&mut scanned, &centrals);
    log::debug!(
        "forward scan found {} entries in {records} records",
        scanned.len()
    );

    Ok(Layout {
        central: Vec::new(),
        scanned,
        comment: decode_text(&comment, false),
        zip64,
        strategy: OpenStrategy::ForwardScan,
    })
}

/// Copies central-directory-only information onto scanned local entries of
/// the same name.
fn reconcile(locals: &mut [Entry], centrals: &[Entry]) {
    if centrals.is_empty() {
        return;
    }
    let by_name: HashMap<&str, &Entry> = centrals.iter().map(|e| (e.name.as_str(), e)).collect();
    for entry in locals {
        let Some(central) = by_name.get(entry.name.as_str()) else {
            continue;
        };
        entry.comment.clone_from(&central.comment);
        entry.external_attributes = central.external_attributes;
        entry.last_access = entry.last_access.or(central.last_access);
        entry.creation = entry.creation.or(central.creation);
        if !entry.sizes_known {
            entry.crc32 = central.crc32;
            entry.compressed_size = central.compressed_size;
            entry.uncompressed_size = central.uncompressed_size;
            entry.sizes_known = true;
        }
    }
}
