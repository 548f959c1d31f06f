//! Per-entry decompression streams.
//!
//! [`EntryReader`] wraps the bounded payload range of one entry with the
//! decoder for its method, caps output at the stored uncompressed size and
//! checks size and CRC-32 when the stream ends.

use std::io::{self, Read};

use flate2::read::DeflateDecoder;

use super::entry::Entry;
use crate::format::CompressionMethod;
use crate::{Error, Result};

/// Scheduling hint attached to a decompression request.
///
/// Priorities never change results or ordering guarantees; callers that
/// dispatch readers to their own worker pools may use them to order work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Priority {
    /// Background work.
    Low,
    /// Regular requests.
    #[default]
    Normal,
    /// Interactive requests.
    High,
}

enum Decoder<R: Read> {
    Stored(R),
    Deflated(DeflateDecoder<R>),
}

/// Decompressed byte stream of one entry.
pub struct EntryReader<R: Read> {
    decoder: Decoder<R>,
    name: String,
    expected_size: u64,
    expected_crc: u32,
    produced: u64,
    hasher: crc32fast::Hasher,
    verify_crc: bool,
    finished: bool,
    priority: Priority,
}

impl<R: Read> EntryReader<R> {
    /// Wraps `payload`, which must yield exactly the entry's compressed bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedMethod`] for methods other than store and
    /// deflate.
    pub(crate) fn new(
        payload: R,
        entry: &Entry,
        priority: Priority,
        verify_crc: bool,
    ) -> Result<Self> {
        let decoder = match entry.method {
            CompressionMethod::Stored => Decoder::Stored(payload),
            CompressionMethod::Deflated => Decoder::Deflated(DeflateDecoder::new(payload)),
            CompressionMethod::Unsupported(method) => {
                return Err(Error::UnsupportedMethod {
                    method,
                    name: entry.name.clone(),
                });
            }
        };
        Ok(Self {
            decoder,
            name: entry.name.clone(),
            expected_size: entry.uncompressed_size,
            expected_crc: entry.crc32,
            produced: 0,
            hasher: crc32fast::Hasher::new(),
            verify_crc,
            finished: false,
            priority,
        })
    }

    /// Scheduling hint this reader was opened with.
    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// Name of the entry being read.
    pub fn entry_name(&self) -> &str {
        &self.name
    }

    /// Number of decompressed bytes produced so far.
    pub fn bytes_read(&self) -> u64 {
        self.produced
    }

    fn finish(&mut self) -> io::Result<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        if self.produced != self.expected_size {
            return Err(io::Error::other(Error::SizeMismatch {
                name: self.name.clone(),
                expected: self.expected_size,
                actual: self.produced,
            }));
        }
        let actual = self.hasher.clone().finalize();
        if self.verify_crc && actual != self.expected_crc {
            return Err(io::Error::other(Error::CrcMismatch {
                name: self.name.clone(),
                expected: self.expected_crc,
                actual,
            }));
        }
        Ok(())
    }
}

impl<R: Read> Read for EntryReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let remaining = self.expected_size - self.produced;
        if remaining == 0 {
            self.finish()?;
            return Ok(0);
        }

        let want = usize::try_from(remaining).unwrap_or(usize::MAX).min(buf.len());
        let n = match &mut self.decoder {
            Decoder::Stored(r) => r.read(&mut buf[..want])?,
            Decoder::Deflated(d) => d.read(&mut buf[..want])?,
        };
        if n == 0 {
            self.finish()?;
            return Ok(0);
        }

        self.hasher.update(&buf[..n]);
        self.produced += n as u64;
        Ok(n)
    }
}

impl<R: Read> std::fmt::Debug for EntryReader<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntryReader")
            .field("name", &self.name)
            .field("expected_size", &self.expected_size)
            .field("produced", &self.produced)
            .field("priority", &self.priority)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::map_io_error;
    use crate::format::records::LocalFileHeader;
    use flate2::Compression;
    use flate2::write::DeflateEncoder;
    use std::io::{Cursor, Write};

    fn entry(method: u16, data: &[u8], compressed_size: u64) -> Entry {
        let header = LocalFileHeader {
            method,
            crc32: crc32fast::hash(data),
            compressed_size: compressed_size as u32,
            uncompressed_size: data.len() as u32,
            file_name: b"test.txt".to_vec(),
            ..Default::default()
        };
        Entry::from_local(&header, 0)
    }

    fn deflate(data: &[u8]) -> Vec<u8> {
        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn test_stored_is_identity() {
        let data = b"stored bytes pass through untouched";
        let entry = entry(0, data, data.len() as u64);
        let mut reader = EntryReader::new(Cursor::new(data.to_vec()), &entry, Priority::Low, true)
            .unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, data);
        assert_eq!(reader.priority(), Priority::Low);
    }

    #[test]
    fn test_deflated_roundtrip() {
        let data = b"hello hello hello hello hello".repeat(50);
        let compressed = deflate(&data);
        let entry = entry(8, &data, compressed.len() as u64);
        let mut reader =
            EntryReader::new(Cursor::new(compressed), &entry, Priority::Normal, true).unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, data);
        assert_eq!(reader.bytes_read(), data.len() as u64);
    }

    #[test]
    fn test_unsupported_method_rejected() {
        let entry = entry(14, b"x", 1);
        let err = EntryReader::new(Cursor::new(vec![0u8]), &entry, Priority::Normal, true)
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedMethod { method: 14, .. }));
    }

    #[test]
    fn test_crc_mismatch_detected() {
        let data = b"payload";
        let mut entry = entry(0, data, data.len() as u64);
        entry.crc32 ^= 1;
        let mut reader =
            EntryReader::new(Cursor::new(data.to_vec()), &entry, Priority::Normal, true).unwrap();
        let err = reader.read_to_end(&mut Vec::new()).unwrap_err();
        assert!(matches!(map_io_error(err), Error::CrcMismatch { .. }));

        // Verification can be disabled
        let mut reader =
            EntryReader::new(Cursor::new(data.to_vec()), &entry, Priority::Normal, false).unwrap();
        reader.read_to_end(&mut Vec::new()).unwrap();
    }

    #[test]
    fn test_short_payload_is_size_mismatch() {
        let data = b"0123456789";
        let entry = entry(0, data, data.len() as u64);
        let mut reader =
            EntryReader::new(Cursor::new(data[..4].to_vec()), &entry, Priority::Normal, true)
                .unwrap();
        let err = reader.read_to_end(&mut Vec::new()).unwrap_err();
        assert!(matches!(
            map_io_error(err),
            Error::SizeMismatch {
                expected: 10,
                actual: 4,
                ..
            }
        ));
    }

    #[test]
    fn test_output_capped_at_uncompressed_size() {
        let data = b"abc";
        let entry = entry(0, data, 3);
        let mut reader =
            EntryReader::new(Cursor::new(b"abcdef".to_vec()), &entry, Priority::Normal, true)
                .unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"abc");
    }
}
